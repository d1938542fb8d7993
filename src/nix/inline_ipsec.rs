//! NIX inline IPSec — the hardest subsystem (`spec.md` §4.4).
//!
//! Meta-aura creation (global or per-port), the inbound SA table, inbound
//! RQ masking, reassembly profile/scrub, and outbound CPT provisioning.
//! Grounded on `device::mlx4::icm`'s `init_icm_table` (a sized, aligned,
//! per-slot-initialized table keyed by a computed base) for the SA table,
//! and on `device::mlx4`'s reference-counted singleton for the meta-aura.

use crate::error::{RocError, RocResult};
use crate::mailbox::{Mailbox, MailboxTransport};
use crate::platform::DevArgs;

/// Fixed packet-kind value tagging inline-IPSec RX traffic.
pub const PACKET_KIND_IPSEC: u8 = 0x20;

pub const META_SIZE: u32 = 128;
pub const SA_BASE_ALIGN: u64 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaAuraMode {
    /// Single aura at id 0, process-wide, reference counted.
    Global,
    /// Per-port aura named `NIX_INL_META_POOL_<port+1>`.
    PerPort { port: u16 },
}

#[derive(Debug, Clone)]
pub struct MetaAura {
    pub aura_id: u32,
    pub mode: MetaAuraMode,
    pub buf_size: u32,
    pub nb_bufs: u32,
    pub refs: i32,
}

/// Buffer-type limits the NPA reports for a given packet type, used to
/// validate meta-aura sizing (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct BufTypeLimits {
    pub packet: u32,
    pub packet_ipsec: u32,
}

impl BufTypeLimits {
    pub fn union(&self) -> u32 {
        self.packet.max(self.packet_ipsec)
    }
}

/// Creates the global meta-aura (id 0), sized from the `PACKET_IPSEC`
/// buffer-type limit unless overridden by `nb_meta_bufs`/`meta_buf_sz`
/// devargs.
pub fn create_global_meta_aura(
    limits: BufTypeLimits,
    devargs: &DevArgs,
) -> RocResult<MetaAura> {
    let expected = limits.packet_ipsec;
    let nb_bufs = devargs.nb_meta_bufs.unwrap_or(expected);
    if nb_bufs < expected {
        return Err(RocError::Param("inline ipsec: meta-aura smaller than PACKET_IPSEC limit"));
    }
    let buf_size = devargs.meta_buf_sz.unwrap_or(META_SIZE);
    Ok(MetaAura { aura_id: 0, mode: MetaAuraMode::Global, buf_size, nb_bufs, refs: 1 })
}

/// Creates a per-port local meta-aura, sized from the RQ aura limit plus an
/// optional SPB aura limit; buffer size is `first_skip + META_SIZE` unless
/// overridden.
pub fn create_per_port_meta_aura(
    port: u16,
    rq_aura_limit: u32,
    spb_aura_limit: Option<u32>,
    first_skip_bytes: u32,
    devargs: &DevArgs,
) -> RocResult<MetaAura> {
    let nb_bufs = devargs
        .nb_meta_bufs
        .unwrap_or_else(|| rq_aura_limit + spb_aura_limit.unwrap_or(0));
    let buf_size = devargs.meta_buf_sz.unwrap_or(first_skip_bytes + META_SIZE);
    Ok(MetaAura {
        aura_id: u32::from(port) + 1,
        mode: MetaAuraMode::PerPort { port },
        buf_size,
        nb_bufs,
        refs: 1,
    })
}

/// Validates a meta-aura against the buffer-type limits before it is
/// committed (`spec.md` §4.4 "Validation (global mode)").
pub fn validate_global_meta_aura(
    aura: &MetaAura,
    limits: BufTypeLimits,
    rq_first_skip: u32,
) -> RocResult<()> {
    if aura.nb_bufs < limits.packet_ipsec {
        return Err(RocError::Param("inline ipsec: actual_bufs below expected"));
    }
    if aura.buf_size < rq_first_skip + META_SIZE {
        return Err(RocError::Param("inline ipsec: meta-buf smaller than first_skip + META_SIZE"));
    }
    Ok(())
}

/// Validates that a VWQE aura shared between inline-enabled and
/// non-inline ports satisfies the union of buffer-type limits.
pub fn validate_shared_vwqe_aura(vwqe_aura_limit: u32, limits: BufTypeLimits) -> RocResult<()> {
    if vwqe_aura_limit < limits.union() {
        return Err(RocError::Param("inline ipsec: shared VWQE aura below PACKET ∪ PACKET_IPSEC limit"));
    }
    Ok(())
}

/// Inbound SA table sizing (`spec.md` §3 invariant 3, §4.4).
#[derive(Debug, Clone, Copy)]
pub struct SaTableLayout {
    pub base: u64,
    pub min_spi: u32,
    pub max_spi: u32,
    pub mask: u32,
    pub sa_size: u32,
    pub max_sa: u32,
}

impl SaTableLayout {
    /// `mask = next_pow2(max_spi − min_spi + 1) − 1`.
    pub fn new(base: u64, min_spi: u32, max_spi: u32, sa_size: u32) -> RocResult<Self> {
        if max_spi < min_spi {
            return Err(RocError::Param("inline ipsec: max_spi < min_spi"));
        }
        if base % SA_BASE_ALIGN != 0 {
            return Err(RocError::Param("inline ipsec: SA table base misaligned"));
        }
        let span = max_spi - min_spi + 1;
        let max_sa = span.next_power_of_two();
        let mask = max_sa - 1;
        Ok(Self { base, min_spi, max_spi, mask, sa_size, max_sa })
    }

    /// `sa_addr(spi) = base + ((spi & mask) * sa_size)`
    /// (`spec.md` §3 invariant 3, §8 testable property 3).
    pub fn spi_to_sa(&self, spi: u32) -> u64 {
        self.base + u64::from(spi & self.mask) * u64::from(self.sa_size)
    }

    pub fn sa_idx_w(&self) -> u32 {
        self.max_sa.trailing_zeros()
    }

    pub fn sa_pow2_size(&self) -> u32 {
        self.sa_size.next_power_of_two().trailing_zeros()
    }
}

/// Per-silicon SA slot element size (`spec.md` §4.4).
pub fn sa_element_size(cn9k: bool, cn10k: bool) -> u32 {
    if cn9k || cn10k {
        1024
    } else {
        2048 // octeon-west: larger
    }
}

pub const MSG_NIX_INL_LF_CFG: u16 = 0x6001;
pub const MSG_NIX_RX_INL_LF_CFG: u16 = 0x6002;
pub const MSG_NIX_INL_RQ_MASK: u16 = 0x6003;
pub const MSG_NIX_RXC_TIME_CFG: u16 = 0x6004;

/// Commits the versioned inline-IPSec-LF-cfg message
/// (`spec.md` §4.4). `bpid`/`ctx_ilen` are optional on newer silicon.
pub fn commit_inline_lf_cfg<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    layout: &SaTableLayout,
    mtu: u16,
    bpid: Option<u16>,
    ctx_ilen: Option<u8>,
) -> RocResult<()> {
    let mut body = Vec::with_capacity(20);
    body.extend_from_slice(&layout.base.to_be_bytes());
    body.push(layout.sa_idx_w() as u8);
    body.push(layout.sa_pow2_size() as u8);
    body.extend_from_slice(&(mtu.wrapping_sub(1)).to_be_bytes());
    body.push(0x02); // tag_type = ORDERED
    body.push(bpid.is_some() as u8);
    if let Some(bpid) = bpid {
        body.extend_from_slice(&bpid.to_be_bytes());
    }
    if let Some(ilen) = ctx_ilen {
        body.push(ilen);
    }
    mbox.process(MSG_NIX_INL_LF_CFG, &body)
}

/// Newer silicon's `rx_inl_lf_cfg` message family, carrying a profile id,
/// default CPT queue, and a packed `cfg0/cfg1` layout (`spec.md` §4.4).
pub fn commit_rx_inl_lf_cfg<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    profile_id: u8,
    default_cpt_queue: u16,
    cfg0: u64,
    cfg1: u64,
) -> RocResult<()> {
    let mut body = Vec::with_capacity(19);
    body.push(profile_id);
    body.extend_from_slice(&default_cpt_queue.to_be_bytes());
    body.extend_from_slice(&cfg0.to_be_bytes());
    body.extend_from_slice(&cfg1.to_be_bytes());
    mbox.process(MSG_NIX_RX_INL_LF_CFG, &body)
}

/// A reassembly profile: one-entry SA table with a dedicated profile id
/// from the `rx_inl_lf_cfg` family, allocated only when `reass_ena` is set.
#[derive(Debug, Clone)]
pub struct ReassemblyProfile {
    pub profile_id: u8,
    pub sa_addr: u64,
}

pub fn alloc_reassembly_profile<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    devargs: &DevArgs,
    profile_id: u8,
    sa_addr: u64,
    default_cpt_queue: u16,
) -> RocResult<Option<ReassemblyProfile>> {
    if !devargs.reass_ena {
        return Ok(None);
    }
    commit_rx_inl_lf_cfg(mbox, profile_id, default_cpt_queue, 0, 0)?;
    Ok(Some(ReassemblyProfile { profile_id, sa_addr }))
}

/// Inbound RQ mask: the fields the inline engine is allowed to overwrite on
/// enable (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct RqMask {
    pub length_check_disabled: bool,
    pub drop_bits_cleared: bool,
    pub spb_enable: bool,
    pub first_skip: u8,
}

pub fn set_rq_mask<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    rq_id: u16,
    enable: bool,
    mask: RqMask,
    second_pass_drop_supported: bool,
) -> RocResult<()> {
    let mut body = Vec::with_capacity(8);
    body.extend_from_slice(&rq_id.to_be_bytes());
    body.push(enable as u8);
    body.push(mask.length_check_disabled as u8);
    body.push(mask.drop_bits_cleared as u8);
    body.push(mask.spb_enable as u8);
    body.push(mask.first_skip);
    if !second_pass_drop_supported {
        // `ena`/`rq_int_ena` are also updated on silicon lacking the
        // second-pass-drop feature (`spec.md` §4.4).
        body.push(enable as u8); // ena
        body.push(enable as u8); // rq_int_ena
    }
    mbox.process(MSG_NIX_INL_RQ_MASK, &body)
}

/// RXC (reassembly scrub) time configuration (`spec.md` §4.4).
#[derive(Debug, Clone, Copy)]
pub struct RxcTimeConfig {
    pub step: u32,
    pub zombie_limit: u32,
    pub zombie_threshold: u32,
    pub active_limit: u32,
    pub active_threshold: u32,
    pub block_threshold: u32,
}

impl RxcTimeConfig {
    /// `step` defaults to `max_wait_time * 1000 / active_limit` when zero;
    /// all other fields use their documented defaults.
    pub fn with_defaults(max_wait_time_ms: u32, active_limit: u32) -> Self {
        let step = if active_limit == 0 {
            0
        } else {
            max_wait_time_ms.saturating_mul(1000) / active_limit
        };
        Self {
            step,
            zombie_limit: 1_000_000,
            zombie_threshold: 768,
            active_limit,
            active_threshold: active_limit.saturating_mul(3) / 4,
            block_threshold: 64,
        }
    }
}

pub fn configure_rxc_time<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    cfg: &RxcTimeConfig,
) -> RocResult<()> {
    let mut body = Vec::with_capacity(24);
    for field in [
        cfg.step,
        cfg.zombie_limit,
        cfg.zombie_threshold,
        cfg.active_limit,
        cfg.active_threshold,
        cfg.block_threshold,
    ] {
        body.extend_from_slice(&field.to_be_bytes());
    }
    mbox.process(MSG_NIX_RXC_TIME_CFG, &body)
}

/// Soft-expiry ring array lazily allocated when polling is later enabled
/// (`spec.md` §9 open question: when `set_soft_exp_poll` is false at
/// outbound init, the array is left unallocated and `outb_se_ring_cnt` is
/// zeroed; a caller enabling polling afterward must allocate it itself).
#[derive(Debug, Default)]
pub struct SoftExpiryRings {
    rings: Option<Vec<u64>>,
}

impl SoftExpiryRings {
    pub fn init(set_soft_exp_poll: bool, nb_sa_err_rings: u32) -> Self {
        if set_soft_exp_poll {
            Self { rings: Some(vec![0; nb_sa_err_rings as usize]) }
        } else {
            // Deliberately left unallocated; count reads as zero until a
            // caller lazily allocates via `ensure_allocated`.
            Self { rings: None }
        }
    }

    pub fn count(&self) -> u32 {
        self.rings.as_ref().map(|r| r.len() as u32).unwrap_or(0)
    }

    pub fn ensure_allocated(&mut self, nb_sa_err_rings: u32) {
        if self.rings.is_none() {
            self.rings = Some(vec![0; nb_sa_err_rings as usize]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spi_to_sa_bijection_over_full_range() {
        let layout = SaTableLayout::new(0x4000, 0x100, 0x1FF, 1024).unwrap();
        assert_eq!(layout.max_sa, 256);
        assert_eq!(layout.sa_idx_w(), 8);
        for spi in layout.min_spi..=layout.max_spi {
            let addr = layout.spi_to_sa(spi);
            let slot = (addr - layout.base) / u64::from(layout.sa_size);
            assert_eq!(slot, u64::from(spi & layout.mask));
            assert!(slot < u64::from(layout.max_sa));
        }
    }

    #[test]
    fn sa_table_rejects_misaligned_base() {
        assert!(SaTableLayout::new(1, 0, 255, 1024).is_err());
    }

    #[test]
    fn global_meta_aura_bring_up_matches_scenario_s4() {
        let limits = BufTypeLimits { packet: 0, packet_ipsec: 256 };
        let devargs = DevArgs::default();
        let aura = create_global_meta_aura(limits, &devargs).unwrap();
        assert_eq!(aura.nb_bufs, 256);
        assert_eq!(aura.refs, 1);
        validate_global_meta_aura(&aura, limits, 64).unwrap();

        let layout = SaTableLayout::new(0x4000, 0x100, 0x1FF, 1024).unwrap();
        assert_eq!(layout.max_sa, 256);
        assert_eq!(layout.sa_idx_w(), 8);
    }

    #[test]
    fn global_meta_aura_rejects_undersized_override() {
        let limits = BufTypeLimits { packet: 0, packet_ipsec: 256 };
        let devargs = DevArgs { nb_meta_bufs: Some(10), ..Default::default() };
        assert!(create_global_meta_aura(limits, &devargs).is_err());
    }

    #[test]
    fn rxc_time_config_default_step() {
        let cfg = RxcTimeConfig::with_defaults(4000, 2000);
        assert_eq!(cfg.step, 2000);
        assert_eq!(cfg.active_threshold, 1500);
    }

    #[test]
    fn soft_expiry_rings_stay_unallocated_until_enabled() {
        let mut rings = SoftExpiryRings::init(false, 8);
        assert_eq!(rings.count(), 0);
        rings.ensure_allocated(8);
        assert_eq!(rings.count(), 8);
    }
}
