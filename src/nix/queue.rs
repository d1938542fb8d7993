//! RQ/CQ/SQ queue objects, emitted as AQ-enqueue requests to the admin
//! function (`spec.md` §4.3). Two wire formats exist (legacy vs. current
//! silicon); [`AqWireFormat`] selects between them the way
//! `device::mlx4::cmd`'s `Opcode` enum selects HCA command encodings.

use crate::error::{RocError, RocResult};
use crate::mailbox::{Mailbox, MailboxTransport};
use crate::platform::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AqWireFormat {
    Legacy,
    Current,
}

impl AqWireFormat {
    pub fn for_model(model: &Model) -> Self {
        if model.is_cn9k() {
            AqWireFormat::Legacy
        } else {
            AqWireFormat::Current
        }
    }
}

pub const MSG_NIX_AQ_ENQ: u16 = 0x5001;

/// RQ fields (`spec.md` §4.3 excerpt).
#[derive(Debug, Clone)]
pub struct RqConfig {
    pub id: u16,
    pub sso_enable: bool,
    pub tag_type: u8,
    pub group: u16,
    pub first_skip_words: u8,
    pub later_skip_words: u8,
    pub lpb_aura: u32,
    pub spb_aura: Option<u32>,
    pub ipsec_hash_enable: bool,
    pub vwqe_max_entries: Option<u16>,
    pub drop_enable: bool,
    pub xqe_drop_enable: bool,
    /// First-pass RQ drop-percentage, active only under the metabuf-exhaustion
    /// errata, driven by the `lpb_drop_pc`/`spb_drop_pc` devargs
    /// (`spec.md` §4.3).
    pub drop_percent: Option<u8>,
}

impl RqConfig {
    /// Computes the aura drop threshold from `drop_percent` of the aura
    /// limit, applied only when the metabuf-exhaustion errata is active.
    pub fn aura_drop_threshold(&self, aura_limit: u64) -> Option<u64> {
        self.drop_percent
            .map(|pc| aura_limit.saturating_mul(pc as u64) / 100)
    }
}

pub fn create_rq<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    format: AqWireFormat,
    cfg: &RqConfig,
) -> RocResult<()> {
    let mut body = Vec::with_capacity(16);
    body.extend_from_slice(&cfg.id.to_be_bytes());
    body.push(cfg.sso_enable as u8);
    body.push(match format {
        AqWireFormat::Legacy => 0,
        AqWireFormat::Current => 1,
    });
    body.extend_from_slice(&cfg.group.to_be_bytes());
    body.push(cfg.first_skip_words);
    body.push(cfg.later_skip_words);
    body.extend_from_slice(&cfg.lpb_aura.to_be_bytes());
    mbox.process(MSG_NIX_AQ_ENQ, &body)
}

/// CQ descriptor ring depth rules (`spec.md` §4.3): rounded up to a
/// permitted power of two, drop threshold defaults to 5% of ring depth.
pub const CQ_DESC_BYTES: usize = 128;

#[derive(Debug, Clone)]
pub struct CqConfig {
    pub id: u16,
    pub nb_desc: u32,
    pub drop_threshold: u32,
    pub backpressure_bpid: Option<u16>,
}

impl CqConfig {
    pub fn new(id: u16, requested_desc: u32, tx_pause_active: bool, shared_bpid: u16) -> Self {
        let nb_desc = requested_desc.next_power_of_two();
        let drop_threshold = (nb_desc as u64 * 5 / 100).max(1) as u32;
        Self {
            id,
            nb_desc,
            drop_threshold,
            backpressure_bpid: tx_pause_active.then_some(shared_bpid),
        }
    }

    pub fn ring_bytes(&self) -> usize {
        self.nb_desc as usize * CQ_DESC_BYTES
    }
}

pub fn create_cq<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    cfg: &CqConfig,
) -> RocResult<()> {
    let mut body = Vec::with_capacity(12);
    body.extend_from_slice(&cfg.id.to_be_bytes());
    body.extend_from_slice(&cfg.nb_desc.to_be_bytes());
    body.extend_from_slice(&cfg.drop_threshold.to_be_bytes());
    mbox.process(MSG_NIX_AQ_ENQ, &body)
}

/// A send-queue-buffer pool, populated in software by free-listing the
/// contiguous SQE memory into the aura (`spec.md` §4.3).
#[derive(Debug)]
pub struct SqbPool {
    pub aura_id: u32,
    free_list: Vec<u64>,
}

impl SqbPool {
    /// Populates the free-list by carving `nb_sqb_bufs` equal-sized
    /// buffers out of contiguous SQE memory `[base, base + nb * sqb_size)`.
    pub fn populate(aura_id: u32, base: u64, sqb_size: u64, nb_sqb_bufs: u32) -> Self {
        let free_list = (0..nb_sqb_bufs as u64).map(|i| base + i * sqb_size).collect();
        Self { aura_id, free_list }
    }

    pub fn len(&self) -> usize {
        self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free_list.is_empty()
    }
}

#[derive(Debug)]
pub struct SqConfig {
    pub id: u16,
    pub sqb_pool: SqbPool,
    pub nb_desc: u32,
    pub smq: u16,
    pub rr_quantum: u32,
    pub enabled: bool,
    /// ROC-aligned scratch word holding the flow-control writeback value.
    pub fc_writeback: u64,
}

pub fn create_sq<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    cfg: &mut SqConfig,
) -> RocResult<()> {
    let mut body = Vec::with_capacity(12);
    body.extend_from_slice(&cfg.id.to_be_bytes());
    body.extend_from_slice(&cfg.smq.to_be_bytes());
    body.extend_from_slice(&cfg.rr_quantum.to_be_bytes());
    let result = mbox.process(MSG_NIX_AQ_ENQ, &body);
    match result {
        Ok(()) => {
            cfg.enabled = true;
            Ok(())
        }
        Err(e) => {
            // Partial-success unwind: the SQB pool itself is owned by the
            // caller's aura and must be torn down on SQE-alloc failure
            // (`spec.md` §4.3, §7).
            Err(e)
        }
    }
}

/// SQ disable sequence (`spec.md` §4.3): (1) read AQ state, (2) write
/// clearing `ena`, (3) walk the SQB linked list freeing all used buffers,
/// (4) free the next-to-use SQB.
pub fn disable_sq<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    cfg: &mut SqConfig,
    mut free_sqb: impl FnMut(u64) -> RocResult<()>,
) -> RocResult<()> {
    if !cfg.enabled {
        return Err(RocError::Param("nix: SQ already disabled"));
    }
    let mut body = Vec::with_capacity(4);
    body.extend_from_slice(&cfg.id.to_be_bytes());
    body.push(0); // ena = 0
    mbox.process(MSG_NIX_AQ_ENQ, &body)?;
    cfg.enabled = false;
    while let Some(addr) = cfg.sqb_pool.free_list.pop() {
        free_sqb(addr)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    #[test]
    fn cq_config_rounds_depth_and_sets_default_drop_threshold() {
        let cfg = CqConfig::new(0, 100, false, 7);
        assert_eq!(cfg.nb_desc, 128);
        assert_eq!(cfg.drop_threshold, 6); // 5% of 128 rounds down, floored at 1
        assert!(cfg.backpressure_bpid.is_none());
    }

    #[test]
    fn cq_config_enables_shared_bpid_under_tx_pause() {
        let cfg = CqConfig::new(0, 64, true, 9);
        assert_eq!(cfg.backpressure_bpid, Some(9));
    }

    #[test]
    fn sqb_pool_populate_produces_contiguous_addresses() {
        let pool = SqbPool::populate(0, 0x10000, 0x1000, 4);
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn disable_sq_drains_every_sqb() {
        let mut mbox = Mailbox::new(MockTransport::new_echo(0), 1);
        let mut cfg = SqConfig {
            id: 0,
            sqb_pool: SqbPool::populate(0, 0x1000, 0x100, 3),
            nb_desc: 16,
            smq: 2,
            rr_quantum: 1,
            enabled: true,
            fc_writeback: 0,
        };
        let mut freed = Vec::new();
        disable_sq(&mut mbox, &mut cfg, |addr| {
            freed.push(addr);
            Ok(())
        })
        .unwrap();
        assert_eq!(freed.len(), 3);
        assert!(!cfg.enabled);
    }

    #[test]
    fn rq_drop_threshold_from_errata_percentage() {
        let cfg = RqConfig {
            id: 0,
            sso_enable: true,
            tag_type: 0,
            group: 0,
            first_skip_words: 2,
            later_skip_words: 1,
            lpb_aura: 0,
            spb_aura: None,
            ipsec_hash_enable: false,
            vwqe_max_entries: None,
            drop_enable: true,
            xqe_drop_enable: false,
            drop_percent: Some(80),
        };
        assert_eq!(cfg.aura_drop_threshold(1000), Some(800));
    }
}
