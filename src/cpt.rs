//! L2 CPT: crypto engine logical-function management.
//!
//! Attach/alloc, engine-group selection, instruction-queue init, the
//! engine-capability probe and the SA-sync primitives used by inline
//! IPSec (`spec.md` §2, §4.4). Grounded on `device::mlx4::cmd`'s
//! opcode/poll-until-done style, generalized from a single HCR register to
//! a CPT instruction queue submitted over an LMT line.

use crate::error::{RocError, RocResult};
use crate::mailbox::{Mailbox, MailboxTransport};
use crate::platform::{Clock, LmtLine};

/// Engine-group selection mask. Differs by silicon revision
/// (`spec.md` §4.4 "alloc with an engine group mask that differs by
/// silicon revision").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineGroupMask(pub u8);

impl EngineGroupMask {
    pub const CN9K: EngineGroupMask = EngineGroupMask(0b0000_0011);
    pub const CN10K: EngineGroupMask = EngineGroupMask(0b0000_0111);
}

/// A CPT logical function's instruction queue.
#[derive(Debug)]
pub struct InstructionQueue {
    pub depth: u32,
    pub head: u32,
    pub tail: u32,
}

impl InstructionQueue {
    pub fn init(depth: u32) -> RocResult<Self> {
        if !depth.is_power_of_two() || depth == 0 {
            return Err(RocError::Param("cpt: instruction queue depth must be a power of two"));
        }
        Ok(Self { depth, head: 0, tail: 0 })
    }

    pub fn enqueue(&mut self) -> RocResult<u32> {
        let next = (self.tail + 1) % self.depth;
        if next == self.head {
            return Err(RocError::NoSpace("cpt: instruction queue full"));
        }
        let slot = self.tail;
        self.tail = next;
        Ok(slot)
    }

    pub fn complete_to(&mut self, head: u32) {
        self.head = head;
    }
}

/// A CPT logical function attached to a `(nix_pf_func, sso_pf_func)` pair
/// (`spec.md` §4.4 "bind to `(nix_pf_func, sso_pf_func)`, enable IQ and
/// optional completion queue").
#[derive(Debug)]
pub struct CptLf {
    pub id: u16,
    pub msix_offset: u16,
    pub nix_pf_func: u16,
    pub sso_pf_func: u16,
    pub iq: InstructionQueue,
    pub completion_queue_enabled: bool,
    pub engine_group_mask: EngineGroupMask,
}

pub const MSG_CPT_LF_ALLOC: u16 = 0x3001;
pub const MSG_CPT_LF_FREE: u16 = 0x3002;
pub const MSG_CPT_MSIX_OFFSET: u16 = 0x3003;

/// Attaches `nb_lf` CPT-LFs, allocating an extra one when RX-injection is
/// requested and no inline device already carries it
/// (`spec.md` §4.4 "Outbound CPT provisioning").
pub fn attach_lfs<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    nb_lf: u16,
    rx_inject_requested: bool,
    inline_dev_carries_rx: bool,
) -> RocResult<u16> {
    let extra = u16::from(rx_inject_requested && !inline_dev_carries_rx);
    let total = nb_lf
        .checked_add(extra)
        .ok_or(RocError::Param("cpt: nb_lf overflow"))?;
    mbox.process(MSG_CPT_LF_ALLOC, &total.to_be_bytes())?;
    Ok(total)
}

pub fn alloc_lf<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    id: u16,
    nix_pf_func: u16,
    sso_pf_func: u16,
    engine_group_mask: EngineGroupMask,
    iq_depth: u32,
) -> RocResult<CptLf> {
    let mut body = Vec::with_capacity(4);
    body.push((id >> 8) as u8);
    body.push(id as u8);
    body.push(engine_group_mask.0);
    body.push(0);
    mbox.process(MSG_CPT_LF_ALLOC, &body)?;
    let rsp = mbox.process_msg(MSG_CPT_MSIX_OFFSET, &id.to_be_bytes())?;
    let msix_offset = rsp
        .get(0..2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .unwrap_or(0);
    Ok(CptLf {
        id,
        msix_offset,
        nix_pf_func,
        sso_pf_func,
        iq: InstructionQueue::init(iq_depth)?,
        completion_queue_enabled: false,
        engine_group_mask,
    })
}

/// The recorded hardware-crypto capability word from a `LOAD_FVC` /
/// `HW_CRYPTO_SUPPORT` probe (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCapabilities(pub u64);

/// Submits a single `LOAD_FVC`/`HW_CRYPTO_SUPPORT` instruction on an LMT
/// line and polls for completion, bounded by a 1-minute wall-clock deadline
/// (`spec.md` §4.4, §5). On legacy silicon the instruction is posted via a
/// load-then-submit pair; on newer silicon via a steorl on a control LMT
/// line — modeled here as the `legacy` flag selecting the submit path.
pub fn probe_engine_capabilities(
    clock: &dyn Clock,
    _control_line: LmtLine,
    legacy: bool,
    poll: impl FnMut() -> Option<u64>,
) -> RocResult<EngineCapabilities> {
    const ONE_MINUTE_NANOS: u64 = 60 * 1_000_000_000;
    let mut result = None;
    let mut poll = poll;
    crate::platform::poll_until(clock, ONE_MINUTE_NANOS, || {
        if let Some(caps) = poll() {
            result = Some(caps);
            true
        } else {
            false
        }
    })?;
    let caps = result.ok_or(RocError::TimedOut("cpt: engine capability probe"))?;
    log::debug!("cpt: engine capability probe ({}): {caps:#x}", if legacy { "legacy" } else { "steorl" });
    Ok(EngineCapabilities(caps))
}

/// SA synchronization opcodes (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaSyncOp {
    Flush,
    FlushInval,
    Reload,
    Inval,
}

/// Writes the single SA-sync CSR with the SA pointer shifted right by 7.
/// `Flush` is followed by an acquire-release fence and a CSR readback
/// exposing `flush_st_flt`. On cn9k all ops degenerate to a memory fence.
pub fn sa_sync(
    op: SaSyncOp,
    sa_addr: u64,
    cn9k: bool,
    mut write_csr: impl FnMut(u64),
    mut read_flush_status: impl FnMut() -> u32,
) -> RocResult<Option<bool>> {
    if cn9k {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
        return Ok(None);
    }
    let ptr = sa_addr >> 7;
    write_csr(ptr);
    if op == SaSyncOp::Flush {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
        let status = read_flush_status();
        let flush_st_flt = status & 0x1 != 0;
        return Ok(Some(flush_st_flt));
    }
    Ok(None)
}

/// Writes an SA context either via the CPT "write SA" microcode call
/// followed by a `Flush` (when `use_write_sa` is set, cn10k/newer), or via
/// a software memcpy bracketed by clearing/setting the `aop_valid` bit,
/// followed by an `Inval` sync (`spec.md` §4.4).
pub fn context_write(
    use_write_sa: bool,
    sa: &mut [u8],
    new_context: &[u8],
    aop_valid_byte_offset: usize,
    mut microcode_write_sa: impl FnMut(&[u8]) -> RocResult<()>,
    mut sync: impl FnMut(SaSyncOp) -> RocResult<()>,
) -> RocResult<()> {
    if use_write_sa {
        microcode_write_sa(new_context)?;
        sync(SaSyncOp::Flush)?;
        return Ok(());
    }
    if aop_valid_byte_offset >= sa.len() {
        return Err(RocError::Param("cpt: aop_valid offset out of range"));
    }
    sa[aop_valid_byte_offset] &= !0x1;
    sa[..new_context.len()].copy_from_slice(new_context);
    sa[aop_valid_byte_offset] |= 0x1;
    sync(SaSyncOp::Inval)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FakeClock;

    #[test]
    fn instruction_queue_wraps_and_detects_full() {
        let mut iq = InstructionQueue::init(4).unwrap();
        assert_eq!(iq.enqueue().unwrap(), 0);
        assert_eq!(iq.enqueue().unwrap(), 1);
        assert_eq!(iq.enqueue().unwrap(), 2);
        assert!(iq.enqueue().is_err());
        iq.complete_to(1);
        assert_eq!(iq.enqueue().unwrap(), 3);
    }

    #[test]
    fn attach_lfs_adds_one_for_unclaimed_rx_inject() {
        let transport = crate::testutil::MockTransport::new_echo(0);
        let mut mbox = Mailbox::new(transport, 1);
        assert_eq!(attach_lfs(&mut mbox, 2, true, false).unwrap(), 3);
        let mut mbox2 = Mailbox::new(crate::testutil::MockTransport::new_echo(0), 1);
        assert_eq!(attach_lfs(&mut mbox2, 2, true, true).unwrap(), 2);
    }

    #[test]
    fn probe_engine_capabilities_times_out_without_response() {
        let clock = FakeClock::new();
        clock.advance(61_000_000_000);
        let result = probe_engine_capabilities(&clock, LmtLine { index: 0 }, false, || None);
        assert!(result.is_err());
    }

    #[test]
    fn probe_engine_capabilities_returns_value() {
        let clock = FakeClock::new();
        let result =
            probe_engine_capabilities(&clock, LmtLine { index: 0 }, false, || Some(0xABCD)).unwrap();
        assert_eq!(result.0, 0xABCD);
    }

    #[test]
    fn sa_sync_cn9k_is_memory_fence_only() {
        let mut writes = 0;
        let result = sa_sync(SaSyncOp::Flush, 0x1000, true, |_| writes += 1, || 0);
        assert_eq!(writes, 0);
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn sa_sync_flush_shifts_addr_and_reads_status() {
        let mut seen_ptr = None;
        let result = sa_sync(
            SaSyncOp::Flush,
            0x1000,
            false,
            |ptr| seen_ptr = Some(ptr),
            || 0x1,
        );
        assert_eq!(seen_ptr, Some(0x1000 >> 7));
        assert_eq!(result.unwrap(), Some(true));
    }

    #[test]
    fn context_write_software_path_toggles_aop_valid() {
        let mut sa = vec![0u8; 8];
        sa[0] = 0x1;
        let mut synced = None;
        context_write(false, &mut sa, &[0xAA, 0xBB], 0, |_| Ok(()), |op| {
            synced = Some(op);
            Ok(())
        })
        .unwrap();
        assert_eq!(sa[0] & 0x1, 0x1);
        assert_eq!(synced, Some(SaSyncOp::Inval));
    }
}
