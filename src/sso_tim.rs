//! L2 SSO/TIM: event-group and timer-ring attach/alloc.
//!
//! Event-group and ring attach/alloc, MSIX offset retrieval, and ring
//! enable with retry on start-sync failure (`spec.md` §2, §6). Grounded on
//! `device::mlx4::event_queue`'s `init_eqs` allocation pattern and
//! `cmd::CommandInterface`'s single-opcode round trip, composed with
//! [`crate::mailbox::Mailbox::process_msg_retrying`] for the documented
//! `LF_START_SYNC_FAIL` retry.

use crate::error::RocResult;
use crate::mailbox::{Mailbox, MailboxTransport};

pub const MSG_SSO_HWGRP_ALLOC: u16 = 0x4001;
pub const MSG_SSO_HWS_ALLOC: u16 = 0x4002;
pub const MSG_SSO_MSIX_OFFSET: u16 = 0x4003;
pub const MSG_TIM_LF_ALLOC: u16 = 0x4101;
pub const MSG_TIM_LF_RING_START: u16 = 0x4102;
pub const MSG_TIM_LF_RING_STOP: u16 = 0x4103;

/// An SSO event group: the unit of work distribution for NIX RQs and CPT
/// completions (`spec.md` §2).
#[derive(Debug, Clone, Copy)]
pub struct EventGroup {
    pub id: u16,
    pub msix_offset: u16,
}

pub fn alloc_event_group<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    id: u16,
) -> RocResult<EventGroup> {
    mbox.process(MSG_SSO_HWGRP_ALLOC, &id.to_be_bytes())?;
    let rsp = mbox.process_msg(MSG_SSO_MSIX_OFFSET, &id.to_be_bytes())?;
    let msix_offset = rsp.get(0..2).map(|b| u16::from_be_bytes([b[0], b[1]])).unwrap_or(0);
    Ok(EventGroup { id, msix_offset })
}

/// A TIM (timer) ring, attached/alloc'd like an SSO group, then started.
/// Ring start can race the admin function's own start/sync handshake; the
/// spec documents up to 8 retries on `TIM_AF_LF_START_SYNC_FAIL`.
#[derive(Debug, Clone, Copy)]
pub struct TimRing {
    pub id: u16,
    pub running: bool,
}

pub fn alloc_tim_ring<T: MailboxTransport>(mbox: &mut Mailbox<T>, id: u16) -> RocResult<TimRing> {
    mbox.process(MSG_TIM_LF_ALLOC, &id.to_be_bytes())?;
    Ok(TimRing { id, running: false })
}

/// Starts the ring, retrying automatically on the documented
/// `LF_START_SYNC_FAIL` admin code (`spec.md` §6, §5).
pub fn start_ring<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    ring: &mut TimRing,
) -> RocResult<()> {
    mbox.process_msg_retrying(MSG_TIM_LF_RING_START, &ring.id.to_be_bytes())?;
    ring.running = true;
    Ok(())
}

pub fn stop_ring<T: MailboxTransport>(mbox: &mut Mailbox<T>, ring: &mut TimRing) -> RocResult<()> {
    mbox.process(MSG_TIM_LF_RING_STOP, &ring.id.to_be_bytes())?;
    ring.running = false;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ADMIN_ERR_LF_START_SYNC_FAIL;
    use crate::testutil::MockTransport;

    #[test]
    fn event_group_alloc_records_msix_offset() {
        let mut mbox = Mailbox::new(MockTransport::new_echo(0), 1);
        let group = alloc_event_group(&mut mbox, 3).unwrap();
        assert_eq!(group.id, 3);
    }

    #[test]
    fn ring_start_retries_on_start_sync_fail_then_succeeds() {
        let mut mbox =
            Mailbox::new(MockTransport::new_fail_then_succeed(ADMIN_ERR_LF_START_SYNC_FAIL, 4), 1);
        let mut ring = TimRing { id: 1, running: false };
        start_ring(&mut mbox, &mut ring).unwrap();
        assert!(ring.running);
    }

    #[test]
    fn ring_start_gives_up_after_too_many_retries() {
        let mut mbox =
            Mailbox::new(MockTransport::new_fail_then_succeed(ADMIN_ERR_LF_START_SYNC_FAIL, 9), 1);
        let mut ring = TimRing { id: 1, running: false };
        assert!(start_ring(&mut mbox, &mut ring).is_err());
        assert!(!ring.running);
    }
}
