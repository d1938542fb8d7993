//! L0 mailbox: message-level contract between a host logical function and
//! the administrative function (`spec.md` §4.1, §6).
//!
//! The transport itself (shared-memory ring, doorbell, interrupt delivery)
//! is explicitly out of scope (`spec.md` §1); only message framing and the
//! request/response discipline are modeled here. Grounded on
//! `device::mlx4::cmd::CommandInterface`: a single in-flight transaction,
//! a typed opcode, a poll-until-done loop and a typed status on return —
//! generalized from one MMIO-backed HCR register to an arbitrary
//! byte-oriented transport.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{RocError, RocResult};

pub const MBOX_REQ_SIG: u16 = 0x9651;
pub const MBOX_RSP_SIG: u16 = 0x9652;

/// Admin-function error codes are retried this many times when they signal
/// a timer-LF start/sync race (`spec.md` §6).
pub const LF_START_SYNC_RETRIES: u32 = 8;

/// Request header, framed the way the spec describes it: signature, message
/// id, requesting pcifunc, and the offset of the next message in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MboxReqHeader {
    pub sig: u16,
    pub id: u16,
    pub pcifunc: u16,
    pub next_msgoff: u16,
}

impl MboxReqHeader {
    pub const WIRE_LEN: usize = 8;

    pub fn encode(&self, buf: &mut [u8]) {
        BigEndian::write_u16(&mut buf[0..2], self.sig);
        BigEndian::write_u16(&mut buf[2..4], self.id);
        BigEndian::write_u16(&mut buf[4..6], self.pcifunc);
        BigEndian::write_u16(&mut buf[6..8], self.next_msgoff);
    }

    pub fn decode(buf: &[u8]) -> RocResult<Self> {
        if buf.len() < Self::WIRE_LEN {
            return Err(RocError::MboxIo { msg_id: 0 });
        }
        let sig = BigEndian::read_u16(&buf[0..2]);
        if sig != MBOX_REQ_SIG {
            return Err(RocError::MboxIo { msg_id: 0 });
        }
        Ok(Self {
            sig,
            id: BigEndian::read_u16(&buf[2..4]),
            pcifunc: BigEndian::read_u16(&buf[4..6]),
            next_msgoff: BigEndian::read_u16(&buf[6..8]),
        })
    }
}

/// Response header: signature, echoed id, and a signed result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MboxRspHeader {
    pub sig: u16,
    pub id: u16,
    pub rc: i32,
}

impl MboxRspHeader {
    pub const WIRE_LEN: usize = 8;

    pub fn encode(&self, buf: &mut [u8]) {
        BigEndian::write_u16(&mut buf[0..2], self.sig);
        BigEndian::write_u16(&mut buf[2..4], self.id);
        BigEndian::write_i32(&mut buf[4..8], self.rc);
    }

    pub fn decode(buf: &[u8]) -> RocResult<Self> {
        if buf.len() < Self::WIRE_LEN {
            return Err(RocError::MboxIo { msg_id: 0 });
        }
        let sig = BigEndian::read_u16(&buf[0..2]);
        if sig != MBOX_RSP_SIG {
            return Err(RocError::MboxIo { msg_id: 0 });
        }
        Ok(Self {
            sig,
            id: BigEndian::read_u16(&buf[2..4]),
            rc: BigEndian::read_i32(&buf[4..8]),
        })
    }
}

/// The message-level transport contract. A real implementation backs this
/// with a shared-memory ring and an admin-function interrupt or poll; tests
/// use [`crate::testutil::MockTransport`].
pub trait MailboxTransport: Send {
    /// Writes a request (header + body) and returns the raw response bytes
    /// (header + body) once the admin function has replied. Blocks the
    /// calling thread; there is at most one in-flight transaction per
    /// direction (`spec.md` §4.1).
    fn transact(&mut self, request: &[u8]) -> RocResult<Vec<u8>>;
}

/// A single mailbox direction (downlink AF↔PF or uplink AF↔PF — `spec.md`
/// §3 "Device handle ... owns two mailbox contexts").
pub struct Mailbox<T: MailboxTransport> {
    transport: T,
    pcifunc: u16,
    next_token: u16,
}

impl<T: MailboxTransport> Mailbox<T> {
    pub fn new(transport: T, pcifunc: u16) -> Self {
        Self { transport, pcifunc, next_token: 0 }
    }

    /// `process()`: fire-and-wait, discarding the response body (used for
    /// requests whose only interesting output is success/failure).
    pub fn process(&mut self, id: u16, body: &[u8]) -> RocResult<()> {
        self.process_msg(id, body)?;
        Ok(())
    }

    /// `process_msg(&rsp)`: fire-and-return-typed-response. Returns the
    /// response body bytes on success (`rc == 0`); any other `rc` is
    /// surfaced as [`RocError::AdminFunction`].
    pub fn process_msg(&mut self, id: u16, body: &[u8]) -> RocResult<Vec<u8>> {
        let header = MboxReqHeader {
            sig: MBOX_REQ_SIG,
            id,
            pcifunc: self.pcifunc,
            next_msgoff: body.len() as u16,
        };
        self.next_token = self.next_token.wrapping_add(1);

        let mut request = vec![0u8; MboxReqHeader::WIRE_LEN + body.len()];
        header.encode(&mut request[..MboxReqHeader::WIRE_LEN]);
        request[MboxReqHeader::WIRE_LEN..].copy_from_slice(body);

        let raw = self
            .transport
            .transact(&request)
            .map_err(|_| RocError::MboxIo { msg_id: id })?;
        let rsp_header = MboxRspHeader::decode(&raw)?;
        if rsp_header.id != id {
            return Err(RocError::MboxIo { msg_id: id });
        }
        if rsp_header.rc != 0 {
            return Err(RocError::AdminFunction(rsp_header.rc));
        }
        Ok(raw[MboxRspHeader::WIRE_LEN..].to_vec())
    }

    /// As [`Self::process_msg`], but retries automatically on the
    /// documented retryable admin codes (`spec.md` §6, `LF_START_SYNC_FAIL`)
    /// up to [`LF_START_SYNC_RETRIES`] times.
    pub fn process_msg_retrying(&mut self, id: u16, body: &[u8]) -> RocResult<Vec<u8>> {
        let mut attempt = 0;
        loop {
            match self.process_msg(id, body) {
                Ok(rsp) => return Ok(rsp),
                Err(e) if e.is_retryable() && attempt < LF_START_SYNC_RETRIES => {
                    attempt += 1;
                    log::warn!("mailbox: retrying msg {id} after retryable error ({attempt}/{LF_START_SYNC_RETRIES})");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Counts of logical functions of each kind, used for resource
/// attach/detach (`spec.md` §4.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub sso_hws: u16,
    pub sso_hwgrp: u16,
    pub npa: u16,
    pub tim: u16,
    pub cpt: u16,
    pub nix: u16,
}

impl ResourceCounts {
    /// Clamps every field to the admin function's granted counts (which may
    /// be fewer than requested).
    pub fn clamp_to_granted(&self, granted: &ResourceCounts) -> ResourceCounts {
        ResourceCounts {
            sso_hws: self.sso_hws.min(granted.sso_hws),
            sso_hwgrp: self.sso_hwgrp.min(granted.sso_hwgrp),
            npa: self.npa.min(granted.npa),
            tim: self.tim.min(granted.tim),
            cpt: self.cpt.min(granted.cpt),
            nix: self.nix.min(granted.nix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    #[test]
    fn header_round_trips() {
        let hdr = MboxReqHeader { sig: MBOX_REQ_SIG, id: 7, pcifunc: 3, next_msgoff: 16 };
        let mut buf = [0u8; MboxReqHeader::WIRE_LEN];
        hdr.encode(&mut buf);
        assert_eq!(MboxReqHeader::decode(&buf).unwrap(), hdr);
    }

    #[test]
    fn process_msg_returns_body_on_success() {
        let transport = MockTransport::new_echo(0);
        let mut mbox = Mailbox::new(transport, 1);
        let rsp = mbox.process_msg(42, &[1, 2, 3, 4]).unwrap();
        assert_eq!(rsp, vec![1, 2, 3, 4]);
    }

    #[test]
    fn process_msg_surfaces_admin_error() {
        let transport = MockTransport::new_echo(-5);
        let mut mbox = Mailbox::new(transport, 1);
        let err = mbox.process_msg(42, &[]).unwrap_err();
        assert_eq!(err, RocError::AdminFunction(-5));
    }

    #[test]
    fn retrying_eventually_succeeds() {
        let transport = MockTransport::new_fail_then_succeed(
            crate::error::ADMIN_ERR_LF_START_SYNC_FAIL,
            3,
        );
        let mut mbox = Mailbox::new(transport, 1);
        let rsp = mbox.process_msg_retrying(9, &[]).unwrap();
        assert!(rsp.is_empty());
    }

    #[test]
    fn clamp_to_granted_never_exceeds() {
        let want = ResourceCounts { nix: 8, npa: 8, cpt: 4, tim: 2, sso_hwgrp: 1, sso_hws: 4 };
        let granted = ResourceCounts { nix: 2, npa: 8, cpt: 0, tim: 2, sso_hwgrp: 1, sso_hws: 1 };
        let clamped = want.clamp_to_granted(&granted);
        assert_eq!(clamped.nix, 2);
        assert_eq!(clamped.cpt, 0);
        assert_eq!(clamped.sso_hws, 1);
    }
}
