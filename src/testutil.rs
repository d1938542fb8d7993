//! In-memory mailbox transport for tests (`SPEC_FULL.md` §A.4). Lets
//! control-plane logic be exercised without real hardware or a real admin
//! function.

use crate::error::RocResult;
use crate::mailbox::{MboxReqHeader, MboxRspHeader, MailboxTransport, MBOX_RSP_SIG};

/// Echoes the request body back as the response body, with a fixed `rc`.
pub struct MockTransport {
    rc_sequence: Vec<i32>,
}

impl MockTransport {
    pub fn new_echo(rc: i32) -> Self {
        Self { rc_sequence: vec![rc] }
    }

    /// Fails with `rc` for `failures` attempts, then succeeds with `rc = 0`.
    pub fn new_fail_then_succeed(rc: i32, failures: u32) -> Self {
        let mut seq = vec![rc; failures as usize];
        seq.push(0);
        Self { rc_sequence: seq }
    }
}

impl MailboxTransport for MockTransport {
    fn transact(&mut self, request: &[u8]) -> RocResult<Vec<u8>> {
        let req_header = MboxReqHeader::decode(request)?;
        let body = &request[MboxReqHeader::WIRE_LEN..];
        let rc = if self.rc_sequence.len() > 1 {
            self.rc_sequence.remove(0)
        } else {
            self.rc_sequence[0]
        };
        let rsp_header = MboxRspHeader { sig: MBOX_RSP_SIG, id: req_header.id, rc };
        let mut out = vec![0u8; MboxRspHeader::WIRE_LEN + body.len()];
        rsp_header.encode(&mut out[..MboxRspHeader::WIRE_LEN]);
        if rc == 0 {
            out[MboxRspHeader::WIRE_LEN..].copy_from_slice(body);
        }
        Ok(out)
    }
}

/// Succeeds on every request; `MSG_NPC_MCAM_ALLOC_COUNTER` gets a
/// monotonically-increasing 4-byte counter id in reply, everything else
/// echoes its request body back. Used to exercise NPC flow-lifecycle tests
/// that allocate a counter as part of rule creation.
pub struct CounterEchoTransport {
    next_counter_id: u32,
}

impl MailboxTransport for CounterEchoTransport {
    fn transact(&mut self, request: &[u8]) -> RocResult<Vec<u8>> {
        let req_header = MboxReqHeader::decode(request)?;
        let body = &request[MboxReqHeader::WIRE_LEN..];
        let rsp_header = MboxRspHeader { sig: MBOX_RSP_SIG, id: req_header.id, rc: 0 };
        let rsp_body: Vec<u8> = if req_header.id == crate::npc::flow::MSG_NPC_MCAM_ALLOC_COUNTER {
            let id = self.next_counter_id;
            self.next_counter_id += 1;
            id.to_be_bytes().to_vec()
        } else {
            body.to_vec()
        };
        let mut out = vec![0u8; MboxRspHeader::WIRE_LEN + rsp_body.len()];
        rsp_header.encode(&mut out[..MboxRspHeader::WIRE_LEN]);
        out[MboxRspHeader::WIRE_LEN..].copy_from_slice(&rsp_body);
        Ok(out)
    }
}

impl MockTransport {
    pub fn new_counter_echo() -> CounterEchoTransport {
        CounterEchoTransport { next_counter_id: 1 }
    }
}
