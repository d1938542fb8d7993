//! L3 NIX: packet I/O logical function (`spec.md` §2, §3).

pub mod inline_ipsec;
pub mod queue;
pub mod tm;

use crate::error::RocResult;

/// One NIX logical function per port (`spec.md` §3).
#[derive(Debug, Default)]
pub struct NixLf {
    pub base_addr: u64,
    pub mtu: u16,
    pub flow_control_enabled: bool,
    pub lso_format_indices: Vec<u8>,
    pub bpid_per_channel: Vec<u16>,
    pub rqs: Vec<queue::RqConfig>,
    pub cqs: Vec<queue::CqConfig>,
    pub sqs: Vec<queue::SqConfig>,
    pub inline_inbound: Option<InlineInboundState>,
}

/// Tracks whether inline inbound is configured for this LF
/// (`spec.md` §3 "optional inline-inbound state").
#[derive(Debug)]
pub struct InlineInboundState {
    pub sa_table: inline_ipsec::SaTableLayout,
    pub meta_aura: inline_ipsec::MetaAura,
    pub enabled: bool,
}

impl NixLf {
    pub fn new(mtu: u16) -> Self {
        Self { mtu, ..Default::default() }
    }

    pub fn register_rq(&mut self, rq: queue::RqConfig) {
        self.rqs.push(rq);
    }

    pub fn register_cq(&mut self, cq: queue::CqConfig) {
        self.cqs.push(cq);
    }

    pub fn register_sq(&mut self, sq: queue::SqConfig) {
        self.sqs.push(sq);
    }

    pub fn set_mtu(&mut self, mtu: u16) -> RocResult<()> {
        self.mtu = mtu;
        Ok(())
    }
}
