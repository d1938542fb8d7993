//! L4 flow-rule engine (`spec.md` §4.6, §6): translates pattern/action
//! rules into coordinated MCAM + side-table writes.

pub mod flow;
pub mod kcc;
pub mod kex;
pub mod mcam;

use std::collections::HashMap;

use crate::error::{RocError, RocResult};
use crate::mailbox::{Mailbox, MailboxTransport};

pub use flow::{ActionType, Flow, FlowAttr, ItemType, OwnerKind};
pub use mcam::{McamPool, Priority, ShiftRequest};

/// The flow engine's top-level handle (`roc_npc`, `spec.md` §6 `init`).
/// Owns the MCAM pool and the set of live rules keyed by MCAM id.
pub struct Npc {
    pub mcam: McamPool,
    pub kex: kex::KexConfig,
    pub kcc: kcc::KccCache,
    flows: HashMap<u32, Flow>,
}

/// `init(roc_npc)`: allocates the MCAM pool for the given capacity and a
/// default KEX/KCC configuration (`spec.md` §6).
pub fn init(mcam_capacity: u32, kcc_banks: usize, kcc_bank_width: usize) -> Npc {
    Npc {
        mcam: McamPool::new(mcam_capacity),
        kex: kex::KexConfig::new(),
        kcc: kcc::KccCache::new(kcc_banks, kcc_bank_width),
        flows: HashMap::new(),
    }
}

/// `fini(roc_npc)`: tears down every remaining rule in reverse-allocation
/// order (`spec.md` §3 "Teardown is exact reverse order").
pub fn fini<T: MailboxTransport>(npc: &mut Npc, mbox: &mut Mailbox<T>) -> RocResult<()> {
    let mut ids: Vec<u32> = npc.flows.keys().copied().collect();
    ids.sort_unstable_by(|a, b| b.cmp(a));
    for id in ids {
        let flow = npc.flows.remove(&id).unwrap();
        flow::flow_destroy(mbox, &mut npc.mcam, flow)?;
    }
    Ok(())
}

/// `flow_create(attr, pattern[], actions[]) -> flow|err` (`spec.md` §6).
pub fn flow_create<T: MailboxTransport>(
    npc: &mut Npc,
    mbox: &mut Mailbox<T>,
    attr: &FlowAttr,
    pattern: &[ItemType],
    actions: &[ActionType],
    pf_func: u16,
    port: u16,
) -> RocResult<u32> {
    let flow = flow::flow_create(mbox, &mut npc.mcam, attr, pattern, actions, pf_func, port)?;
    let id = flow.mcam_id;
    npc.flows.insert(id, flow);
    Ok(id)
}

/// `flow_destroy(flow)` (`spec.md` §6).
pub fn flow_destroy<T: MailboxTransport>(npc: &mut Npc, mbox: &mut Mailbox<T>, mcam_id: u32) -> RocResult<()> {
    let flow = npc.flows.remove(&mcam_id).ok_or(RocError::Param("npc: unknown flow"))?;
    flow::flow_destroy(mbox, &mut npc.mcam, flow)
}

pub fn mcam_read_counter(npc: &Npc, mcam_id: u32, counters: &HashMap<u32, u64>) -> RocResult<u64> {
    let flow = npc.flows.get(&mcam_id).ok_or(RocError::Param("npc: unknown flow"))?;
    let counter_id = flow.counter_id.ok_or(RocError::Param("npc: flow has no counter"))?;
    Ok(counters.get(&counter_id).copied().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    #[test]
    fn init_fini_tears_down_remaining_flows() {
        let mut npc = init(64, 2, 8);
        let mut mbox = Mailbox::new(MockTransport::new_counter_echo(), 1);
        let attr = FlowAttr { ingress: true, egress: false, priority: 1 };
        let pattern = [ItemType::Eth, ItemType::End];
        let actions = [ActionType::Queue(0)];
        flow_create(&mut npc, &mut mbox, &attr, &pattern, &actions, 0, 0).unwrap();
        assert_eq!(npc.flows.len(), 1);
        fini(&mut npc, &mut mbox).unwrap();
        assert!(npc.flows.is_empty());
    }

    #[test]
    fn flow_destroy_rejects_unknown_id() {
        let mut npc = init(16, 1, 4);
        let mut mbox = Mailbox::new(MockTransport::new_counter_echo(), 1);
        assert!(flow_destroy(&mut npc, &mut mbox, 99).is_err());
    }
}
