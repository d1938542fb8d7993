//! Flow rule lifecycle: pattern/action parsing, action-word encoding, VF
//! base-rule merging, and counter lifecycle (`spec.md` §4.6, §6, §8 S1).
//!
//! Grounded on `device::mlx4::cmd`'s request-assembly style (fixed-width
//! fields packed into a byte buffer) applied to the 256-bit MCAM key/mask
//! words, with `mailbox::Mailbox` as the commit path.

use crate::error::{RocError, RocResult};
use crate::mailbox::{Mailbox, MailboxTransport};
use crate::npc::mcam::{McamPool, Priority};

pub const MSG_NPC_MCAM_WRITE_ENTRY: u16 = 0x6001;
pub const MSG_NPC_MCAM_ENA_DIS_ENTRY: u16 = 0x6002;
pub const MSG_NPC_MCAM_ALLOC_COUNTER: u16 = 0x6003;
pub const MSG_NPC_MCAM_CLEAR_COUNTER: u16 = 0x6004;
pub const MSG_NPC_MCAM_FREE_COUNTER: u16 = 0x6005;

/// Flow rule attributes (`spec.md` §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowAttr {
    pub ingress: bool,
    pub egress: bool,
    pub priority: Priority,
}

/// Pattern item types (`spec.md` §6). Only the fields the flow engine
/// itself interprets are modeled; opaque byte payloads are carried as-is.
#[derive(Debug, Clone)]
pub enum ItemType {
    Eth,
    Vlan,
    QinQ,
    Mpls,
    Ipv4 { src: Option<[u8; 4]>, dst: Option<[u8; 4]> },
    Ipv6,
    Arp,
    Icmp,
    Icmpv6,
    Igmp,
    Tcp { src_port: Option<u16>, dst_port: Option<u16> },
    Udp { src_port: Option<u16>, dst_port: Option<u16> },
    Sctp,
    Esp,
    Gre { key: Option<u32> },
    Nvgre,
    Vxlan,
    VxlanGpe,
    GtpC,
    GtpU,
    Geneve,
    Higig2,
    CptHeader,
    CustomL3,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RssAlgo {
    Toeplitz,
    SimpleXor,
    SymToeplitz,
}

#[derive(Debug, Clone)]
pub enum ActionType {
    Mark(u32),
    Flag,
    Drop,
    Queue(u16),
    Rss { algo: RssAlgo, queues: Vec<u16> },
    Dup(u16),
    Sec,
    Count,
    Pf,
    Vf(u16),
}

/// Owning-LF kind, used to decide VF base-rule merging (`spec.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    Pf,
    Vf { pf_func: u16 },
}

/// Encoded MCAM entry: 7x64-bit key words, 7x64-bit mask words, action
/// word, VTAG action, priority, counter (`spec.md` §3 "Flow rule").
#[derive(Debug, Clone, Default)]
pub struct McamEntryData {
    pub key: [u64; 7],
    pub mask: [u64; 7],
    pub action: u64,
    pub vtag_action: u32,
    pub priority: Priority,
    pub mcast_group: Option<u32>,
}

/// RX action-word encoding: 4-bit op, 16-bit pf-func, 20-bit index, 16-bit
/// match id, 5-bit flowkey-alg (`spec.md` §4.6).
pub fn encode_rx_action(op: u8, pf_func: u16, index: u32, match_id: u16, flowkey_alg: u8) -> u64 {
    debug_assert!(op < 0x10 && index < (1 << 20) && flowkey_alg < 0x20);
    (op as u64 & 0xF)
        | ((pf_func as u64) << 4)
        | ((index as u64 & 0xFFFFF) << 20)
        | ((match_id as u64) << 40)
        | ((flowkey_alg as u64 & 0x1F) << 56)
}

/// TX action-word encoding: 4-bit op, 20-bit index, 16-bit match id.
pub fn encode_tx_action(op: u8, index: u32, match_id: u16) -> u64 {
    debug_assert!(op < 0x10 && index < (1 << 20));
    (op as u64 & 0xF) | ((index as u64 & 0xFFFFF) << 4) | ((match_id as u64) << 24)
}

pub const ACTION_OP_UCAST: u8 = 1;
pub const ACTION_OP_RSS: u8 = 2;
pub const ACTION_OP_DROP: u8 = 3;
pub const ACTION_OP_MCAST: u8 = 4;

/// A live flow rule (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct Flow {
    pub mcam_id: u32,
    pub priority: Priority,
    pub counter_id: Option<u32>,
    pub enabled: bool,
    pub data: McamEntryData,
    pub port: u16,
}

/// First-pass rules accept both `ETHER` and `CPT_HDR` as LA-type (mask
/// covers both bits); second-pass rules require `CPT_HDR` exactly
/// (`spec.md` §4.6).
const LA_TYPE_ETHER: u64 = 0b01;
const LA_TYPE_CPT_HDR: u64 = 0b10;

fn la_type_key_mask(second_pass: bool) -> (u64, u64) {
    if second_pass {
        (LA_TYPE_CPT_HDR, LA_TYPE_CPT_HDR)
    } else {
        (LA_TYPE_ETHER, LA_TYPE_ETHER | LA_TYPE_CPT_HDR)
    }
}

/// Validates a pattern/action list without committing (`flow_parse`,
/// `spec.md` §6). Rejects a pattern that isn't terminated with `End`, and
/// an action list with no terminal disposition.
pub fn flow_parse(pattern: &[ItemType], actions: &[ActionType]) -> RocResult<()> {
    if !matches!(pattern.last(), Some(ItemType::End)) {
        return Err(RocError::Param("npc: pattern must be terminated with End"));
    }
    let has_disposition = actions.iter().any(|a| {
        matches!(
            a,
            ActionType::Queue(_) | ActionType::Drop | ActionType::Rss { .. } | ActionType::Dup(_)
        )
    });
    if !has_disposition {
        return Err(RocError::Param("npc: action list has no packet disposition"));
    }
    Ok(())
}

/// Composes the MCAM entry data for a rule, without allocating hardware
/// resources. `inline_channel` overrides the channel (first 12 bits of key
/// word 0) when the rule targets inline-inbound RX (`spec.md` §4.6).
pub fn compose_entry(
    attr: &FlowAttr,
    pattern: &[ItemType],
    actions: &[ActionType],
    pf_func: u16,
    inline_channel: Option<(u16, u16)>,
    second_pass: bool,
) -> RocResult<McamEntryData> {
    flow_parse(pattern, actions)?;

    let mut data = McamEntryData { priority: attr.priority, ..Default::default() };

    let (la_key, la_mask) = la_type_key_mask(second_pass);
    data.key[0] |= la_key;
    data.mask[0] |= la_mask;

    if let Some((channel, channel_mask)) = inline_channel {
        data.key[0] = (data.key[0] & !0xFFF) | (channel as u64 & 0xFFF);
        data.mask[0] = (data.mask[0] & !0xFFF) | (channel_mask as u64 & 0xFFF);
    }

    for item in pattern {
        if let ItemType::Ipv4 { src, dst } = item {
            if let Some(addr) = src {
                data.key[1] |= u32::from_be_bytes(*addr) as u64;
                data.mask[1] |= u32::MAX as u64;
            }
            if let Some(addr) = dst {
                data.key[1] |= (u32::from_be_bytes(*addr) as u64) << 32;
                data.mask[1] |= (u32::MAX as u64) << 32;
            }
        }
    }

    let mut counter_requested = false;
    for action in actions {
        match action {
            ActionType::Queue(q) => {
                data.action = encode_rx_action(ACTION_OP_UCAST, pf_func, *q as u32, 0, 0);
            }
            ActionType::Drop => {
                data.action = encode_rx_action(ACTION_OP_DROP, pf_func, 0, 0, 0);
            }
            ActionType::Rss { queues, .. } => {
                data.action =
                    encode_rx_action(ACTION_OP_RSS, pf_func, queues.len() as u32, 0, 0);
            }
            ActionType::Dup(group) => {
                data.mcast_group = Some(*group as u32);
                data.action = encode_rx_action(ACTION_OP_MCAST, pf_func, *group as u32, 0, 0);
            }
            ActionType::Count => counter_requested = true,
            _ => {}
        }
    }
    let _ = counter_requested;
    Ok(data)
}

/// VF base-rule merging (`spec.md` §4.6): when the owning LF is a VF and
/// the rule is ingress and not inline, OR the VF's base MCAM rule's
/// key+mask into the software-composed entry so the VF never matches
/// another LF's traffic.
pub fn merge_vf_base_rule(entry: &mut McamEntryData, owner: OwnerKind, is_ingress: bool, is_inline: bool, vf_base: &McamEntryData) {
    if matches!(owner, OwnerKind::Vf { .. }) && is_ingress && !is_inline {
        for i in 0..7 {
            entry.key[i] |= vf_base.key[i];
            entry.mask[i] |= vf_base.mask[i];
        }
    }
}

/// `flow_create`: allocates an MCAM entry (and optional counter), commits
/// the entry via mailbox, and returns the live [`Flow`] (`spec.md` §6, S1).
pub fn flow_create<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    pool: &mut McamPool,
    attr: &FlowAttr,
    pattern: &[ItemType],
    actions: &[ActionType],
    pf_func: u16,
    port: u16,
) -> RocResult<Flow> {
    let data = compose_entry(attr, pattern, actions, pf_func, None, false)?;

    let (mcam_id, _shifts) = pool.alloc_entry(attr.priority).map_err(|e| {
        // Unwind: nothing else was allocated yet, so no further cleanup is
        // needed, but the error propagates unchanged (`spec.md` §7).
        e
    })?;

    let wants_counter = actions.iter().any(|a| matches!(a, ActionType::Count));
    let counter_id = if wants_counter {
        match alloc_counter(mbox) {
            Ok(id) => Some(id),
            Err(e) => {
                let _ = pool.free_entry(mcam_id);
                return Err(e);
            }
        }
    } else {
        None
    };

    if let Err(e) = write_entry(mbox, mcam_id, &data) {
        if let Some(id) = counter_id {
            let _ = free_counter(mbox, id);
        }
        let _ = pool.free_entry(mcam_id);
        return Err(e);
    }

    if let Err(e) = ena_dis_entry(mbox, mcam_id, true) {
        if let Some(id) = counter_id {
            let _ = free_counter(mbox, id);
        }
        let _ = pool.free_entry(mcam_id);
        return Err(e);
    }

    Ok(Flow { mcam_id, priority: attr.priority, counter_id, enabled: true, data, port })
}

/// `flow_destroy`: disable, free the MCAM slot, free the counter if any
/// (`spec.md` §3 lifecycle, §7 "never leaves a partially-programmed MCAM
/// entry behind").
pub fn flow_destroy<T: MailboxTransport>(
    mbox: &mut Mailbox<T>,
    pool: &mut McamPool,
    flow: Flow,
) -> RocResult<()> {
    ena_dis_entry(mbox, flow.mcam_id, false)?;
    if let Some(id) = flow.counter_id {
        free_counter(mbox, id)?;
    }
    pool.free_entry(flow.mcam_id)
}

pub fn write_entry<T: MailboxTransport>(mbox: &mut Mailbox<T>, mcam_id: u32, data: &McamEntryData) -> RocResult<()> {
    let mut body = Vec::with_capacity(4 + 7 * 8 + 7 * 8 + 8 + 4);
    body.extend_from_slice(&mcam_id.to_be_bytes());
    for w in data.key {
        body.extend_from_slice(&w.to_be_bytes());
    }
    for w in data.mask {
        body.extend_from_slice(&w.to_be_bytes());
    }
    body.extend_from_slice(&data.action.to_be_bytes());
    body.extend_from_slice(&data.vtag_action.to_be_bytes());
    mbox.process(MSG_NPC_MCAM_WRITE_ENTRY, &body)
}

pub fn ena_dis_entry<T: MailboxTransport>(mbox: &mut Mailbox<T>, mcam_id: u32, enable: bool) -> RocResult<()> {
    let mut body = Vec::with_capacity(5);
    body.extend_from_slice(&mcam_id.to_be_bytes());
    body.push(enable as u8);
    mbox.process(MSG_NPC_MCAM_ENA_DIS_ENTRY, &body)
}

/// Counter id is `None` unless explicitly allocated (`spec.md` invariant 7).
pub fn alloc_counter<T: MailboxTransport>(mbox: &mut Mailbox<T>) -> RocResult<u32> {
    let rsp = mbox.process_msg(MSG_NPC_MCAM_ALLOC_COUNTER, &[])?;
    if rsp.len() < 4 {
        return Err(RocError::MboxIo { msg_id: MSG_NPC_MCAM_ALLOC_COUNTER });
    }
    let id = u32::from_be_bytes([rsp[0], rsp[1], rsp[2], rsp[3]]);
    clear_counter(mbox, id)?;
    Ok(id)
}

pub fn clear_counter<T: MailboxTransport>(mbox: &mut Mailbox<T>, counter_id: u32) -> RocResult<()> {
    mbox.process(MSG_NPC_MCAM_CLEAR_COUNTER, &counter_id.to_be_bytes())
}

pub fn free_counter<T: MailboxTransport>(mbox: &mut Mailbox<T>, counter_id: u32) -> RocResult<()> {
    mbox.process(MSG_NPC_MCAM_FREE_COUNTER, &counter_id.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    #[test]
    fn flow_parse_requires_end_terminator() {
        let err = flow_parse(&[ItemType::Eth], &[ActionType::Drop]).unwrap_err();
        assert!(matches!(err, RocError::Param(_)));
    }

    #[test]
    fn flow_parse_requires_a_disposition() {
        let pattern = [ItemType::Eth, ItemType::End];
        let err = flow_parse(&pattern, &[ActionType::Count]).unwrap_err();
        assert!(matches!(err, RocError::Param(_)));
    }

    #[test]
    fn rx_action_word_encoding_matches_bitfield_layout() {
        let word = encode_rx_action(ACTION_OP_UCAST, 0x1234, 3, 0, 0);
        assert_eq!(word & 0xF, ACTION_OP_UCAST as u64);
        assert_eq!((word >> 4) & 0xFFFF, 0x1234);
        assert_eq!((word >> 20) & 0xFFFFF, 3);
    }

    #[test]
    fn s1_flow_create_destroy_with_counter() {
        let mut mbox = Mailbox::new(MockTransport::new_counter_echo(), 1);
        let mut pool = McamPool::new(64);
        let attr = FlowAttr { ingress: true, egress: false, priority: 1 };
        let pattern = [
            ItemType::Eth,
            ItemType::Ipv4 { src: Some([10, 0, 0, 1]), dst: None },
            ItemType::End,
        ];
        let actions = [ActionType::Queue(3), ActionType::Count];

        let flow = flow_create(&mut mbox, &mut pool, &attr, &pattern, &actions, 0xAA, 0).unwrap();
        assert_eq!(pool.zone(1), Some((flow.mcam_id, flow.mcam_id + 1)));
        assert!(flow.counter_id.is_some());
        assert!(flow.enabled);
        let op = flow.data.action & 0xF;
        assert_eq!(op, ACTION_OP_UCAST as u64);

        let mcam_id = flow.mcam_id;
        flow_destroy(&mut mbox, &mut pool, flow).unwrap();
        assert_eq!(pool.zone(1), None);
        let _ = mcam_id;
    }

    #[test]
    fn vf_base_rule_merges_only_for_ingress_non_inline_vf() {
        let mut entry = McamEntryData::default();
        let vf_base = McamEntryData { key: [0xFF; 7], mask: [0xFF; 7], ..Default::default() };
        merge_vf_base_rule(&mut entry, OwnerKind::Vf { pf_func: 1 }, true, false, &vf_base);
        assert_eq!(entry.key[0] & 0xFF, 0xFF);

        let mut entry2 = McamEntryData::default();
        merge_vf_base_rule(&mut entry2, OwnerKind::Pf, true, false, &vf_base);
        assert_eq!(entry2.key[0], 0);
    }
}
