//! Traffic manager hierarchy and SQ flush sequence (`spec.md` §4.5).
//!
//! Grounded on `device::mlx4::queue_pair`'s state-machine style (a small
//! set of legal transitions enforced before a command is issued) and
//! `platform::poll_until` for the deadline-bounded spin.

use crate::error::{RocError, RocResult};
use crate::platform::{poll_until, Clock};

pub const MAX_WEIGHT: u16 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmLevel {
    Tl1,
    Tl2,
    Tl3,
    Tl4,
    Mdq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootPolicy {
    /// TL1-root, used for PFs.
    Tl1Root,
    /// TL2-root, used for VFs.
    Tl2Root,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedKind {
    RoundRobin,
    StrictPriority(u8),
}

#[derive(Debug, Clone)]
pub struct TmNode {
    pub id: u32,
    pub level: TmLevel,
    pub parent: Option<u32>,
    pub weight: u16,
    pub kind: SchedKind,
    pub shaper_profile: Option<u32>,
    pub children: Vec<u32>,
    pub children_dirty: bool,
}

impl TmNode {
    pub fn new(id: u32, level: TmLevel, parent: Option<u32>, weight: u16, kind: SchedKind) -> Self {
        Self {
            id,
            level,
            parent,
            // `weight ∈ [1, MAX_WEIGHT]`, defaulted to 1 when zero (`spec.md` §4.5).
            weight: if weight == 0 { 1 } else { weight.min(MAX_WEIGHT) },
            kind,
            shaper_profile: None,
            children: Vec::new(),
            children_dirty: false,
        }
    }
}

/// The TM hierarchy for one port. A parent may have at most one
/// round-robin group plus strict-priority children with no holes in the
/// priority sequence (`spec.md` §4.5).
#[derive(Debug, Default)]
pub struct TmTree {
    nodes: std::collections::HashMap<u32, TmNode>,
    root_policy: Option<RootPolicy>,
    tl1_no_sp: bool,
}

impl TmTree {
    pub fn new(root_policy: RootPolicy, has_vfs: bool) -> Self {
        Self {
            nodes: std::collections::HashMap::new(),
            root_policy: Some(root_policy),
            // "Strict-priority at TL1 is unavailable when the device has
            // VFs" (`spec.md` §4.5).
            tl1_no_sp: has_vfs,
        }
    }

    pub fn add_node(&mut self, node: TmNode) -> RocResult<()> {
        if node.level == TmLevel::Tl1 && self.tl1_no_sp {
            if let SchedKind::StrictPriority(_) = node.kind {
                return Err(RocError::Param("tm: strict priority unavailable at TL1 with VFs present"));
            }
        }
        if let Some(parent_id) = node.parent {
            let existing_children: Vec<u32> = self
                .nodes
                .get(&parent_id)
                .ok_or(RocError::Param("tm: unknown parent"))?
                .children
                .clone();
            self.validate_sibling_ordering(&existing_children, &node)?;
            self.nodes.get_mut(&parent_id).unwrap().children.push(node.id);
            self.nodes.get_mut(&parent_id).unwrap().children_dirty = true;
        }
        self.nodes.insert(node.id, node);
        Ok(())
    }

    fn validate_sibling_ordering(&self, siblings: &[u32], incoming: &TmNode) -> RocResult<()> {
        let mut rr_seen = false;
        let mut prios: Vec<u8> = Vec::new();
        for &sib_id in siblings {
            match self.nodes[&sib_id].kind {
                SchedKind::RoundRobin => rr_seen = true,
                SchedKind::StrictPriority(p) => prios.push(p),
            }
        }
        match incoming.kind {
            SchedKind::RoundRobin if rr_seen => {
                return Err(RocError::Param("tm: parent already has a round-robin group"))
            }
            SchedKind::StrictPriority(p) => {
                prios.push(p);
                prios.sort_unstable();
                // Holes in the priority sequence are rejected (`PRIO_ORDER`).
                for w in prios.windows(2) {
                    if w[1] != w[0] && w[1] != w[0] + 1 {
                        return Err(RocError::Param("tm: priority order has a hole (PRIO_ORDER)"));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Pkt-mode update is legal only when the leaf has no children
    /// (`spec.md` §4.5).
    pub fn update_pkt_mode(&mut self, id: u32) -> RocResult<()> {
        let node = self.nodes.get(&id).ok_or(RocError::Param("tm: unknown node"))?;
        if !node.children.is_empty() {
            return Err(RocError::Param("tm: pkt-mode update requires a childless leaf"));
        }
        Ok(())
    }

    /// Delete is legal only when the node is childless; releases the
    /// shaper-profile reference.
    pub fn delete_node(&mut self, id: u32) -> RocResult<()> {
        let node = self.nodes.get(&id).ok_or(RocError::Param("tm: unknown node"))?;
        if !node.children.is_empty() {
            return Err(RocError::Param("tm: cannot delete a node with children"));
        }
        let parent = node.parent;
        self.nodes.remove(&id);
        if let Some(parent_id) = parent {
            if let Some(p) = self.nodes.get_mut(&parent_id) {
                p.children.retain(|&c| c != id);
                p.children_dirty = true;
            }
        }
        Ok(())
    }

    pub fn node(&self, id: u32) -> Option<&TmNode> {
        self.nodes.get(&id)
    }
}

/// SQ-flush status observed by the poll loop (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct SqStatus {
    pub sqb_cnt: u32,
    pub head_off: u32,
    pub tail_off: u32,
    pub fc_memory: u32,
}

impl SqStatus {
    fn quiescent(&self, nb_sqb_bufs: u32) -> bool {
        self.sqb_cnt <= 1 && self.head_off == self.tail_off && self.fc_memory == nb_sqb_bufs
    }
}

/// Computes the poll deadline in 10 µs ticks:
/// `nb_sq · max_mtu · 8 · 10^5 / min_rate` (`spec.md` §4.5).
pub fn flush_deadline_ticks(nb_sq: u32, max_mtu: u32, min_rate_bps: u64) -> u64 {
    if min_rate_bps == 0 {
        return u64::MAX;
    }
    (u64::from(nb_sq) * u64::from(max_mtu) * 8 * 100_000) / min_rate_bps
}

/// SQ flush sequence (pre-destroy), `spec.md` §4.5. `siblings` are the
/// other SQs sharing the same SMQ.
pub fn sq_flush_pre(
    clock: &dyn Clock,
    nb_sq: u32,
    max_mtu: u32,
    min_rate_bps: u64,
    nb_sqb_bufs: u32,
    mut cgx_rx_tx_was_disabled: bool,
    mut enable_cgx_rx_tx: impl FnMut(),
    mut disable_smq_xoff: impl FnMut(),
    mut pause_sibling_auras: impl FnMut(),
    mut read_sq_status: impl FnMut() -> SqStatus,
    mut enable_smq_xoff: impl FnMut(),
    mut restore_cgx: impl FnMut(bool),
) -> RocResult<()> {
    if cgx_rx_tx_was_disabled {
        enable_cgx_rx_tx();
    }
    disable_smq_xoff();
    pause_sibling_auras();

    let deadline_ticks = flush_deadline_ticks(nb_sq, max_mtu, min_rate_bps);
    let deadline_nanos = deadline_ticks.saturating_mul(10_000);
    let result = poll_until(clock, deadline_nanos, || read_sq_status().quiescent(nb_sqb_bufs));

    enable_smq_xoff();
    restore_cgx(cgx_rx_tx_was_disabled);
    cgx_rx_tx_was_disabled = false;
    let _ = cgx_rx_tx_was_disabled;
    result
}

/// SQ flush sequence (post-destroy): re-enable siblings.
pub fn sq_flush_post(mut resume_sibling_auras: impl FnMut()) {
    resume_sibling_auras();
}
