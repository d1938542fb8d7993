//! PDCP reorder buffer (auxiliary, `spec.md` §4.10): a sequence-number-
//! indexed FIFO that releases mbufs only once their predecessors have
//! arrived or the reorder window has advanced past them.
//!
//! Grounded on `device::mlx4::queue_pair`'s ring-index bookkeeping
//! (wraparound arithmetic over a fixed-size slot array), applied to a
//! reorder window instead of a completion queue.

use crate::error::{RocError, RocResult};

/// A reorder slot; `None` until the matching sequence number arrives.
#[derive(Debug, Clone, Default)]
struct Slot<M> {
    mbuf: Option<M>,
}

/// `create(window)` / `destroy` / `start(min_seqn)` / `stop` /
/// `insert(mbuf, seqn)` / `drain_sequential` / `drain_up_to_seqn`
/// (`spec.md` §4.10).
pub struct ReorderBuffer<M> {
    window: u32,
    slots: Vec<Slot<M>>,
    min_seqn: u32,
    started: bool,
}

impl<M> ReorderBuffer<M> {
    /// `create(window)`.
    pub fn create(window: u32) -> Self {
        Self { window, slots: (0..window).map(|_| Slot::default()).collect(), min_seqn: 0, started: false }
    }

    /// `start(min_seqn)`: the buffer becomes ready to accept `insert`.
    pub fn start(&mut self, min_seqn: u32) {
        self.min_seqn = min_seqn;
        self.started = true;
    }

    /// `stop`: drains everything that can be drained and stops accepting
    /// further inserts.
    pub fn stop(&mut self) -> Vec<M> {
        self.started = false;
        self.slots.iter_mut().filter_map(|s| s.mbuf.take()).collect()
    }

    fn slot_index(&self, seqn: u32) -> usize {
        (seqn.wrapping_sub(self.min_seqn) % self.window) as usize
    }

    /// `insert(mbuf, seqn)`: rejects sequence numbers outside the current
    /// window.
    pub fn insert(&mut self, mbuf: M, seqn: u32) -> RocResult<()> {
        if !self.started {
            return Err(RocError::Param("pdcp: reorder buffer not started"));
        }
        let distance = seqn.wrapping_sub(self.min_seqn);
        if distance >= self.window {
            return Err(RocError::Param("pdcp: sequence number outside reorder window"));
        }
        let idx = self.slot_index(seqn);
        self.slots[idx].mbuf = Some(mbuf);
        Ok(())
    }

    /// `drain_sequential`: releases every mbuf starting at `min_seqn` while
    /// consecutive slots are filled, advancing `min_seqn` past each one
    /// released.
    pub fn drain_sequential(&mut self) -> Vec<M> {
        let mut drained = Vec::new();
        loop {
            let idx = self.slot_index(self.min_seqn);
            match self.slots[idx].mbuf.take() {
                Some(m) => {
                    drained.push(m);
                    self.min_seqn = self.min_seqn.wrapping_add(1);
                }
                None => break,
            }
        }
        drained
    }

    /// `drain_up_to_seqn`: force-releases every slot with `seqn <
    /// up_to_seqn`, in order, regardless of gaps (used when the window
    /// must advance past a stalled sequence number).
    pub fn drain_up_to_seqn(&mut self, up_to_seqn: u32) -> Vec<M> {
        let mut drained = Vec::new();
        while self.min_seqn != up_to_seqn {
            let idx = self.slot_index(self.min_seqn);
            if let Some(m) = self.slots[idx].mbuf.take() {
                drained.push(m);
            }
            self.min_seqn = self.min_seqn.wrapping_add(1);
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_sequential_stops_at_first_gap() {
        let mut rb: ReorderBuffer<u32> = ReorderBuffer::create(8);
        rb.start(0);
        rb.insert(100, 0).unwrap();
        rb.insert(101, 1).unwrap();
        rb.insert(103, 3).unwrap();
        let drained = rb.drain_sequential();
        assert_eq!(drained, vec![100, 101]);
    }

    #[test]
    fn insert_outside_window_is_rejected() {
        let mut rb: ReorderBuffer<u32> = ReorderBuffer::create(4);
        rb.start(0);
        assert!(rb.insert(1, 10).is_err());
    }

    #[test]
    fn drain_up_to_seqn_skips_gaps() {
        let mut rb: ReorderBuffer<u32> = ReorderBuffer::create(8);
        rb.start(0);
        rb.insert(100, 0).unwrap();
        rb.insert(103, 3).unwrap();
        let drained = rb.drain_up_to_seqn(4);
        assert_eq!(drained, vec![100, 103]);
    }

    #[test]
    fn stop_releases_everything_remaining() {
        let mut rb: ReorderBuffer<u32> = ReorderBuffer::create(4);
        rb.start(0);
        rb.insert(1, 2).unwrap();
        let mut remaining = rb.stop();
        remaining.sort_unstable();
        assert_eq!(remaining, vec![1]);
        assert!(rb.insert(2, 0).is_err());
    }
}
