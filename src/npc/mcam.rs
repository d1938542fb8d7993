//! MCAM entry pool allocator with priority-zone ordering and shifting
//! (`spec.md` §4.6, §8 property 1, scenarios S1/S2).
//!
//! Grounded on `device::mlx4::icm`'s offset-bump allocators generalized
//! into a bitmap-backed pool, with the "shift requests" primitive the spec
//! calls for modeled as a single recursive "make room" step per entry.

use std::collections::BTreeMap;

use crate::error::{RocError, RocResult};

pub type Priority = u8;

/// A single-entry `curr_entry -> new_entry` move, exactly as the spec
/// describes the admin-function shift primitive (`spec.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftRequest {
    pub curr_entry: u32,
    pub new_entry: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Zone {
    min: u32,
    max_exclusive: u32,
    count: u32,
}

impl Zone {
    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// MCAM entry pool. Tracks, per priority level, the occupied indices via an
/// ownership array plus the free-forward/free-reverse/live bitmaps the
/// spec describes (folded here into the ownership array and per-zone
/// bounds, which are equivalent in information content and cheaper to keep
/// consistent in software).
pub struct McamPool {
    capacity: u32,
    owner: Vec<Option<Priority>>,
    zones: BTreeMap<Priority, Zone>,
}

impl McamPool {
    pub fn new(capacity: u32) -> Self {
        Self { capacity, owner: vec![None; capacity as usize], zones: BTreeMap::new() }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn is_allocated(&self, index: u32) -> bool {
        self.owner.get(index as usize).map(|o| o.is_some()).unwrap_or(false)
    }

    pub fn zone(&self, priority: Priority) -> Option<(u32, u32)> {
        self.zones.get(&priority).filter(|z| !z.is_empty()).map(|z| (z.min, z.max_exclusive))
    }

    /// Property 1: for any two priorities `p < q`, `max_index(p) <
    /// min_index(q)` once both zones are non-empty.
    pub fn zones_ordered(&self) -> bool {
        let mut prev_max: Option<u32> = None;
        for (_, z) in self.zones.iter() {
            if z.is_empty() {
                continue;
            }
            if let Some(pm) = prev_max {
                if pm >= z.min {
                    return false;
                }
            }
            prev_max = Some(z.max_exclusive);
        }
        true
    }

    fn next_lower_zone(&self, priority: Priority) -> Option<(Priority, Zone)> {
        self.zones
            .range(..priority)
            .rev()
            .find(|(_, z)| !z.is_empty())
            .map(|(&p, &z)| (p, z))
    }

    fn next_higher_zone(&self, priority: Priority) -> Option<(Priority, Zone)> {
        self.zones
            .range(priority + 1..)
            .find(|(_, z)| !z.is_empty())
            .map(|(&p, &z)| (p, z))
    }

    /// Moves the occupant of `index` to the first free slot at or above
    /// `search_from`, recursing to free that slot first if necessary.
    /// Returns the chain of shifts performed, in application order.
    fn make_room_at(&mut self, index: u32, shifts: &mut Vec<ShiftRequest>) -> RocResult<()> {
        if index >= self.capacity {
            return Err(RocError::NoSpace("mcam: no room to shift zone upward"));
        }
        if !self.is_allocated(index) {
            return Ok(());
        }
        let owner_priority = self.owner[index as usize].unwrap();
        let zone = *self.zones.get(&owner_priority).unwrap();
        let target = zone.max_exclusive;
        if target >= self.capacity {
            return Err(RocError::NoSpace("mcam: no room to shift zone upward"));
        }
        self.make_room_at(target, shifts)?;

        self.owner[index as usize] = None;
        self.owner[target as usize] = Some(owner_priority);
        let z = self.zones.get_mut(&owner_priority).unwrap();
        z.min += 1;
        z.max_exclusive += 1;
        shifts.push(ShiftRequest { curr_entry: index, new_entry: target });
        Ok(())
    }

    /// Allocates a single entry at `priority`, shifting neighboring zones
    /// as needed to preserve zone ordering (`spec.md` invariant 1).
    /// Returns the allocated index and the shift requests issued.
    pub fn alloc_entry(&mut self, priority: Priority) -> RocResult<(u32, Vec<ShiftRequest>)> {
        let mut shifts = Vec::new();
        let zone = self.zones.entry(priority).or_default();
        if !zone.is_empty() {
            // Compact fill within the existing zone first.
            let (min, max) = (zone.min, zone.max_exclusive);
            if let Some(free) = (min..max).find(|&i| !self.is_allocated(i)) {
                self.owner[free as usize] = Some(priority);
                self.zones.get_mut(&priority).unwrap().count += 1;
                return Ok((free, shifts));
            }
            // Zone full: grow at the top, shifting the next-higher zone out
            // of the way if it currently occupies `max`.
            if max >= self.capacity {
                return Err(RocError::NoSpace("mcam: pool exhausted"));
            }
            self.make_room_at(max, &mut shifts)?;
            self.owner[max as usize] = Some(priority);
            let z = self.zones.get_mut(&priority).unwrap();
            z.max_exclusive += 1;
            z.count += 1;
            return Ok((max, shifts));
        }

        // First entry at this priority level: anchor the new zone against
        // whichever neighboring zone already exists.
        let target = match self.next_higher_zone(priority) {
            Some((_, higher)) => higher.min,
            None => match self.next_lower_zone(priority) {
                Some((_, lower)) => lower.max_exclusive,
                None => 0,
            },
        };
        if target >= self.capacity {
            return Err(RocError::NoSpace("mcam: pool exhausted"));
        }
        self.make_room_at(target, &mut shifts)?;
        self.owner[target as usize] = Some(priority);
        self.zones.insert(priority, Zone { min: target, max_exclusive: target + 1, count: 1 });
        Ok((target, shifts))
    }

    pub fn free_entry(&mut self, index: u32) -> RocResult<()> {
        let priority = self
            .owner
            .get(index as usize)
            .and_then(|o| *o)
            .ok_or(RocError::Param("mcam: entry not allocated"))?;
        self.owner[index as usize] = None;
        let zone = self.zones.get_mut(&priority).unwrap();
        zone.count -= 1;
        if zone.count == 0 {
            self.zones.remove(&priority);
        } else {
            // Recompute bounds; the zone may have shrunk at an edge.
            let (min, max) = (
                (0..self.capacity).find(|&i| self.owner[i as usize] == Some(priority)).unwrap(),
                (0..self.capacity).rev().find(|&i| self.owner[i as usize] == Some(priority)).unwrap() + 1,
            );
            let zone = self.zones.get_mut(&priority).unwrap();
            zone.min = min;
            zone.max_exclusive = max;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_single_priority_allocation() {
        let mut pool = McamPool::new(64);
        let (idx, shifts) = pool.alloc_entry(1).unwrap();
        assert!(shifts.is_empty());
        assert_eq!(pool.zone(1), Some((idx, idx + 1)));
        pool.free_entry(idx).unwrap();
        assert_eq!(pool.zone(1), None);
    }

    #[test]
    fn s2_priority_shift_scenario() {
        let mut pool = McamPool::new(64);
        // Seed priority-2 zone at [10, 20).
        for i in 10..20u32 {
            pool.owner[i as usize] = Some(2);
        }
        pool.zones.insert(2, Zone { min: 10, max_exclusive: 20, count: 10 });

        let (idx, shifts) = pool.alloc_entry(1).unwrap();
        assert_eq!(idx, 10);
        assert_eq!(shifts, vec![ShiftRequest { curr_entry: 10, new_entry: 20 }]);
        assert_eq!(pool.zone(1), Some((10, 11)));
        assert_eq!(pool.zone(2), Some((11, 21)));
        assert!(pool.zones_ordered());
    }

    #[test]
    fn zone_ordering_holds_under_many_allocations() {
        let mut pool = McamPool::new(256);
        for _ in 0..20 {
            pool.alloc_entry(3).unwrap();
        }
        for _ in 0..20 {
            pool.alloc_entry(1).unwrap();
        }
        for _ in 0..20 {
            pool.alloc_entry(2).unwrap();
        }
        assert!(pool.zones_ordered());
        let (p1_min, p1_max) = pool.zone(1).unwrap();
        let (p2_min, p2_max) = pool.zone(2).unwrap();
        let (p3_min, p3_max) = pool.zone(3).unwrap();
        assert!(p1_max <= p2_min);
        assert!(p2_max <= p3_min);
        let _ = p3_max;
    }

    #[test]
    fn free_nonexistent_entry_errors() {
        let mut pool = McamPool::new(16);
        assert!(pool.free_entry(3).is_err());
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let mut pool = McamPool::new(2);
        pool.alloc_entry(1).unwrap();
        pool.alloc_entry(1).unwrap();
        assert!(pool.alloc_entry(1).is_err());
    }
}
