//! L2 NPA: buffer-pool manager.
//!
//! Manages a fixed-size set of auras backed by pools of equal-sized
//! buffers (`spec.md` §4.2). Grounded on `device::mlx4::icm`'s
//! `init_icm_table`/offset-tracking style (a software-tracked table with a
//! reserved prefix and bump allocation) generalized to per-aura IOVA range
//! tracking and a free bitmap.

use crate::error::{RocError, RocResult};
use crate::mailbox::{Mailbox, MailboxTransport};

/// `log2(n) - 6` encoding of the pool count, rounded to a power of two in
/// `[128, 2^20]` (`spec.md` §4.2).
pub fn encode_max_pools(requested: u32) -> RocResult<u8> {
    let clamped = requested.clamp(128, 1 << 20);
    let pow2 = clamped.next_power_of_two();
    let log2 = pow2.trailing_zeros();
    Ok((log2 - 6) as u8)
}

pub fn decode_max_pools(encoded: u8) -> u32 {
    1u32 << (encoded as u32 + 6)
}

/// Per-aura software-tracked bounds, used to catch out-of-range frees
/// (`spec.md` §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IovaRange {
    pub start: u64,
    pub end: u64,
}

impl IovaRange {
    pub fn contains(&self, iova: u64) -> bool {
        iova >= self.start && iova < self.end
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackpressureConfig {
    pub bpid: u16,
    pub enabled: bool,
}

/// A buffer pool aura (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct Aura {
    pub id: u32,
    pub pool_id: u32,
    pub limit: u64,
    pub available: u64,
    pub iova_range: IovaRange,
    pub backpressure: BackpressureConfig,
    pub fill_count_addr: u64,
}

impl Aura {
    pub fn set_range(&mut self, range: IovaRange) {
        self.iova_range = range;
    }

    pub fn check_free(&self, iova: u64) -> RocResult<()> {
        if !self.iova_range.contains(iova) {
            return Err(RocError::Param("npa: free of out-of-range IOVA"));
        }
        Ok(())
    }
}

/// Aura/pool lifecycle manager. Owns a bitmap of free aura ids within the
/// `max_pools` range negotiated at attach time.
pub struct NpaLf {
    max_pools: u32,
    free_bitmap: Vec<bool>,
    auras: Vec<Option<Aura>>,
}

impl NpaLf {
    pub fn new(max_pools_requested: u32) -> RocResult<Self> {
        let encoded = encode_max_pools(max_pools_requested)?;
        let max_pools = decode_max_pools(encoded);
        Ok(Self {
            max_pools,
            free_bitmap: vec![true; max_pools as usize],
            auras: (0..max_pools).map(|_| None).collect(),
        })
    }

    pub fn max_pools(&self) -> u32 {
        self.max_pools
    }

    /// `pool_create`: allocates an aura id and returns the handle.
    pub fn pool_create(&mut self, pool_id: u32, limit: u64) -> RocResult<u32> {
        let id = self
            .free_bitmap
            .iter()
            .position(|&free| free)
            .ok_or(RocError::NoSpace("npa: no free aura ids"))? as u32;
        self.free_bitmap[id as usize] = false;
        self.auras[id as usize] = Some(Aura {
            id,
            pool_id,
            limit,
            available: limit,
            iova_range: IovaRange { start: 0, end: 0 },
            backpressure: BackpressureConfig { bpid: 0, enabled: false },
            fill_count_addr: 0,
        });
        Ok(id)
    }

    pub fn pool_destroy(&mut self, aura_id: u32) -> RocResult<()> {
        let slot = self
            .auras
            .get_mut(aura_id as usize)
            .ok_or(RocError::Param("npa: bad aura id"))?;
        if slot.take().is_none() {
            return Err(RocError::Param("npa: aura not allocated"));
        }
        self.free_bitmap[aura_id as usize] = true;
        Ok(())
    }

    pub fn aura(&self, id: u32) -> RocResult<&Aura> {
        self.auras
            .get(id as usize)
            .and_then(|a| a.as_ref())
            .ok_or(RocError::Param("npa: bad aura id"))
    }

    pub fn aura_mut(&mut self, id: u32) -> RocResult<&mut Aura> {
        self.auras
            .get_mut(id as usize)
            .and_then(|a| a.as_mut())
            .ok_or(RocError::Param("npa: bad aura id"))
    }

    pub fn range_set(&mut self, id: u32, range: IovaRange) -> RocResult<()> {
        self.aura_mut(id)?.set_range(range);
        Ok(())
    }

    pub fn range_get(&self, id: u32) -> RocResult<IovaRange> {
        Ok(self.aura(id)?.iova_range)
    }

    pub fn limit(&self, id: u32) -> RocResult<u64> {
        Ok(self.aura(id)?.limit)
    }

    pub fn available(&self, id: u32) -> RocResult<u64> {
        Ok(self.aura(id)?.available)
    }

    /// Lock-free-in-spirit alloc/free of buffers is an LMT-driven hardware
    /// fast path (`spec.md` §5); this software model only tracks the
    /// available counter consistently with that fast path's semantics.
    pub fn alloc_buf(&mut self, id: u32) -> RocResult<()> {
        let aura = self.aura_mut(id)?;
        if aura.available == 0 {
            return Err(RocError::NoSpace("npa: aura exhausted"));
        }
        aura.available -= 1;
        Ok(())
    }

    pub fn free_buf(&mut self, id: u32, iova: u64) -> RocResult<()> {
        let aura = self.aura_mut(id)?;
        aura.check_free(iova)?;
        aura.available += 1;
        Ok(())
    }

    /// Enables backpressure on the aura, mapping it to a channel BPID
    /// (`spec.md` §4.2).
    pub fn backpressure_enable<T: MailboxTransport>(
        &mut self,
        mbox: &mut Mailbox<T>,
        id: u32,
        bpid: u16,
    ) -> RocResult<()> {
        let aura = self.aura_mut(id)?;
        aura.backpressure = BackpressureConfig { bpid, enabled: true };
        mbox.process(MSG_NPA_AURA_BP_CFG, &bpid.to_be_bytes())
    }
}

pub const MSG_NPA_AURA_BP_CFG: u16 = 0x2001;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_pools_rounds_to_power_of_two_in_range() {
        assert_eq!(decode_max_pools(encode_max_pools(100).unwrap()), 128);
        assert_eq!(decode_max_pools(encode_max_pools(129).unwrap()), 256);
        assert_eq!(decode_max_pools(encode_max_pools(1 << 25).unwrap()), 1 << 20);
    }

    #[test]
    fn pool_create_destroy_round_trips() {
        let mut npa = NpaLf::new(128).unwrap();
        let id = npa.pool_create(0, 1024).unwrap();
        assert_eq!(npa.limit(id).unwrap(), 1024);
        npa.pool_destroy(id).unwrap();
        assert!(npa.aura(id).is_err());
    }

    #[test]
    fn free_outside_iova_range_is_rejected() {
        let mut npa = NpaLf::new(128).unwrap();
        let id = npa.pool_create(0, 8).unwrap();
        npa.range_set(id, IovaRange { start: 0x1000, end: 0x2000 }).unwrap();
        assert!(npa.free_buf(id, 0x500).is_err());
        assert!(npa.free_buf(id, 0x1500).is_ok());
    }

    #[test]
    fn alloc_exhausts_available_count() {
        let mut npa = NpaLf::new(128).unwrap();
        let id = npa.pool_create(0, 2).unwrap();
        npa.alloc_buf(id).unwrap();
        npa.alloc_buf(id).unwrap();
        assert!(npa.alloc_buf(id).is_err());
    }
}
