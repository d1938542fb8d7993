//! KCC (key-class cache): a CAM-shaped table translating port+key to a
//! category, used by CAT (`spec.md` §4.9). Auxiliary to the main flow
//! engine; freed at driver fini.

use crate::error::{RocError, RocResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KccEntry {
    pub port: u16,
    pub key: u64,
    pub category: u16,
    pub valid: bool,
}

/// `kcc_size` entries organized as `kcc_banks` banks, mirroring the bank
/// split the other pipeline TCAM tables use (`spec.md` §4.8-adjacent).
pub struct KccCache {
    banks: Vec<Vec<KccEntry>>,
    bank_width: usize,
}

impl KccCache {
    pub fn new(kcc_banks: usize, bank_width: usize) -> Self {
        Self { banks: vec![vec![KccEntry::default(); bank_width]; kcc_banks], bank_width }
    }

    pub fn size(&self) -> usize {
        self.banks.len() * self.bank_width
    }

    fn locate(&self, idx: usize) -> RocResult<(usize, usize)> {
        if idx >= self.size() {
            return Err(RocError::IndexTooLarge { idx: idx as u32, max: self.size() as u32 });
        }
        Ok((idx / self.bank_width, idx % self.bank_width))
    }

    pub fn insert(&mut self, idx: usize, port: u16, key: u64, category: u16) -> RocResult<()> {
        let (bank, off) = self.locate(idx)?;
        self.banks[bank][off] = KccEntry { port, key, category, valid: true };
        Ok(())
    }

    pub fn lookup(&self, port: u16, key: u64) -> Option<u16> {
        self.banks
            .iter()
            .flatten()
            .find(|e| e.valid && e.port == port && e.key == key)
            .map(|e| e.category)
    }

    pub fn free(&mut self, idx: usize) -> RocResult<()> {
        let (bank, off) = self.locate(idx)?;
        self.banks[bank][off] = KccEntry::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup_round_trip() {
        let mut kcc = KccCache::new(2, 8);
        kcc.insert(3, 1, 0xdead_beef, 7).unwrap();
        assert_eq!(kcc.lookup(1, 0xdead_beef), Some(7));
        assert_eq!(kcc.lookup(1, 0xbeef_dead), None);
    }

    #[test]
    fn free_clears_entry() {
        let mut kcc = KccCache::new(1, 4);
        kcc.insert(0, 1, 42, 5).unwrap();
        kcc.free(0).unwrap();
        assert_eq!(kcc.lookup(1, 42), None);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut kcc = KccCache::new(1, 4);
        assert!(kcc.insert(4, 0, 0, 0).is_err());
    }
}
