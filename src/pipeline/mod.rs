//! Shared programming contract for the eight alternative-silicon pipeline
//! modules: CAT, KM, FLM, HSH, QSL, SLC-LR, PDB, TPE (`spec.md` §4.7).
//!
//! Every module's hardware table is represented as a versioned, cache-only
//! record bank with `PRESET_ALL`/`FIND`/`COMPARE`/`COPY_FROM`/`SET`/`GET`/
//! `FLUSH` (`spec.md` §4.7, §9 "generic helpers parameterized over the
//! record type"). Grounded on `device::mlx4::cmd`'s opcode-dispatch style,
//! generalized from one fixed-layout command to a version-dispatched,
//! multi-word record.

pub mod cat;
pub mod flm;
pub mod hsh;
pub mod km;
pub mod pdb;
pub mod qsl;
pub mod slc_lr;
pub mod tpe;

use crate::error::{RocError, RocResult};

/// Sentinel meaning "the full table" when passed as `count` to `FLUSH`
/// (`spec.md` §4.7, §9 open question: must not be accidentally reachable
/// as a legitimate count).
pub const ALL_ENTRIES: i64 = -1000;

/// A fixed-width, multi-word cache row. `NUM_WORDS` bounds `word_off` for
/// [`CacheTable::get_word`]/[`CacheTable::set_word`] (`spec.md` §4.7 "Field
/// access discipline").
pub trait Record: Clone + PartialEq {
    const NUM_WORDS: usize;
    fn word(&self, word_off: usize) -> u64;
    fn set_word(&mut self, word_off: usize, value: u64);
}

/// A module's cache-only record bank plus per-row dirty tracking
/// (`spec.md` invariant 6, testable property 6).
#[derive(Debug, Clone)]
pub struct CacheTable<R: Record> {
    rows: Vec<R>,
    dirty: Vec<bool>,
}

impl<R: Record + Default> CacheTable<R> {
    pub fn new(nb_entries: usize) -> Self {
        Self { rows: vec![R::default(); nb_entries], dirty: vec![false; nb_entries] }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn check_idx(&self, idx: usize) -> RocResult<()> {
        if idx >= self.rows.len() {
            return Err(RocError::IndexTooLarge { idx: idx as u32, max: self.rows.len() as u32 });
        }
        Ok(())
    }

    /// `PRESET_ALL(idx, v)`: memset the cache row to byte `v`.
    pub fn preset_all(&mut self, idx: usize, v: u8) -> RocResult<()> {
        self.check_idx(idx)?;
        let filled = (v as u64) * 0x0101_0101_0101_0101;
        for w in 0..R::NUM_WORDS {
            self.rows[idx].set_word(w, filled);
        }
        self.dirty[idx] = true;
        Ok(())
    }

    /// `FIND(start, v)`: first index `>= start` whose row equals `v`, or
    /// `None`.
    pub fn find(&self, start: usize, v: &R) -> Option<usize> {
        (start..self.rows.len()).find(|&i| &self.rows[i] == v)
    }

    /// `COMPARE(idx, j)`: byte-compare two cache rows.
    pub fn compare(&self, idx: usize, j: usize) -> RocResult<bool> {
        self.check_idx(idx)?;
        self.check_idx(j)?;
        Ok(self.rows[idx] == self.rows[j])
    }

    /// `COPY_FROM(dst, src)`: cache-only copy.
    pub fn copy_from(&mut self, dst: usize, src: usize) -> RocResult<()> {
        self.check_idx(dst)?;
        self.check_idx(src)?;
        self.rows[dst] = self.rows[src].clone();
        self.dirty[dst] = true;
        Ok(())
    }

    /// `SET(field, idx, value)`, field-agnostic at this layer: sets a whole
    /// row and marks it dirty only if the value actually changed (property
    /// 6: writing the same value is a no-op).
    pub fn set_row(&mut self, idx: usize, row: R) -> RocResult<()> {
        self.check_idx(idx)?;
        if self.rows[idx] != row {
            self.rows[idx] = row;
            self.dirty[idx] = true;
        }
        Ok(())
    }

    pub fn get_row(&self, idx: usize) -> RocResult<&R> {
        self.check_idx(idx)?;
        Ok(&self.rows[idx])
    }

    /// Bounds-checked multi-word field read (`spec.md` §4.7).
    pub fn get_word(&self, idx: usize, word_off: usize) -> RocResult<u64> {
        self.check_idx(idx)?;
        if word_off >= R::NUM_WORDS {
            return Err(RocError::WordOffTooLarge { word_off: word_off as u32, max: R::NUM_WORDS as u32 });
        }
        Ok(self.rows[idx].word(word_off))
    }

    pub fn set_word(&mut self, idx: usize, word_off: usize, value: u64) -> RocResult<()> {
        self.check_idx(idx)?;
        if word_off >= R::NUM_WORDS {
            return Err(RocError::WordOffTooLarge { word_off: word_off as u32, max: R::NUM_WORDS as u32 });
        }
        if self.rows[idx].word(word_off) != value {
            self.rows[idx].set_word(word_off, value);
            self.dirty[idx] = true;
        }
        Ok(())
    }

    pub fn is_dirty(&self, idx: usize) -> RocResult<bool> {
        self.check_idx(idx)?;
        Ok(self.dirty[idx])
    }

    /// `FLUSH(start, count)`: commits every dirty row in
    /// `[start, start + count)` (or the whole table when `count ==
    /// ALL_ENTRIES`) via `commit`, then clears the dirty bit. Returns the
    /// number of rows actually committed.
    pub fn flush(
        &mut self,
        start: usize,
        count: i64,
        mut commit: impl FnMut(usize, &R) -> RocResult<()>,
    ) -> RocResult<usize> {
        let end = if count == ALL_ENTRIES { self.rows.len() } else { (start as i64 + count).max(0) as usize };
        let end = end.min(self.rows.len());
        let mut committed = 0;
        for idx in start..end {
            if self.dirty[idx] {
                commit(idx, &self.rows[idx])?;
                self.dirty[idx] = false;
                committed += 1;
            }
        }
        Ok(committed)
    }

    /// `BANK_RESET`: fills every row with `pattern` and marks every row
    /// dirty regardless of equality (`spec.md` §4.8).
    pub fn bank_reset(&mut self, pattern: u8) {
        let filled = (pattern as u64) * 0x0101_0101_0101_0101;
        for idx in 0..self.rows.len() {
            for w in 0..R::NUM_WORDS {
                self.rows[idx].set_word(w, filled);
            }
            self.dirty[idx] = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct TestRow([u64; 3]);

    impl Record for TestRow {
        const NUM_WORDS: usize = 3;
        fn word(&self, i: usize) -> u64 {
            self.0[i]
        }
        fn set_word(&mut self, i: usize, v: u64) {
            self.0[i] = v;
        }
    }

    #[test]
    fn s6_tcam_dirty_discipline() {
        let mut table: CacheTable<TestRow> = CacheTable::new(4);
        table.set_word(0, 1, 42).unwrap();
        assert!(table.is_dirty(0).unwrap());

        let mut writes = 0;
        table.flush(0, 1, |_, _| {
            writes += 1;
            Ok(())
        }).unwrap();
        assert_eq!(writes, 1);
        assert!(!table.is_dirty(0).unwrap());

        // Re-writing the same value is a no-op (property 6).
        table.set_word(0, 1, 42).unwrap();
        assert!(!table.is_dirty(0).unwrap());
        let mut writes2 = 0;
        table.flush(0, 1, |_, _| {
            writes2 += 1;
            Ok(())
        }).unwrap();
        assert_eq!(writes2, 0);
    }

    #[test]
    fn bank_reset_marks_every_row_dirty() {
        let mut table: CacheTable<TestRow> = CacheTable::new(4);
        table.bank_reset(0xAB);
        for i in 0..4 {
            assert!(table.is_dirty(i).unwrap());
            assert_eq!(table.get_word(i, 0).unwrap(), 0xABAB_ABAB_ABAB_ABAB);
        }
    }

    #[test]
    fn all_entries_sentinel_flushes_whole_table() {
        let mut table: CacheTable<TestRow> = CacheTable::new(5);
        table.bank_reset(1);
        let mut writes = 0;
        table.flush(0, ALL_ENTRIES, |_, _| {
            writes += 1;
            Ok(())
        }).unwrap();
        assert_eq!(writes, 5);
    }

    #[test]
    fn out_of_range_field_access_is_rejected() {
        let table: CacheTable<TestRow> = CacheTable::new(2);
        assert!(matches!(table.get_word(5, 0), Err(RocError::IndexTooLarge { .. })));
        assert!(matches!(table.get_word(0, 9), Err(RocError::WordOffTooLarge { .. })));
    }
}
