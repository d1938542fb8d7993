//! HSH (RSS hash): a single `RCP` table driving Toeplitz/XOR hashing
//! (`spec.md` §4.7).

use crate::error::RocResult;
use crate::mailbox::{Mailbox, MailboxTransport};
use crate::pipeline::{CacheTable, Record, ALL_ENTRIES};

pub const MSG_HSH_RCP_WRITE: u16 = 0x7301;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDistType {
    Toeplitz,
    SimpleXor,
    SymToeplitz,
}

/// RCP row: load-dist type, mac-port mask (4), QW/W dyn+ofs+pe, word-mask
/// (10), 10x32-bit Toeplitz key, hash-type, auto-IPv4-mask
/// (`spec.md` §4.7 table). Word 0 carries the scalar fields; words 1..11
/// carry the Toeplitz key; words 11..15 carry mac-port mask and word-mask.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HshRcp([u64; 16]);

impl Record for HshRcp {
    const NUM_WORDS: usize = 16;
    fn word(&self, i: usize) -> u64 {
        self.0[i]
    }
    fn set_word(&mut self, i: usize, v: u64) {
        self.0[i] = v;
    }
}

impl HshRcp {
    pub fn set_load_dist_type(&mut self, t: LoadDistType) {
        let code = match t {
            LoadDistType::Toeplitz => 0,
            LoadDistType::SimpleXor => 1,
            LoadDistType::SymToeplitz => 2,
        };
        self.0[0] = (self.0[0] & !0xFF) | code;
    }

    pub fn set_toeplitz_key_word(&mut self, i: usize, value: u32) {
        assert!(i < 10);
        self.0[1 + i] = value as u64;
    }

    pub fn set_auto_ipv4_mask(&mut self, enable: bool) {
        self.0[0] = (self.0[0] & !0x100) | ((enable as u64) << 8);
    }
}

pub struct Hsh {
    pub rcp: CacheTable<HshRcp>,
}

impl Hsh {
    pub fn new(nb_rcp: usize) -> Self {
        Self { rcp: CacheTable::new(nb_rcp) }
    }

    pub fn flush<T: MailboxTransport>(&mut self, mbox: &mut Mailbox<T>, start: usize, count: i64) -> RocResult<usize> {
        self.rcp.flush(start, count, |idx, row| {
            let mut body = Vec::with_capacity(4 + HshRcp::NUM_WORDS * 8);
            body.extend_from_slice(&(idx as u32).to_be_bytes());
            for w in 0..HshRcp::NUM_WORDS {
                body.extend_from_slice(&row.word(w).to_be_bytes());
            }
            mbox.process(MSG_HSH_RCP_WRITE, &body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    #[test]
    fn toeplitz_key_words_are_independently_addressable() {
        let mut rcp = HshRcp::default();
        rcp.set_toeplitz_key_word(0, 0xdead_beef);
        rcp.set_toeplitz_key_word(9, 0xcafe_babe);
        assert_eq!(rcp.0[1], 0xdead_beef);
        assert_eq!(rcp.0[10], 0xcafe_babe);
    }

    #[test]
    fn flush_commits_only_dirty_rows() {
        let mut hsh = Hsh::new(4);
        hsh.rcp.set_row(2, {
            let mut r = HshRcp::default();
            r.set_load_dist_type(LoadDistType::SymToeplitz);
            r
        }).unwrap();
        let mut mbox = Mailbox::new(MockTransport::new_echo(0), 1);
        let committed = hsh.flush(&mut mbox, 0, ALL_ENTRIES).unwrap();
        assert_eq!(committed, 1);
    }
}
