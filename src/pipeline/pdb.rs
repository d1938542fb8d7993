//! PDB (packet-descriptor builder): `RCP`, `config` (`spec.md` §4.7).

use crate::error::RocResult;
use crate::mailbox::{Mailbox, MailboxTransport};
use crate::pipeline::{CacheTable, Record, ALL_ENTRIES};

pub const MSG_PDB_RCP_WRITE: u16 = 0x7601;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsFormat {
    None,
    Native,
    Ptp,
}

/// RCP row: descriptor type, descriptor length, TX port/ignore/now, CRC
/// overwrite, alignment, three ofs dyn+rel, TS format (`spec.md` §4.7
/// table).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PdbRcp([u64; 6]);

impl Record for PdbRcp {
    const NUM_WORDS: usize = 6;
    fn word(&self, i: usize) -> u64 {
        self.0[i]
    }
    fn set_word(&mut self, i: usize, v: u64) {
        self.0[i] = v;
    }
}

impl PdbRcp {
    pub fn set_descriptor(&mut self, desc_type: u8, desc_len: u8) {
        self.0[0] = desc_type as u64 | (desc_len as u64) << 8;
    }

    pub fn set_tx_flags(&mut self, tx_port: u16, tx_ignore: bool, tx_now: bool) {
        self.0[1] = tx_port as u64 | (tx_ignore as u64) << 16 | (tx_now as u64) << 17;
    }

    pub fn set_ts_format(&mut self, fmt: TsFormat) {
        let code = match fmt {
            TsFormat::None => 0,
            TsFormat::Native => 1,
            TsFormat::Ptp => 2,
        };
        self.0[2] = code;
    }

    pub fn set_ofs(&mut self, which: usize, dyn_off: u8, rel_off: i16) {
        assert!(which < 3);
        self.0[3 + which] = (dyn_off as u64) << 16 | (rel_off as u16 as u64);
    }
}

pub struct Pdb {
    pub rcp: CacheTable<PdbRcp>,
}

impl Pdb {
    pub fn new(nb_rcp: usize) -> Self {
        Self { rcp: CacheTable::new(nb_rcp) }
    }

    pub fn flush<T: MailboxTransport>(&mut self, mbox: &mut Mailbox<T>, start: usize, count: i64) -> RocResult<usize> {
        self.rcp.flush(start, count, |idx, row| {
            let mut body = Vec::with_capacity(4 + PdbRcp::NUM_WORDS * 8);
            body.extend_from_slice(&(idx as u32).to_be_bytes());
            for w in 0..PdbRcp::NUM_WORDS {
                body.extend_from_slice(&row.word(w).to_be_bytes());
            }
            mbox.process(MSG_PDB_RCP_WRITE, &body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    #[test]
    fn descriptor_fields_pack_into_one_word() {
        let mut rcp = PdbRcp::default();
        rcp.set_descriptor(2, 16);
        assert_eq!(rcp.0[0], 2 | (16 << 8));
    }

    #[test]
    fn flush_commits_dirty_rows_only() {
        let mut pdb = Pdb::new(3);
        pdb.rcp.set_row(0, { let mut r = PdbRcp::default(); r.set_ts_format(TsFormat::Ptp); r }).unwrap();
        let mut mbox = Mailbox::new(MockTransport::new_echo(0), 1);
        assert_eq!(pdb.flush(&mut mbox, 0, ALL_ENTRIES).unwrap(), 1);
    }
}
