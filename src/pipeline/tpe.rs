//! TPE (transmit packet editor): insert, replace, copy, header-fixup, and
//! checksum sub-tables (`spec.md` §4.7). The largest of the eight pipeline
//! modules; every sub-table follows the same cache/dirty/flush discipline
//! as the others via [`CacheTable`].

use crate::error::RocResult;
use crate::mailbox::{Mailbox, MailboxTransport};
use crate::pipeline::{CacheTable, Record, ALL_ENTRIES};

pub const MSG_TPE_INS_WRITE: u16 = 0x7701;
pub const MSG_TPE_RPL_WRITE: u16 = 0x7702;
pub const MSG_TPE_CPY_WRITE: u16 = 0x7703;
pub const MSG_TPE_HFU_WRITE: u16 = 0x7704;
pub const MSG_TPE_CSU_WRITE: u16 = 0x7705;

/// `RPP_RCP`/`RPP_IFR_RCP`/`IFR_RCP`: reassembly-profile and ingress
/// fragmentation-reassembly recipes, modeled as a single scalar word each
/// since the pipeline contract only requires cache/flush parity, not a
/// bit-exact register layout (`spec.md` §1 non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScalarRow(u64);

impl Record for ScalarRow {
    const NUM_WORDS: usize = 1;
    fn word(&self, _i: usize) -> u64 {
        self.0
    }
    fn set_word(&mut self, _i: usize, v: u64) {
        self.0 = v;
    }
}

/// `IFR_COUNTERS`: per-profile fragmentation/reassembly statistics. Not
/// cache-committed (it is a hardware-owned readback table), so it is a
/// plain array rather than a [`CacheTable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IfrCounters {
    pub fragments_in: u64,
    pub fragments_out: u64,
    pub reassembled: u64,
    pub drops: u64,
}

/// `INS_RCP`: insert dyn+ofs+len.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InsRcp {
    pub dyn_off: u8,
    pub ofs: i16,
    pub len: u16,
}

impl Record for InsRcp {
    const NUM_WORDS: usize = 1;
    fn word(&self, _i: usize) -> u64 {
        self.dyn_off as u64 | (self.ofs as u16 as u64) << 8 | (self.len as u64) << 24
    }
    fn set_word(&mut self, _i: usize, v: u64) {
        self.dyn_off = (v & 0xFF) as u8;
        self.ofs = ((v >> 8) & 0xFFFF) as u16 as i16;
        self.len = ((v >> 24) & 0xFFFF) as u16;
    }
}

/// `RPL_RCP`: replace dyn+ofs+len+ptr+eth-type-wr.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RplRcp {
    pub dyn_off: u8,
    pub ofs: i16,
    pub len: u16,
    pub ptr: u16,
    pub eth_type_wr: bool,
}

impl Record for RplRcp {
    const NUM_WORDS: usize = 1;
    fn word(&self, _i: usize) -> u64 {
        self.dyn_off as u64
            | (self.ofs as u16 as u64) << 8
            | (self.len as u64) << 24
            | (self.ptr as u64) << 40
            | (self.eth_type_wr as u64) << 56
    }
    fn set_word(&mut self, _i: usize, v: u64) {
        self.dyn_off = (v & 0xFF) as u8;
        self.ofs = ((v >> 8) & 0xFFFF) as u16 as i16;
        self.len = ((v >> 24) & 0xFFFF) as u16;
        self.ptr = ((v >> 40) & 0xFFFF) as u16;
        self.eth_type_wr = (v >> 56) & 1 != 0;
    }
}

/// `RPL_EXT`/`RPL_RPL`: replacement-data extension pointer and payload
/// bytes, stored as opaque blobs committed verbatim.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RplData(pub Vec<u8>);

/// `CPY_RCP`: copy dyn+ofs+len, indexed by (writer, category) — modeled as
/// `writers` independent [`CacheTable`]s, one per writer, each with
/// `categories` rows.
pub struct CpyRcp {
    pub writers: Vec<CacheTable<InsRcp>>,
}

impl CpyRcp {
    pub fn new(writers: usize, categories: usize) -> Self {
        Self { writers: (0..writers).map(|_| CacheTable::new(categories)).collect() }
    }
}

/// `HFU_RCP`: header-fixup length/TTL write positions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HfuRcp {
    pub len_a_wr: bool,
    pub len_a_pos: u8,
    pub ttl_wr: bool,
    pub ttl_pos: u8,
}

impl Record for HfuRcp {
    const NUM_WORDS: usize = 1;
    fn word(&self, _i: usize) -> u64 {
        self.len_a_wr as u64 | (self.len_a_pos as u64) << 1 | (self.ttl_wr as u64) << 9 | (self.ttl_pos as u64) << 10
    }
    fn set_word(&mut self, _i: usize, v: u64) {
        self.len_a_wr = v & 1 != 0;
        self.len_a_pos = ((v >> 1) & 0xFF) as u8;
        self.ttl_wr = (v >> 9) & 1 != 0;
        self.ttl_pos = ((v >> 10) & 0xFF) as u8;
    }
}

/// `CSU_RCP`: checksum command per L3/L4, inner/outer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CsuRcp {
    pub l3_outer: bool,
    pub l3_inner: bool,
    pub l4_outer: bool,
    pub l4_inner: bool,
}

impl Record for CsuRcp {
    const NUM_WORDS: usize = 1;
    fn word(&self, _i: usize) -> u64 {
        self.l3_outer as u64 | (self.l3_inner as u64) << 1 | (self.l4_outer as u64) << 2 | (self.l4_inner as u64) << 3
    }
    fn set_word(&mut self, _i: usize, v: u64) {
        self.l3_outer = v & 1 != 0;
        self.l3_inner = (v >> 1) & 1 != 0;
        self.l4_outer = (v >> 2) & 1 != 0;
        self.l4_inner = (v >> 3) & 1 != 0;
    }
}

pub struct Tpe {
    pub rpp_rcp: CacheTable<ScalarRow>,
    pub rpp_ifr_rcp: CacheTable<ScalarRow>,
    pub ifr_rcp: CacheTable<ScalarRow>,
    pub ifr_counters: Vec<IfrCounters>,
    pub ins_rcp: CacheTable<InsRcp>,
    pub rpl_rcp: CacheTable<RplRcp>,
    pub rpl_ext: Vec<RplData>,
    pub rpl_rpl: Vec<RplData>,
    pub cpy_rcp: CpyRcp,
    pub hfu_rcp: CacheTable<HfuRcp>,
    pub csu_rcp: CacheTable<CsuRcp>,
}

impl Tpe {
    pub fn new(nb_profiles: usize, nb_cpy_writers: usize, nb_cpy_categories: usize) -> Self {
        Self {
            rpp_rcp: CacheTable::new(nb_profiles),
            rpp_ifr_rcp: CacheTable::new(nb_profiles),
            ifr_rcp: CacheTable::new(nb_profiles),
            ifr_counters: vec![IfrCounters::default(); nb_profiles],
            ins_rcp: CacheTable::new(nb_profiles),
            rpl_rcp: CacheTable::new(nb_profiles),
            rpl_ext: vec![RplData::default(); nb_profiles],
            rpl_rpl: vec![RplData::default(); nb_profiles],
            cpy_rcp: CpyRcp::new(nb_cpy_writers, nb_cpy_categories),
            hfu_rcp: CacheTable::new(nb_profiles),
            csu_rcp: CacheTable::new(nb_profiles),
        }
    }

    pub fn flush_ins<T: MailboxTransport>(&mut self, mbox: &mut Mailbox<T>, start: usize, count: i64) -> RocResult<usize> {
        self.ins_rcp.flush(start, count, |idx, row| {
            let mut body = Vec::with_capacity(12);
            body.extend_from_slice(&(idx as u32).to_be_bytes());
            body.extend_from_slice(&row.word(0).to_be_bytes());
            mbox.process(MSG_TPE_INS_WRITE, &body)
        })
    }

    pub fn flush_rpl<T: MailboxTransport>(&mut self, mbox: &mut Mailbox<T>, start: usize, count: i64) -> RocResult<usize> {
        self.rpl_rcp.flush(start, count, |idx, row| {
            let mut body = Vec::with_capacity(12);
            body.extend_from_slice(&(idx as u32).to_be_bytes());
            body.extend_from_slice(&row.word(0).to_be_bytes());
            mbox.process(MSG_TPE_RPL_WRITE, &body)
        })
    }

    pub fn flush_cpy<T: MailboxTransport>(&mut self, mbox: &mut Mailbox<T>, writer: usize, start: usize, count: i64) -> RocResult<usize> {
        self.cpy_rcp.writers[writer].flush(start, count, |idx, row| {
            let mut body = Vec::with_capacity(16);
            body.extend_from_slice(&(writer as u32).to_be_bytes());
            body.extend_from_slice(&(idx as u32).to_be_bytes());
            body.extend_from_slice(&row.word(0).to_be_bytes());
            mbox.process(MSG_TPE_CPY_WRITE, &body)
        })
    }

    pub fn flush_hfu<T: MailboxTransport>(&mut self, mbox: &mut Mailbox<T>, start: usize, count: i64) -> RocResult<usize> {
        self.hfu_rcp.flush(start, count, |idx, row| {
            let mut body = Vec::with_capacity(12);
            body.extend_from_slice(&(idx as u32).to_be_bytes());
            body.extend_from_slice(&row.word(0).to_be_bytes());
            mbox.process(MSG_TPE_HFU_WRITE, &body)
        })
    }

    pub fn flush_csu<T: MailboxTransport>(&mut self, mbox: &mut Mailbox<T>, start: usize, count: i64) -> RocResult<usize> {
        self.csu_rcp.flush(start, count, |idx, row| {
            let mut body = Vec::with_capacity(12);
            body.extend_from_slice(&(idx as u32).to_be_bytes());
            body.extend_from_slice(&row.word(0).to_be_bytes());
            mbox.process(MSG_TPE_CSU_WRITE, &body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    #[test]
    fn ins_rcp_word_packing_round_trips() {
        let row = InsRcp { dyn_off: 2, ofs: -8, len: 20 };
        let mut back = InsRcp::default();
        back.set_word(0, row.word(0));
        assert_eq!(back, row);
    }

    #[test]
    fn cpy_rcp_addresses_writer_and_category_independently() {
        let mut tpe = Tpe::new(4, 2, 8);
        tpe.cpy_rcp.writers[1].set_row(3, InsRcp { dyn_off: 1, ofs: 0, len: 4 }).unwrap();
        assert_eq!(tpe.cpy_rcp.writers[0].get_row(3).unwrap(), &InsRcp::default());
        assert_eq!(tpe.cpy_rcp.writers[1].get_row(3).unwrap().len, 4);
    }

    #[test]
    fn flush_hfu_commits_only_dirty_rows() {
        let mut tpe = Tpe::new(4, 1, 1);
        tpe.hfu_rcp.set_row(0, HfuRcp { len_a_wr: true, len_a_pos: 2, ttl_wr: true, ttl_pos: 8 }).unwrap();
        let mut mbox = Mailbox::new(MockTransport::new_echo(0), 1);
        assert_eq!(tpe.flush_hfu(&mut mbox, 0, ALL_ENTRIES).unwrap(), 1);
        assert_eq!(tpe.flush_hfu(&mut mbox, 0, ALL_ENTRIES).unwrap(), 0);
    }
}
