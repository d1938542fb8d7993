//! FLM (flow-lookup manager): control/status/scan, scrub (ageing) profiles,
//! priority bins, and the learn/inf/sta rings (`spec.md` §4.7, testable
//! property 5, scenario S3).
//!
//! The learn/inf/sta rings are grounded on `thingbuf`'s reserve/commit
//! slot API, matching the design note's call for "explicit reserve/commit
//! producer API and a peek/consume consumer API with lifetime tying the
//! slot pointer to the reservation" (`spec.md` §9) in place of the
//! original's pointer-tagged `rte_ring` zero-copy slots.

use thingbuf::mpsc::blocking::{channel, Receiver, Sender};

use crate::error::{RocError, RocResult};
use crate::mailbox::{Mailbox, MailboxTransport};
use crate::pipeline::{CacheTable, Record, ALL_ENTRIES};

pub const MSG_FLM_SCRUB_WRITE: u16 = 0x7201;

/// A flow-install record written by the host (`spec.md` §4.7 "Learn").
#[derive(Debug, Clone, Default)]
pub struct LearnRecord {
    pub qw0: u64,
    pub qw4: u64,
    pub sw8: u32,
    pub sw9: u32,
    pub proto: u8,
    pub kid: u32,
    pub nat: bool,
    pub teid: u32,
    pub qfi: u8,
    pub dscp: u8,
    pub scrub_profile: u8,
    pub priority: u8,
    pub eor: bool,
}

/// A flow-aging/statistics event written by hardware (`spec.md` §4.7 "Info").
#[derive(Debug, Clone, Copy, Default)]
pub struct InfoRecord {
    pub bytes: u64,
    pub packets: u64,
    pub timestamp: u64,
    pub id: u32,
    pub cause: u8,
    pub eor: bool,
}

/// A learn-completion event written by hardware (`spec.md` §4.7 "Status").
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusRecord {
    pub id: u32,
    pub done: bool,
    pub fail: bool,
    pub ignore: bool,
}

/// SPSC learn ring (testable property 7): a write-buffer reservation is
/// released exactly once into the ring, observed exactly once by the
/// consumer, in enqueue order.
pub struct LearnRing {
    tx: Sender<LearnRecord>,
    rx: Receiver<LearnRecord>,
}

impl LearnRing {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = channel(capacity);
        Self { tx, rx }
    }

    /// `get_write_buffer`: reserves a slot; dropping the guard after
    /// populating it commits the record (`release_write_buffer`).
    pub fn get_write_buffer(&self) -> RocResult<thingbuf::mpsc::blocking::SendRef<'_, LearnRecord>> {
        self.tx.try_send_ref().map_err(|_| RocError::NoSpace("flm: learn ring full"))
    }

    /// `get_read_buffer`: borrows the oldest committed record; dropping the
    /// guard releases the slot back to the pool (`release_read_buffer`).
    pub fn get_read_buffer(&self) -> Option<thingbuf::mpsc::blocking::RecvRef<'_, LearnRecord>> {
        self.rx.try_recv_ref().ok()
    }
}

/// Four (limit, flow-type) bin boundaries driving the flow-table scan rate
/// (`spec.md` §4.7 "FLM priority bins").
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityBins {
    pub bins: [(u32, u8); 4],
}

/// Scrub (ageing) profile row: 8-bit compressed timeout plus `r`/`del`/`inf`
/// control bits, packed into one word (`spec.md` §4.7 "FLM scrub").
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrubRow(u64);

impl Record for ScrubRow {
    const NUM_WORDS: usize = 1;
    fn word(&self, _i: usize) -> u64 {
        self.0
    }
    fn set_word(&mut self, _i: usize, v: u64) {
        self.0 = v;
    }
}

impl ScrubRow {
    pub fn new(t_enc: u8, r: bool, del: bool, inf: bool) -> Self {
        Self(t_enc as u64 | (r as u64) << 8 | (del as u64) << 9 | (inf as u64) << 10)
    }

    pub fn t_enc(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

pub const SCRUB_TIMEOUT_MAX_ENC: u32 = 0xEF;

/// Ported from the original `nthw_mod_flm_scrub_timeout_decode`: an 8-bit
/// float-like encoding (5-bit exponent, 3-bit mantissa), converted to
/// seconds via the fixed-point approximation of `2^30 / 10^9`
/// (`spec.md` §4.7, §8 property 5).
pub fn decode_timeout(t_enc: u32) -> u32 {
    let t_bits_2_0 = t_enc & 0x07;
    let t_bits_7_3 = (t_enc >> 3) & 0x1F;
    let t_dec: u64 = if t_bits_7_3 != 0 {
        (8u64 + t_bits_2_0 as u64) << (t_bits_7_3 - 1)
    } else {
        t_bits_2_0 as u64
    };
    let t_sec = t_dec * 1074 / 1000;
    t_sec.min(u32::MAX as u64) as u32
}

/// Finds the smallest `t_enc` such that `decode_timeout(t_enc) >= t`,
/// capped at [`SCRUB_TIMEOUT_MAX_ENC`] (`spec.md` §4.7, §9 "`count =
/// ALL_ENTRIES` sentinel" is a distinct but adjacent convention — this
/// value itself has no sentinel).
pub fn encode_timeout(t: u32) -> u32 {
    if t == 0 {
        return 0;
    }
    let mut t_enc = 0;
    loop {
        t_enc += 1;
        let t_dec = decode_timeout(t_enc);
        if t_enc > SCRUB_TIMEOUT_MAX_ENC || t_dec >= t {
            break;
        }
    }
    t_enc
}

pub struct Flm {
    pub scrub: CacheTable<ScrubRow>,
    pub prio_bins: PriorityBins,
    pub learn: LearnRing,
    pub control_enabled: bool,
}

impl Flm {
    pub fn new(nb_scrub_profiles: usize, learn_ring_capacity: usize) -> Self {
        Self {
            scrub: CacheTable::new(nb_scrub_profiles),
            prio_bins: PriorityBins::default(),
            learn: LearnRing::new(learn_ring_capacity),
            control_enabled: false,
        }
    }

    /// `flm_scrub_flush`: `count == ALL_ENTRIES` means "the full
    /// `nb_scrub_profiles` range" — not a literal passable count
    /// (`spec.md` §9 open question).
    pub fn flush_scrub<T: MailboxTransport>(
        &mut self,
        mbox: &mut Mailbox<T>,
        start: usize,
        count: i64,
    ) -> RocResult<usize> {
        if count != ALL_ENTRIES && count < 0 {
            return Err(RocError::Param("flm: negative scrub flush count"));
        }
        self.scrub.flush(start, count, |idx, row| {
            let mut body = Vec::with_capacity(12);
            body.extend_from_slice(&(idx as u32).to_be_bytes());
            body.extend_from_slice(&row.0.to_be_bytes());
            mbox.process(MSG_FLM_SCRUB_WRITE, &body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockTransport;

    #[test]
    fn s3_scrub_timeout_boundaries() {
        assert_eq!(encode_timeout(0), 0);
        assert_eq!(encode_timeout(137 * 365 * 24 * 3600), SCRUB_TIMEOUT_MAX_ENC);
    }

    #[test]
    fn property_5_round_trip_lower_bound_and_monotonicity() {
        let mut prev_enc = 0;
        for s in [1u32, 5, 30, 60, 3600, 86_400, 1_000_000] {
            let enc = encode_timeout(s);
            assert!(enc >= prev_enc, "encode must be monotone non-decreasing");
            assert!(decode_timeout(enc) >= s, "decode(encode(s)) must be >= s");
            prev_enc = enc;
        }
    }

    #[test]
    fn learn_ring_spsc_preserves_order() {
        let ring = LearnRing::new(4);
        {
            let mut slot = ring.get_write_buffer().unwrap();
            slot.qw0 = 1;
        }
        {
            let mut slot = ring.get_write_buffer().unwrap();
            slot.qw0 = 2;
        }
        let first = ring.get_read_buffer().unwrap();
        assert_eq!(first.qw0, 1);
        drop(first);
        let second = ring.get_read_buffer().unwrap();
        assert_eq!(second.qw0, 2);
    }

    #[test]
    fn all_entries_sentinel_flushes_whole_scrub_table() {
        let mut flm = Flm::new(4, 4);
        flm.scrub.bank_reset(0);
        let mut mbox = Mailbox::new(MockTransport::new_echo(0), 1);
        let committed = flm.flush_scrub(&mut mbox, 0, ALL_ENTRIES).unwrap();
        assert_eq!(committed, 4);
    }
}
