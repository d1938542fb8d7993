//! CAT (classification-function): `CFN`/`KCE`/`KCS`/`FTE`/`CTE`/`CTS`/
//! `COT`/`CCT`/`EXO`/`RCK`/`LEN`/`KCC` tables (`spec.md` §4.7). Versioned
//! per silicon (`v18` vs `v21`): different KM-interface counts, packed vs.
//! split enable bitmaps, extra error-check fields (`spec.md` §4.7, §9
//! "tagged variant per module").

use crate::error::{RocError, RocResult};
use crate::pipeline::{CacheTable, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatVersion {
    V18,
    V21,
}

/// CFN record: protocol-layer presence bits, error bits, port, pattern-
/// matcher combine, length windows, KM/FLM OR masks (`spec.md` §4.7 table).
/// Word layout is uniform across versions; `v21`-only fields live in the
/// high words and return `UNSUP_FIELD` under `v18` (`spec.md` §4.7 "Version-
/// dependent layouts").
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CfnRow([u64; 12]);

impl Record for CfnRow {
    const NUM_WORDS: usize = 12;
    fn word(&self, i: usize) -> u64 {
        self.0[i]
    }
    fn set_word(&mut self, i: usize, v: u64) {
        self.0[i] = v;
    }
}

const W_PROTO_PRESENCE: usize = 0;
const W_ERR_BITS: usize = 1;
const W_PORT: usize = 2;
const W_PM_COMBINE: usize = 3;
const W_LEN_WINDOWS: usize = 4;
const W_KM0_OR: usize = 5;
const W_KM1_OR: usize = 6; // v21 only: second KM interface
const W_FLM_OR: usize = 7;
const W_ERR_TNL_L3_CS: usize = 8; // v21 only
const W_ERR_TNL_L4_CS: usize = 9; // v21 only
const W_ERR_TTL_EXP: usize = 10; // v21 only
const W_ERR_TNL_TTL_EXP: usize = 11; // v21 only

fn v21_only_words() -> &'static [usize] {
    &[W_KM1_OR, W_ERR_TNL_L3_CS, W_ERR_TNL_L4_CS, W_ERR_TTL_EXP, W_ERR_TNL_TTL_EXP]
}

/// The CAT module for one port (`spec.md` §4.7). `nb_cat_funcs` CFN rows,
/// version detected once at allocate time.
pub struct Cat {
    pub version: CatVersion,
    pub cfn: CacheTable<CfnRow>,
}

impl Cat {
    pub fn new(version: CatVersion, nb_cat_funcs: usize) -> Self {
        Self { version, cfn: CacheTable::new(nb_cat_funcs) }
    }

    pub fn km_interfaces(&self) -> u8 {
        match self.version {
            CatVersion::V18 => 1,
            CatVersion::V21 => 2,
        }
    }

    fn check_field_supported(&self, word_off: usize) -> RocResult<()> {
        if self.version == CatVersion::V18 && v21_only_words().contains(&word_off) {
            return Err(RocError::UnsupportedField { field: field_name(word_off), version: 18 });
        }
        Ok(())
    }

    pub fn get_field(&self, idx: usize, word_off: usize) -> RocResult<u64> {
        self.check_field_supported(word_off)?;
        self.cfn.get_word(idx, word_off)
    }

    pub fn set_field(&mut self, idx: usize, word_off: usize, value: u64) -> RocResult<()> {
        self.check_field_supported(word_off)?;
        self.cfn.set_word(idx, word_off, value)
    }

    /// CAT v18 encodes "accept both values" for narrow (1-2 bit) fields
    /// such as `ptc_isl`/`ptc_cfp` as a literal `0xFFFFFFFF` in the source.
    /// That is a field-mask convention (bit set => don't-care), not a
    /// literal value write; this helper applies the mask-and-write form so
    /// callers never reproduce the literal-write bug (`spec.md` §9 open
    /// question).
    pub fn set_dont_care_field(&mut self, idx: usize, word_off: usize, field_mask: u64) -> RocResult<()> {
        self.check_field_supported(word_off)?;
        let current = self.cfn.get_word(idx, word_off)?;
        self.cfn.set_word(idx, word_off, current | field_mask)
    }
}

fn field_name(word_off: usize) -> &'static str {
    match word_off {
        W_PROTO_PRESENCE => "proto_presence",
        W_ERR_BITS => "err_bits",
        W_PORT => "port",
        W_PM_COMBINE => "pm_combine",
        W_LEN_WINDOWS => "len_windows",
        W_KM0_OR => "km0_or",
        W_KM1_OR => "km1_or",
        W_FLM_OR => "flm_or",
        W_ERR_TNL_L3_CS => "err_tnl_l3_cs",
        W_ERR_TNL_L4_CS => "err_tnl_l4_cs",
        W_ERR_TTL_EXP => "err_ttl_exp",
        W_ERR_TNL_TTL_EXP => "err_tnl_ttl_exp",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v18_has_one_km_interface_and_rejects_v21_fields() {
        let mut cat = Cat::new(CatVersion::V18, 8);
        assert_eq!(cat.km_interfaces(), 1);
        assert!(matches!(
            cat.set_field(0, W_KM1_OR, 1),
            Err(RocError::UnsupportedField { .. })
        ));
    }

    #[test]
    fn v21_has_two_km_interfaces_and_accepts_extra_error_fields() {
        let mut cat = Cat::new(CatVersion::V21, 8);
        assert_eq!(cat.km_interfaces(), 2);
        cat.set_field(0, W_ERR_TTL_EXP, 1).unwrap();
        assert_eq!(cat.get_field(0, W_ERR_TTL_EXP).unwrap(), 1);
    }

    #[test]
    fn dont_care_field_is_a_mask_write_not_a_literal() {
        let mut cat = Cat::new(CatVersion::V18, 4);
        cat.set_field(0, W_PROTO_PRESENCE, 0b0001).unwrap();
        cat.set_dont_care_field(0, W_PROTO_PRESENCE, 0b0010).unwrap();
        assert_eq!(cat.get_field(0, W_PROTO_PRESENCE).unwrap(), 0b0011);
    }
}
