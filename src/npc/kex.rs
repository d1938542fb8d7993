//! Key-extraction (KEX) programming: per-(interface, layer-id, layer-type)
//! extractor configuration and the capability-mask predicate used by the
//! flow parser to check whether a field is extractable (`spec.md` §4.6).
//!
//! Grounded on `device::mlx4::cmd`'s per-opcode fixed-layout tables,
//! generalized to a 3-dimensional extractor table.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    Rx,
    Tx,
}

/// Layer-type: protocol header recognized at a given layer id.
pub type LayerId = u8;
pub type LayerType = u8;

/// A single extractor: copies `len` bytes starting at `hdr_offset` (relative
/// to the start of the matched layer) into the search key at `key_offset`.
#[derive(Debug, Clone, Copy)]
pub struct Extractor {
    pub hdr_offset: u8,
    pub len: u8,
    pub key_offset: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    intf: Interface,
    lid: LayerId,
    lt: LayerType,
}

/// Legacy `prx_dxcfg[intf][lid][lt]` table; the cn20k variant
/// (`prx_dxcfg_cn20k[intf][extractor][lt]`) is addressed identically from
/// software's perspective and is not modeled separately since nothing in
/// this crate depends on its physical indexing order.
#[derive(Debug, Default)]
pub struct KexConfig {
    extractors: HashMap<Key, Vec<Extractor>>,
}

impl KexConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn program(&mut self, intf: Interface, lid: LayerId, lt: LayerType, extractors: Vec<Extractor>) {
        self.extractors.insert(Key { intf, lid, lt }, extractors);
    }

    /// Bitmap of packet byte offsets (relative to the layer) copied into
    /// the key for this (intf, lid, lt).
    fn extracted_bytes(&self, intf: Interface, lid: LayerId, lt: LayerType) -> Vec<bool> {
        let mut bitmap = vec![false; 256];
        if let Some(list) = self.extractors.get(&Key { intf, lid, lt }) {
            for e in list {
                for b in e.hdr_offset..e.hdr_offset.saturating_add(e.len) {
                    bitmap[b as usize] = true;
                }
            }
        }
        bitmap
    }

    /// Is field `F` (at `field_offset`, `field_len` bytes relative to the
    /// layer) fully extractable given the current KEX configuration?
    pub fn field_extractable(
        &self,
        intf: Interface,
        lid: LayerId,
        lt: LayerType,
        field_offset: u8,
        field_len: u8,
    ) -> bool {
        let bitmap = self.extracted_bytes(intf, lid, lt);
        (field_offset..field_offset.saturating_add(field_len)).all(|b| bitmap[b as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_within_a_single_extractor_is_extractable() {
        let mut kex = KexConfig::new();
        kex.program(
            Interface::Rx,
            0,
            2,
            vec![Extractor { hdr_offset: 12, len: 4, key_offset: 0 }],
        );
        assert!(kex.field_extractable(Interface::Rx, 0, 2, 12, 4));
        assert!(kex.field_extractable(Interface::Rx, 0, 2, 14, 2));
        assert!(!kex.field_extractable(Interface::Rx, 0, 2, 14, 4));
    }

    #[test]
    fn field_spanning_two_extractors_is_extractable() {
        let mut kex = KexConfig::new();
        kex.program(
            Interface::Rx,
            0,
            2,
            vec![
                Extractor { hdr_offset: 0, len: 2, key_offset: 0 },
                Extractor { hdr_offset: 2, len: 2, key_offset: 2 },
            ],
        );
        assert!(kex.field_extractable(Interface::Rx, 0, 2, 0, 4));
    }

    #[test]
    fn unprogrammed_layer_type_extracts_nothing() {
        let kex = KexConfig::new();
        assert!(!kex.field_extractable(Interface::Rx, 0, 9, 0, 1));
    }
}
