//! Compact on-disk form of a raw index.
//!
//! Layout, in order:
//!
//! ```text
//!     ========================================
//!     |                Header                |
//!     ========================================
//!     |               Symbols                |
//!     ========================================
//!     |             Occurrences              |
//!     ========================================
//!     |              Relations               |
//!     ========================================
//!     |                Ranges                |
//!     ========================================
//!     |               Strings                |
//!     ========================================
//! ```
//!
//! Every reference inside the blob is a 32-bit offset or index from the blob
//! base; strings are NUL-terminated UTF-8. Two indices with equal observable
//! content serialize to byte-identical blobs: symbols are sorted by id (then
//! name), relations and occurrences by range, and there is no padding left
//! uninitialized. The xxh3-128 hash of the blob is the canonical content
//! identity of an index.
//!
//! The deserializer is a set of proxy views that dereference offsets on
//! demand; nothing is copied or eagerly decoded.

use crate::index::raw::RawIndex;
use crate::symbol::Relation;
use crate::types::{Range, RelationKind, SymbolId, SymbolKind};
use std::collections::HashMap;

const MAGIC: u32 = u32::from_le_bytes(*b"TIDX");
const VERSION: u32 = 1;

const HEADER_SIZE: usize = 48;
const SYMBOL_SIZE: usize = 24;
const OCCURRENCE_SIZE: usize = 8;
const RELATION_SIZE: usize = 16;
const RANGE_SIZE: usize = 8;

/// Serialize a raw index into a self-contained blob.
pub fn serialize(index: &RawIndex) -> Vec<u8> {
    // Stable symbol order: by id, name as the collision tiebreak.
    let mut symbols: Vec<_> = index.symbols.values().collect();
    symbols.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.name.cmp(&b.name)));

    let symbol_slot: HashMap<SymbolId, u32> = symbols
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id, i as u32))
        .collect();

    let mut ranges: Vec<Range> = Vec::new();
    let mut range_slots: HashMap<Range, u32> = HashMap::new();
    let mut intern_range = |range: Range| -> u32 {
        *range_slots.entry(range).or_insert_with(|| {
            ranges.push(range);
            ranges.len() as u32 - 1
        })
    };

    // The pool starts with a NUL so offset zero is the empty string.
    let mut strings: Vec<u8> = vec![0];
    let mut string_slots: HashMap<&str, u32> = HashMap::new();

    struct SymbolRecord {
        id: u64,
        name_offset: u32,
        kind: u32,
        relations_start: u32,
        relations_len: u32,
    }

    let mut symbol_records = Vec::with_capacity(symbols.len());
    let mut relation_records: Vec<(u32, u32, u64)> = Vec::new();

    for symbol in &symbols {
        let name_offset = if symbol.name.is_empty() {
            0
        } else {
            *string_slots.entry(symbol.name.as_str()).or_insert_with(|| {
                let offset = strings.len() as u32;
                strings.extend_from_slice(symbol.name.as_bytes());
                strings.push(0);
                offset
            })
        };

        let mut relations: Vec<&Relation> = symbol.relations.iter().collect();
        relations.sort_by_key(|r| (r.kind.bits(), r.range, r.target_symbol));

        let relations_start = relation_records.len() as u32;
        for relation in &relations {
            relation_records.push((
                relation.kind.bits(),
                intern_range(relation.range),
                relation.target_symbol.value(),
            ));
        }

        symbol_records.push(SymbolRecord {
            id: symbol.id.value(),
            name_offset,
            kind: symbol.kind as u32,
            relations_start,
            relations_len: relations.len() as u32,
        });
    }

    // Occurrences sorted by range, symbol slot as tiebreak.
    let mut occurrence_records: Vec<(Range, u32)> = Vec::new();
    for (range, group) in &index.occurrences {
        for occurrence in group {
            if let Some(&slot) = symbol_slot.get(&occurrence.target_symbol) {
                occurrence_records.push((*range, slot));
            }
        }
    }
    occurrence_records.sort();
    let occurrence_records: Vec<(u32, u32)> = occurrence_records
        .into_iter()
        .map(|(range, slot)| (intern_range(range), slot))
        .collect();

    // Section offsets.
    let symbols_offset = HEADER_SIZE;
    let occurrences_offset = symbols_offset + symbol_records.len() * SYMBOL_SIZE;
    let relations_offset = occurrences_offset + occurrence_records.len() * OCCURRENCE_SIZE;
    let ranges_offset = relations_offset + relation_records.len() * RELATION_SIZE;
    let strings_offset = ranges_offset + ranges.len() * RANGE_SIZE;
    let total = strings_offset + strings.len();

    let mut blob = Vec::with_capacity(total);
    let push_u32 = |blob: &mut Vec<u8>, value: u32| blob.extend_from_slice(&value.to_le_bytes());
    let push_u64 = |blob: &mut Vec<u8>, value: u64| blob.extend_from_slice(&value.to_le_bytes());

    push_u32(&mut blob, MAGIC);
    push_u32(&mut blob, VERSION);
    push_u32(&mut blob, symbol_records.len() as u32);
    push_u32(&mut blob, symbols_offset as u32);
    push_u32(&mut blob, occurrence_records.len() as u32);
    push_u32(&mut blob, occurrences_offset as u32);
    push_u32(&mut blob, relation_records.len() as u32);
    push_u32(&mut blob, relations_offset as u32);
    push_u32(&mut blob, ranges.len() as u32);
    push_u32(&mut blob, ranges_offset as u32);
    push_u32(&mut blob, strings.len() as u32);
    push_u32(&mut blob, strings_offset as u32);

    for record in &symbol_records {
        push_u64(&mut blob, record.id);
        push_u32(&mut blob, record.name_offset);
        push_u32(&mut blob, record.kind);
        push_u32(&mut blob, record.relations_start);
        push_u32(&mut blob, record.relations_len);
    }

    for (range_slot, symbol_slot) in &occurrence_records {
        push_u32(&mut blob, *range_slot);
        push_u32(&mut blob, *symbol_slot);
    }

    for (kind, range_slot, target) in &relation_records {
        push_u32(&mut blob, *kind);
        push_u32(&mut blob, *range_slot);
        push_u64(&mut blob, *target);
    }

    for range in &ranges {
        push_u32(&mut blob, range.begin);
        push_u32(&mut blob, range.end);
    }

    blob.extend_from_slice(&strings);

    debug_assert_eq!(blob.len(), total);
    blob
}

/// The canonical 128-bit content identity of a serialized index.
pub fn content_hash(blob: &[u8]) -> u128 {
    xxhash_rust::xxh3::xxh3_128(blob)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().expect("validated"))
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(data[offset..offset + 8].try_into().expect("validated"))
}

/// Read-only proxy over a serialized index. Construction validates every
/// cross-reference once; accessors then dereference on demand without
/// copying.
#[derive(Clone, Copy)]
pub struct IndexBlob<'a> {
    data: &'a [u8],
    symbol_count: u32,
    symbols_offset: u32,
    occurrence_count: u32,
    occurrences_offset: u32,
    relation_count: u32,
    relations_offset: u32,
    range_count: u32,
    ranges_offset: u32,
    string_bytes: u32,
    strings_offset: u32,
}

impl<'a> IndexBlob<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, String> {
        if data.len() < HEADER_SIZE {
            return Err(format!("blob too small: {} bytes", data.len()));
        }
        if read_u32(data, 0) != MAGIC {
            return Err("bad magic".to_string());
        }
        let version = read_u32(data, 4);
        if version != VERSION {
            return Err(format!("unsupported version {version}"));
        }

        let blob = Self {
            data,
            symbol_count: read_u32(data, 8),
            symbols_offset: read_u32(data, 12),
            occurrence_count: read_u32(data, 16),
            occurrences_offset: read_u32(data, 20),
            relation_count: read_u32(data, 24),
            relations_offset: read_u32(data, 28),
            range_count: read_u32(data, 32),
            ranges_offset: read_u32(data, 36),
            string_bytes: read_u32(data, 40),
            strings_offset: read_u32(data, 44),
        };
        blob.validate()?;
        Ok(blob)
    }

    fn validate(&self) -> Result<(), String> {
        let section = |offset: u32, count: u32, stride: usize, name: &str| {
            let end = offset as u64 + count as u64 * stride as u64;
            if end > self.data.len() as u64 {
                Err(format!("{name} section out of bounds"))
            } else {
                Ok(())
            }
        };
        section(self.symbols_offset, self.symbol_count, SYMBOL_SIZE, "symbol")?;
        section(
            self.occurrences_offset,
            self.occurrence_count,
            OCCURRENCE_SIZE,
            "occurrence",
        )?;
        section(
            self.relations_offset,
            self.relation_count,
            RELATION_SIZE,
            "relation",
        )?;
        section(self.ranges_offset, self.range_count, RANGE_SIZE, "range")?;
        section(self.strings_offset, self.string_bytes, 1, "string")?;

        let strings_end = self.strings_offset as usize + self.string_bytes as usize;
        if self.string_bytes == 0 || self.data[strings_end - 1] != 0 {
            return Err("string pool must end with NUL".to_string());
        }

        for i in 0..self.symbol_count {
            let offset = self.symbols_offset as usize + i as usize * SYMBOL_SIZE;
            let name_offset = read_u32(self.data, offset + 8);
            if name_offset >= self.string_bytes {
                return Err(format!("symbol {i}: name offset out of bounds"));
            }
            let start = read_u32(self.data, offset + 16);
            let len = read_u32(self.data, offset + 20);
            if start as u64 + len as u64 > self.relation_count as u64 {
                return Err(format!("symbol {i}: relation span out of bounds"));
            }
        }
        for i in 0..self.occurrence_count {
            let offset = self.occurrences_offset as usize + i as usize * OCCURRENCE_SIZE;
            if read_u32(self.data, offset) >= self.range_count {
                return Err(format!("occurrence {i}: range slot out of bounds"));
            }
            if read_u32(self.data, offset + 4) >= self.symbol_count {
                return Err(format!("occurrence {i}: symbol slot out of bounds"));
            }
        }
        for i in 0..self.relation_count {
            let offset = self.relations_offset as usize + i as usize * RELATION_SIZE;
            if read_u32(self.data, offset + 4) >= self.range_count {
                return Err(format!("relation {i}: range slot out of bounds"));
            }
        }
        Ok(())
    }

    pub fn symbol_count(&self) -> u32 {
        self.symbol_count
    }

    pub fn occurrence_count(&self) -> u32 {
        self.occurrence_count
    }

    pub fn symbol(&self, slot: u32) -> BlobSymbol<'a> {
        debug_assert!(slot < self.symbol_count);
        BlobSymbol { blob: *self, slot }
    }

    pub fn symbols(&self) -> impl Iterator<Item = BlobSymbol<'a>> + use<'a> {
        let blob = *self;
        (0..blob.symbol_count).map(move |slot| blob.symbol(slot))
    }

    fn range(&self, slot: u32) -> Range {
        let offset = self.ranges_offset as usize + slot as usize * RANGE_SIZE;
        Range::new(read_u32(self.data, offset), read_u32(self.data, offset + 4))
    }

    fn string(&self, offset: u32) -> &'a str {
        let start = self.strings_offset as usize + offset as usize;
        let section_end = self.strings_offset as usize + self.string_bytes as usize;
        let end = self.data[start..section_end]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .unwrap_or(section_end - 1);
        std::str::from_utf8(&self.data[start..end]).unwrap_or("")
    }

    fn occurrence(&self, index: u32) -> (Range, u32) {
        let offset = self.occurrences_offset as usize + index as usize * OCCURRENCE_SIZE;
        (
            self.range(read_u32(self.data, offset)),
            read_u32(self.data, offset + 4),
        )
    }

    /// Locate the symbols whose occurrence spans contain `offset`.
    ///
    /// Occurrences are stored sorted by range begin; a lower-bound scan
    /// finds the containing span, then collects every occurrence sharing
    /// it (overloads, template uses).
    pub fn locate_symbols(&self, offset: u32) -> Vec<BlobSymbol<'a>> {
        let count = self.occurrence_count;
        let mut low = 0u32;
        let mut high = count;
        while low < high {
            let mid = (low + high) / 2;
            if self.occurrence(mid).0.begin <= offset {
                low = mid + 1;
            } else {
                high = mid;
            }
        }

        // Walk back from the lower bound; every candidate has begin <=
        // offset, so the first non-containing span ends the run.
        let mut result = Vec::new();
        let mut index = low;
        while index > 0 {
            index -= 1;
            let (range, slot) = self.occurrence(index);
            if range.contains(offset) {
                result.push(self.symbol(slot));
            } else {
                break;
            }
        }
        result.reverse();
        result
    }

    /// Locate a symbol by id, falling back to the name to disambiguate hash
    /// collisions.
    pub fn find_symbol(&self, id: SymbolId, name: &str) -> Option<BlobSymbol<'a>> {
        let mut low = 0u32;
        let mut high = self.symbol_count;
        while low < high {
            let mid = (low + high) / 2;
            if self.symbol(mid).id() < id {
                low = mid + 1;
            } else {
                high = mid;
            }
        }

        let mut slot = low;
        while slot < self.symbol_count {
            let symbol = self.symbol(slot);
            if symbol.id() != id {
                break;
            }
            if symbol.name() == name {
                return Some(symbol);
            }
            slot += 1;
        }
        None
    }

    /// Rebuild the in-memory form. Context tags reset to their defaults.
    pub fn to_raw_index(&self) -> RawIndex {
        let mut raw = RawIndex::new();
        for symbol in self.symbols() {
            let record = raw.get_symbol(SymbolId(symbol.id().value()));
            record.name = symbol.name().to_string();
            record.kind = symbol.kind();
            for relation in symbol.relations() {
                record.add_relation(Relation::new(
                    relation.kind(),
                    relation.range(),
                    relation.target(),
                ));
            }
        }
        for index in 0..self.occurrence_count {
            let (range, slot) = self.occurrence(index);
            raw.add_occurrence(range, self.symbol(slot).id());
        }
        raw
    }
}

/// Proxy over one symbol record.
#[derive(Clone, Copy)]
pub struct BlobSymbol<'a> {
    blob: IndexBlob<'a>,
    slot: u32,
}

impl<'a> BlobSymbol<'a> {
    fn offset(&self) -> usize {
        self.blob.symbols_offset as usize + self.slot as usize * SYMBOL_SIZE
    }

    pub fn id(&self) -> SymbolId {
        SymbolId(read_u64(self.blob.data, self.offset()))
    }

    pub fn name(&self) -> &'a str {
        self.blob.string(read_u32(self.blob.data, self.offset() + 8))
    }

    pub fn kind(&self) -> SymbolKind {
        SymbolKind::from_u8(read_u32(self.blob.data, self.offset() + 12) as u8)
            .unwrap_or_default()
    }

    pub fn relations(&self) -> impl Iterator<Item = BlobRelation<'a>> + use<'a> {
        let blob = self.blob;
        let start = read_u32(blob.data, self.offset() + 16);
        let len = read_u32(blob.data, self.offset() + 20);
        (start..start + len).map(move |slot| BlobRelation { blob, slot })
    }
}

/// Proxy over one relation record.
#[derive(Clone, Copy)]
pub struct BlobRelation<'a> {
    blob: IndexBlob<'a>,
    slot: u32,
}

impl BlobRelation<'_> {
    fn offset(&self) -> usize {
        self.blob.relations_offset as usize + self.slot as usize * RELATION_SIZE
    }

    pub fn kind(&self) -> RelationKind {
        RelationKind::from_bits_truncate(read_u32(self.blob.data, self.offset()))
    }

    pub fn range(&self) -> Range {
        self.blob.range(read_u32(self.blob.data, self.offset() + 4))
    }

    pub fn target(&self) -> SymbolId {
        SymbolId(read_u64(self.blob.data, self.offset() + 8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> RawIndex {
        let mut raw = RawIndex::new();
        let x = SymbolId::from_usr("c:@x");
        let symbol = raw.get_symbol(x);
        symbol.name = "x".into();
        symbol.kind = SymbolKind::Variable;
        raw.add_relation(
            x,
            Relation::new(RelationKind::DEFINITION, Range::new(4, 5), SymbolId::NONE),
        );
        raw.add_relation(
            x,
            Relation::new(RelationKind::REFERENCE, Range::new(25, 26), SymbolId::NONE),
        );
        raw.add_occurrence(Range::new(4, 5), x);
        raw.add_occurrence(Range::new(25, 26), x);
        raw
    }

    #[test]
    fn test_round_trip() {
        let raw = sample_index();
        let blob = serialize(&raw);

        let view = IndexBlob::new(&blob).unwrap();
        let rebuilt = view.to_raw_index();
        let blob2 = serialize(&rebuilt);

        assert_eq!(blob, blob2);
        assert_eq!(content_hash(&blob), content_hash(&blob2));
    }

    #[test]
    fn test_deterministic_across_insertion_order() {
        let mut a = RawIndex::new();
        let mut b = RawIndex::new();

        let one = SymbolId::from_usr("one");
        let two = SymbolId::from_usr("two");

        for (index, first, second) in [(0u32, one, two), (1, two, one)] {
            let target = if index == 0 { &mut a } else { &mut b };
            for id in [first, second] {
                let symbol = target.get_symbol(id);
                symbol.name = if id == one { "one".into() } else { "two".into() };
                target.add_relation(
                    id,
                    Relation::new(RelationKind::REFERENCE, Range::new(9, 12), SymbolId::NONE),
                );
                target.add_relation(
                    id,
                    Relation::new(RelationKind::DEFINITION, Range::new(1, 4), SymbolId::NONE),
                );
                target.add_occurrence(Range::new(1, 4), id);
            }
        }

        assert_eq!(serialize(&a), serialize(&b));
        assert_eq!(content_hash(&serialize(&a)), content_hash(&serialize(&b)));
    }

    #[test]
    fn test_locate_symbols_by_offset() {
        let raw = sample_index();
        let blob = serialize(&raw);
        let view = IndexBlob::new(&blob).unwrap();

        let at_def = view.locate_symbols(4);
        assert_eq!(at_def.len(), 1);
        assert_eq!(at_def[0].name(), "x");

        let at_ref = view.locate_symbols(26);
        assert_eq!(at_ref.len(), 1);
        assert_eq!(at_ref[0].name(), "x");

        assert!(view.locate_symbols(15).is_empty());
    }

    #[test]
    fn test_find_symbol_requires_matching_name() {
        let raw = sample_index();
        let blob = serialize(&raw);
        let view = IndexBlob::new(&blob).unwrap();

        let id = SymbolId::from_usr("c:@x");
        assert!(view.find_symbol(id, "x").is_some());
        assert!(view.find_symbol(id, "y").is_none());
        assert!(view.find_symbol(SymbolId(12345), "x").is_none());
    }

    #[test]
    fn test_shared_occurrence_range() {
        let mut raw = RawIndex::new();
        for usr in ["c:@f#1", "c:@f#2"] {
            let id = SymbolId::from_usr(usr);
            raw.get_symbol(id).name = "f".into();
            raw.add_relation(
                id,
                Relation::new(RelationKind::REFERENCE, Range::new(10, 11), SymbolId::NONE),
            );
            raw.add_occurrence(Range::new(10, 11), id);
        }

        let blob = serialize(&raw);
        let view = IndexBlob::new(&blob).unwrap();
        assert_eq!(view.locate_symbols(10).len(), 2);
    }

    #[test]
    fn test_rejects_malformed_blobs() {
        assert!(IndexBlob::new(&[]).is_err());
        assert!(IndexBlob::new(&[0u8; HEADER_SIZE]).is_err());

        let mut blob = serialize(&sample_index());
        blob[0] ^= 0xff;
        assert!(IndexBlob::new(&blob).is_err());
    }

    #[test]
    fn test_empty_index_serializes() {
        let blob = serialize(&RawIndex::new());
        let view = IndexBlob::new(&blob).unwrap();
        assert_eq!(view.symbol_count(), 0);
        assert!(view.locate_symbols(0).is_empty());
    }
}
