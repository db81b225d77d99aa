//! Cross-file symbol queries over the on-disk index blobs.
//!
//! Queries stream: at most one blob is mapped at a time, and only its
//! symbol table is scanned; strings are dereferenced lazily by the blob
//! proxies. Missing or stale blob files are tolerated and skipped; the
//! registry's content hashes remain the source of truth.

use crate::error::{IndexError, IndexResult};
use crate::index::binary::{BlobSymbol, IndexBlob};
use crate::types::{Range, RelationKind, SymbolId, SymbolKind};
use std::path::PathBuf;
use tracing::debug;

/// One query result: a range inside a source file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LookupHit {
    pub path: PathBuf,
    pub range: Range,
}

/// A symbol identity carried between blobs: the hash plus the name that
/// disambiguates hash collisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTarget {
    pub id: SymbolId,
    pub name: String,
}

/// An entry point for hierarchy walks, resolved from a cursor position.
#[derive(Debug, Clone)]
pub struct HierarchyItem {
    pub symbol: SymbolTarget,
    pub kind: SymbolKind,
    pub path: PathBuf,
    pub range: Range,
}

/// A blob known to the registry: where its index lives and which source
/// file its ranges refer to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobRef {
    pub src_path: String,
    /// Index path prefix, without the `.sidx` suffix.
    pub prefix: String,
}

impl BlobRef {
    fn sidx_path(&self) -> String {
        format!("{}.sidx", self.prefix)
    }
}

/// Map a blob file and run `f` over the parsed view. The mapping is dropped
/// before returning, so callers never hold more than one blob open.
fn with_blob<R>(
    blob_ref: &BlobRef,
    f: impl FnOnce(&IndexBlob) -> R,
) -> IndexResult<R> {
    let path = blob_ref.sidx_path();
    let file = std::fs::File::open(&path).map_err(|e| IndexError::FileRead {
        path: PathBuf::from(&path),
        source: e,
    })?;
    // Index files are append-once: a blob is fully written before the
    // registry points at it, so mapping it shared is safe.
    let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| IndexError::FileRead {
        path: PathBuf::from(&path),
        source: e,
    })?;
    let blob = IndexBlob::new(&mmap).map_err(|reason| IndexError::BlobCorrupt {
        path: PathBuf::from(&path),
        reason,
    })?;
    Ok(f(&blob))
}

fn collect_relations(
    symbol: &BlobSymbol<'_>,
    mask: RelationKind,
    src_path: &str,
    hits: &mut Vec<LookupHit>,
) {
    for relation in symbol.relations() {
        if mask.intersects(relation.kind()) {
            hits.push(LookupHit {
                path: PathBuf::from(src_path),
                range: relation.range(),
            });
        }
    }
}

/// Resolve the symbols at `offset` in the blob of the queried file, and
/// collect that blob's own matching relations.
pub fn locate_targets(
    blob_ref: &BlobRef,
    offset: u32,
    mask: RelationKind,
    hits: &mut Vec<LookupHit>,
) -> IndexResult<Vec<SymbolTarget>> {
    with_blob(blob_ref, |blob| {
        let mut targets = Vec::new();
        for symbol in blob.locate_symbols(offset) {
            targets.push(SymbolTarget {
                id: symbol.id(),
                name: symbol.name().to_string(),
            });
            collect_relations(&symbol, mask, &blob_ref.src_path, hits);
        }
        targets
    })
}

/// Scan one blob for the target symbols and collect matching relations.
/// Open failures are skipped: the blob may be gone or mid-rewrite.
pub fn scan_blob(
    blob_ref: &BlobRef,
    targets: &[SymbolTarget],
    mask: RelationKind,
    hits: &mut Vec<LookupHit>,
) {
    let result = with_blob(blob_ref, |blob| {
        for target in targets {
            if let Some(symbol) = blob.find_symbol(target.id, &target.name) {
                collect_relations(&symbol, mask, &blob_ref.src_path, hits);
            }
        }
    });
    if let Err(e) = result {
        debug!("skipping index blob: {e}");
    }
}

/// Run a full query: resolve targets in `origin`, then stream over every
/// other blob, one at a time. Results are deduplicated and sorted.
pub fn run_query(
    origin: &BlobRef,
    offset: u32,
    mask: RelationKind,
    others: &[BlobRef],
) -> IndexResult<Vec<LookupHit>> {
    let mut hits = Vec::new();
    let targets = match locate_targets(origin, offset, mask, &mut hits) {
        Ok(targets) => targets,
        // The origin blob may be mid-rewrite or already collected; a reader
        // sees an empty result and retries on the next request.
        Err(IndexError::FileRead { .. }) | Err(IndexError::BlobCorrupt { .. }) => {
            debug!("origin blob for {} unavailable", origin.src_path);
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    if !targets.is_empty() {
        for blob_ref in others {
            if blob_ref.prefix == origin.prefix {
                continue;
            }
            scan_blob(blob_ref, &targets, mask, &mut hits);
        }
    }

    hits.sort();
    hits.dedup();
    Ok(hits)
}

/// Resolve hierarchy entry points at a cursor position: the symbols there,
/// each anchored at its definition (or failing that declaration) range.
pub fn prepare_hierarchy(origin: &BlobRef, offset: u32) -> IndexResult<Vec<HierarchyItem>> {
    with_blob(origin, |blob| {
        let mut items = Vec::new();
        for symbol in blob.locate_symbols(offset) {
            let mut anchor: Option<(RelationKind, Range)> = None;
            for relation in symbol.relations() {
                let kind = relation.kind();
                let better = match anchor {
                    None => true,
                    Some((existing, _)) => {
                        existing != RelationKind::DEFINITION && kind == RelationKind::DEFINITION
                    }
                };
                if better && kind.intersects(RelationKind::DEFINITION | RelationKind::DECLARATION)
                {
                    anchor = Some((kind, relation.range()));
                }
            }
            let range = anchor.map(|(_, r)| r).unwrap_or(Range::new(0, 0));
            items.push(HierarchyItem {
                symbol: SymbolTarget {
                    id: symbol.id(),
                    name: symbol.name().to_string(),
                },
                kind: symbol.kind(),
                path: PathBuf::from(&origin.src_path),
                range,
            });
        }
        items
    })
}

/// Collect every relation of `target` matching `mask` across all blobs.
/// Used by the call/type hierarchy wrappers.
pub fn relations_of(
    target: &SymbolTarget,
    mask: RelationKind,
    blobs: &[BlobRef],
) -> Vec<LookupHit> {
    let targets = std::slice::from_ref(target);
    let mut hits = Vec::new();
    for blob_ref in blobs {
        scan_blob(blob_ref, targets, mask, &mut hits);
    }
    hits.sort();
    hits.dedup();
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::binary::serialize;
    use crate::index::raw::RawIndex;
    use crate::symbol::Relation;
    use tempfile::TempDir;

    fn write_blob(dir: &TempDir, name: &str, raw: &RawIndex) -> BlobRef {
        let prefix = dir.path().join(name).to_string_lossy().into_owned();
        std::fs::write(format!("{prefix}.sidx"), serialize(raw)).unwrap();
        BlobRef {
            src_path: format!("/src/{name}"),
            prefix,
        }
    }

    fn simple_index(usr: &str, name: &str, def: Range, refs: &[Range]) -> RawIndex {
        let id = SymbolId::from_usr(usr);
        let mut raw = RawIndex::new();
        raw.get_symbol(id).name = name.into();
        raw.add_relation(id, Relation::new(RelationKind::DEFINITION, def, SymbolId::NONE));
        raw.add_occurrence(def, id);
        for r in refs {
            raw.add_relation(id, Relation::new(RelationKind::REFERENCE, *r, SymbolId::NONE));
            raw.add_occurrence(*r, id);
        }
        raw
    }

    #[test]
    fn test_query_across_blobs() {
        let dir = TempDir::new().unwrap();

        // widget.h defines `draw`; widget.cpp references it.
        let origin = write_blob(
            &dir,
            "widget.h",
            &simple_index("c:@F@draw#", "draw", Range::new(10, 14), &[]),
        );
        let other = write_blob(
            &dir,
            "widget.cpp",
            &simple_index("c:@F@draw#", "draw", Range::new(50, 54), &[Range::new(80, 84)]),
        );

        let hits = run_query(
            &origin,
            12,
            RelationKind::REFERENCE,
            &[origin.clone(), other.clone()],
        )
        .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, PathBuf::from("/src/widget.cpp"));
        assert_eq!(hits[0].range, Range::new(80, 84));
    }

    #[test]
    fn test_missing_blob_is_skipped() {
        let dir = TempDir::new().unwrap();
        let origin = write_blob(
            &dir,
            "a.h",
            &simple_index("c:@x", "x", Range::new(0, 1), &[]),
        );
        let gone = BlobRef {
            src_path: "/src/gone.cpp".into(),
            prefix: dir.path().join("gone").to_string_lossy().into_owned(),
        };

        let hits = run_query(
            &origin,
            0,
            RelationKind::DEFINITION,
            &[origin.clone(), gone],
        )
        .unwrap();

        // The origin's own definition is still reported.
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, PathBuf::from("/src/a.h"));
    }

    #[test]
    fn test_collision_disambiguated_by_name() {
        let dir = TempDir::new().unwrap();
        let origin = write_blob(
            &dir,
            "a.h",
            &simple_index("c:@x", "x", Range::new(0, 1), &[]),
        );

        // Another blob holding a symbol with the same id but a different
        // name (a forced collision).
        let mut raw = RawIndex::new();
        let id = SymbolId::from_usr("c:@x");
        raw.get_symbol(id).name = "imposter".into();
        raw.add_relation(
            id,
            Relation::new(RelationKind::REFERENCE, Range::new(7, 8), SymbolId::NONE),
        );
        let other = write_blob(&dir, "b.cpp", &raw);

        let hits = run_query(
            &origin,
            0,
            RelationKind::REFERENCE,
            &[origin.clone(), other],
        )
        .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_prepare_hierarchy_anchors_at_definition() {
        let dir = TempDir::new().unwrap();
        let origin = write_blob(
            &dir,
            "a.h",
            &simple_index("c:@F@f#", "f", Range::new(5, 6), &[Range::new(30, 31)]),
        );

        let items = prepare_hierarchy(&origin, 30).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].symbol.name, "f");
        assert_eq!(items[0].range, Range::new(5, 6));
    }
}
