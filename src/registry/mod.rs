//! The include graph and translation-unit registry.
//!
//! Tracks, for every source file, which translation units have indexed it,
//! when, and where on disk the resulting index lives. TU and header records
//! reference each other bidirectionally; both live in arenas and cross-
//! reference by small integer ids, so no record ever holds a pointer into
//! the other arena.

use crate::index::tu::{self, NO_INCLUDE};
use crate::types::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Sentinel for a context that has no index slot assigned yet.
pub const NO_SLOT: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TuId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeaderId(pub u32);

/// One `#include` directive: a path-pool reference, the 1-based line of the
/// directive, and the parent include-location index forming a reversed
/// chain (`NO_INCLUDE` terminates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeLocation {
    pub path_ref: u32,
    pub line: u32,
    pub include: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TranslationUnit {
    pub src_path: String,
    /// Index file path prefix (without the `.sidx`/`.fidx` suffix); empty
    /// until the first successful index.
    pub index_path: String,
    /// Milliseconds since the epoch of the last successful index.
    pub mtime_ms: i64,
    pub version: u32,
    /// Include locations introduced by this TU. A guarded header is
    /// recorded at most once.
    pub locations: Vec<IncludeLocation>,
    /// Headers this TU contributed contexts to.
    pub headers: HashSet<HeaderId>,
}

/// One header context seen by a TU: the include-location index within the
/// TU plus the slot of the on-disk index holding its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub include: u32,
    pub index_slot: u32,
}

/// An on-disk header index file and the content hashes identifying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderIndexMeta {
    pub path: String,
    pub symbol_hash: ContentHash,
    pub feature_hash: ContentHash,
}

#[derive(Debug, Clone, Default)]
pub struct HeaderRecord {
    pub src_path: String,
    pub indices: Vec<HeaderIndexMeta>,
    pub contexts: HashMap<TuId, Vec<ContextEntry>>,
}

/// Deduplicated path strings; `IncludeLocation::path_ref` points here. The
/// pool is append-only, so existing refs never invalidate.
#[derive(Debug, Default)]
pub struct PathPool {
    paths: Vec<String>,
    slots: HashMap<String, u32>,
}

impl PathPool {
    pub fn intern(&mut self, path: &str) -> u32 {
        if let Some(&slot) = self.slots.get(path) {
            return slot;
        }
        let slot = self.paths.len() as u32;
        self.paths.push(path.to_string());
        self.slots.insert(path.to_string(), slot);
        slot
    }

    pub fn get(&self, slot: u32) -> &str {
        &self.paths[slot as usize]
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct IndexRegistry {
    dir: PathBuf,
    tus: Vec<TranslationUnit>,
    tu_slots: HashMap<String, TuId>,
    headers: Vec<HeaderRecord>,
    header_slots: HashMap<String, HeaderId>,
    pool: PathPool,
}

impl IndexRegistry {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            ..Default::default()
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tu_id(&self, src_path: &str) -> Option<TuId> {
        self.tu_slots.get(src_path).copied()
    }

    pub fn tu(&self, id: TuId) -> &TranslationUnit {
        &self.tus[id.0 as usize]
    }

    pub fn tu_mut(&mut self, id: TuId) -> &mut TranslationUnit {
        &mut self.tus[id.0 as usize]
    }

    pub fn tus(&self) -> impl Iterator<Item = (TuId, &TranslationUnit)> {
        self.tus
            .iter()
            .enumerate()
            .map(|(i, tu)| (TuId(i as u32), tu))
    }

    pub fn header_id(&self, src_path: &str) -> Option<HeaderId> {
        self.header_slots.get(src_path).copied()
    }

    pub fn header(&self, id: HeaderId) -> &HeaderRecord {
        &self.headers[id.0 as usize]
    }

    pub fn headers(&self) -> impl Iterator<Item = (HeaderId, &HeaderRecord)> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, h)| (HeaderId(i as u32), h))
    }

    pub fn get_or_create_tu(&mut self, src_path: &str) -> TuId {
        if let Some(id) = self.tu_id(src_path) {
            return id;
        }
        let id = TuId(self.tus.len() as u32);
        self.tus.push(TranslationUnit {
            src_path: src_path.to_string(),
            ..Default::default()
        });
        self.tu_slots.insert(src_path.to_string(), id);
        id
    }

    pub fn get_or_create_header(&mut self, src_path: &str) -> HeaderId {
        if let Some(id) = self.header_id(src_path) {
            return id;
        }
        let id = HeaderId(self.headers.len() as u32);
        self.headers.push(HeaderRecord {
            src_path: src_path.to_string(),
            ..Default::default()
        });
        self.header_slots.insert(src_path.to_string(), id);
        id
    }

    /// Retire a TU record, detaching it from its headers and clearing its
    /// state. Called when the compilation database stops listing the file;
    /// the on-disk blobs it referenced become orphans.
    pub fn drop_tu(&mut self, src_path: &str) -> Vec<String> {
        let Some(id) = self.tu_id(src_path) else {
            return Vec::new();
        };
        let paths = self.clear_tu_contexts(id);

        let record = &mut self.tus[id.0 as usize];
        record.index_path.clear();
        record.locations.clear();
        record.mtime_ms = 0;
        paths
    }

    /// Detach a TU from every header it contributed to, returning the
    /// affected header paths so the in-memory header indices can drop the
    /// TU's contexts as well.
    pub fn clear_tu_contexts(&mut self, tu: TuId) -> Vec<String> {
        let header_ids: Vec<HeaderId> = self.tus[tu.0 as usize].headers.drain().collect();
        let mut paths = Vec::with_capacity(header_ids.len());
        for header_id in header_ids {
            let header = &mut self.headers[header_id.0 as usize];
            header.contexts.remove(&tu);
            paths.push(header.src_path.clone());
        }
        paths
    }

    /// Fold one parse into the TU record: refresh the location list (paths
    /// interned into the shared pool) and stamp the build time.
    pub fn apply_unit(&mut self, tu: TuId, index: &tu::TuIndex) {
        let graph = &index.graph;
        let locations = graph
            .locations
            .iter()
            .map(|loc| IncludeLocation {
                path_ref: self.pool.intern(graph.path(loc.path)),
                line: loc.line,
                include: loc.include,
            })
            .collect();

        let record = &mut self.tus[tu.0 as usize];
        record.locations = locations;
        record.mtime_ms = index.time;
        record.version += 1;
    }

    /// Record that `tu` saw a context of `header_path` introduced by the
    /// include location `include`. Idempotent per `(tu, include)`.
    pub fn add_header_context(&mut self, tu: TuId, header_path: &str, include: u32) -> HeaderId {
        let header_id = self.get_or_create_header(header_path);
        self.tus[tu.0 as usize].headers.insert(header_id);

        let contexts = self.headers[header_id.0 as usize]
            .contexts
            .entry(tu)
            .or_default();
        if !contexts.iter().any(|c| c.include == include) {
            contexts.push(ContextEntry {
                include,
                index_slot: NO_SLOT,
            });
        }
        header_id
    }

    /// Attach a serialized header index to the context `(tu, include)`.
    ///
    /// If an on-disk index with the same content hashes already exists its
    /// slot is reused and no new file is needed; the returned flag says
    /// whether the caller must write the blob.
    pub fn assign_header_index(
        &mut self,
        header: HeaderId,
        tu: TuId,
        include: u32,
        symbol_hash: ContentHash,
        feature_hash: ContentHash,
    ) -> (u32, bool) {
        let index_path = self.index_path_for(&self.header(header).src_path.clone());
        let record = &mut self.headers[header.0 as usize];

        let (slot, fresh) = match record
            .indices
            .iter()
            .position(|m| m.symbol_hash == symbol_hash && m.feature_hash == feature_hash)
        {
            Some(slot) => (slot as u32, false),
            None => {
                record.indices.push(HeaderIndexMeta {
                    path: index_path,
                    symbol_hash,
                    feature_hash,
                });
                (record.indices.len() as u32 - 1, true)
            }
        };

        if let Some(entry) = record
            .contexts
            .get_mut(&tu)
            .and_then(|list| list.iter_mut().find(|c| c.include == include))
        {
            entry.index_slot = slot;
        }

        (slot, fresh)
    }

    pub fn header_index_path(&self, header: HeaderId, slot: u32) -> Option<&str> {
        self.header(header)
            .indices
            .get(slot as usize)
            .map(|m| m.path.as_str())
    }

    /// Index file naming: `dir/<basename>.<mtime_ms + jitter>`. The jitter
    /// keeps concurrent indexers of the same file from colliding.
    pub fn index_path_for(&self, file: &str) -> String {
        use rand::RngExt;
        let ms = chrono::Utc::now().timestamp_millis();
        let jitter: i64 = rand::rng().random_range(0..1000);
        let basename = Path::new(file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index".to_string());
        self.dir
            .join(format!("{}.{}", basename, ms + jitter))
            .to_string_lossy()
            .into_owned()
    }

    /// Resolve the include chain of a location index within a TU, innermost
    /// first.
    pub fn resolve_chain(&self, tu: TuId, location: u32) -> Vec<(String, u32)> {
        let record = self.tu(tu);
        let mut chain = Vec::new();
        let mut index = location;
        while index != NO_INCLUDE {
            let Some(loc) = record.locations.get(index as usize) else {
                break;
            };
            chain.push((self.pool.get(loc.path_ref).to_string(), loc.line));
            index = loc.include;
        }
        chain
    }

    /// Every on-disk file referenced by the registry.
    pub fn referenced_files(&self) -> HashSet<PathBuf> {
        let mut files = HashSet::new();
        for tu in &self.tus {
            if !tu.index_path.is_empty() {
                files.insert(PathBuf::from(format!("{}.sidx", tu.index_path)));
                files.insert(PathBuf::from(format!("{}.fidx", tu.index_path)));
            }
        }
        for header in &self.headers {
            for meta in &header.indices {
                files.insert(PathBuf::from(format!("{}.sidx", meta.path)));
                files.insert(PathBuf::from(format!("{}.fidx", meta.path)));
            }
        }
        files
    }

    /// The blob a positional query of `file` starts from: the TU's own
    /// index, or the header's active (first) context index.
    pub fn origin_blob(&self, file: &str) -> Option<crate::lookup::BlobRef> {
        use crate::lookup::BlobRef;

        if let Some(tu) = self.tu_id(file) {
            let record = self.tu(tu);
            if !record.index_path.is_empty() {
                return Some(BlobRef {
                    src_path: file.to_string(),
                    prefix: record.index_path.clone(),
                });
            }
        }

        let header = self.header(self.header_id(file)?);
        header.indices.first().map(|meta| BlobRef {
            src_path: file.to_string(),
            prefix: meta.path.clone(),
        })
    }

    /// Every blob the registry knows about, deduplicated by path.
    pub fn all_blobs(&self) -> Vec<crate::lookup::BlobRef> {
        use crate::lookup::BlobRef;

        let mut seen = HashSet::new();
        let mut blobs = Vec::new();
        for tu in &self.tus {
            if !tu.index_path.is_empty() && seen.insert(tu.index_path.clone()) {
                blobs.push(BlobRef {
                    src_path: tu.src_path.clone(),
                    prefix: tu.index_path.clone(),
                });
            }
        }
        for header in &self.headers {
            for meta in &header.indices {
                if seen.insert(meta.path.clone()) {
                    blobs.push(BlobRef {
                        src_path: header.src_path.clone(),
                        prefix: meta.path.clone(),
                    });
                }
            }
        }
        blobs
    }

    /// Delete `.sidx`/`.fidx` files in the index directory that no record
    /// references. Returns the number of files removed.
    pub fn gc_orphans(&self) -> usize {
        let referenced = self.referenced_files();
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_index = path
                .extension()
                .is_some_and(|ext| ext == "sidx" || ext == "fidx");
            if is_index && !referenced.contains(&path) {
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        debug!("removed orphan index file {}", path.display());
                        removed += 1;
                    }
                    Err(e) => warn!("failed to remove orphan {}: {e}", path.display()),
                }
            }
        }
        removed
    }
}

pub mod persist;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstFile, AstInclude, AstUnit, IncludeSite};
    use crate::types::FileId;

    fn sample_index() -> tu::TuIndex {
        let unit = AstUnit {
            files: vec![
                AstFile {
                    path: "main.cpp".into(),
                    included_at: None,
                },
                AstFile {
                    path: "a.h".into(),
                    included_at: Some(IncludeSite {
                        includer: FileId(0),
                        line: 2,
                    }),
                },
            ],
            includes: vec![AstInclude {
                file: Some(FileId(1)),
                includer: FileId(0),
                line: 2,
            }],
            ..Default::default()
        };
        tu::TuIndex::build(&unit, crate::index::raw::RawIndex::new())
    }

    #[test]
    fn test_path_pool_interns() {
        let mut pool = PathPool::default();
        let a = pool.intern("a.h");
        let b = pool.intern("b.h");
        let a2 = pool.intern("a.h");

        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(pool.get(a), "a.h");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_tu_and_header_arenas() {
        let mut registry = IndexRegistry::new(PathBuf::from("/tmp/idx"));
        let tu = registry.get_or_create_tu("main.cpp");
        assert_eq!(registry.get_or_create_tu("main.cpp"), tu);

        let header = registry.add_header_context(tu, "a.h", 0);
        registry.add_header_context(tu, "a.h", 0);
        registry.add_header_context(tu, "a.h", 1);

        assert_eq!(registry.header(header).contexts[&tu].len(), 2);
        assert!(registry.tu(tu).headers.contains(&header));
    }

    #[test]
    fn test_apply_unit_interns_paths() {
        let mut registry = IndexRegistry::new(PathBuf::from("/tmp/idx"));
        let tu = registry.get_or_create_tu("main.cpp");
        registry.apply_unit(tu, &sample_index());

        let record = registry.tu(tu);
        assert_eq!(record.locations.len(), 2);
        assert!(record.mtime_ms > 0);
        assert_eq!(record.version, 1);

        let chain = registry.resolve_chain(tu, 0);
        assert_eq!(chain[0].0, "a.h");
        assert_eq!(chain[0].1, 2);
        assert_eq!(chain[1].0, "main.cpp");
    }

    #[test]
    fn test_assign_header_index_dedups_by_hash() {
        let mut registry = IndexRegistry::new(PathBuf::from("/tmp/idx"));
        let tu = registry.get_or_create_tu("main.cpp");
        let header = registry.add_header_context(tu, "a.h", 0);
        registry.add_header_context(tu, "a.h", 1);

        let (slot, fresh) = registry.assign_header_index(header, tu, 0, 111, 0);
        assert_eq!(slot, 0);
        assert!(fresh);

        // Identical content reuses the slot, nothing new to write.
        let (slot, fresh) = registry.assign_header_index(header, tu, 1, 111, 0);
        assert_eq!(slot, 0);
        assert!(!fresh);

        // Different content gets a new slot.
        let (slot, fresh) = registry.assign_header_index(header, tu, 1, 222, 0);
        assert_eq!(slot, 1);
        assert!(fresh);

        let entries = &registry.header(header).contexts[&tu];
        assert_eq!(entries[0].index_slot, 0);
        assert_eq!(entries[1].index_slot, 1);
    }

    #[test]
    fn test_clear_tu_contexts() {
        let mut registry = IndexRegistry::new(PathBuf::from("/tmp/idx"));
        let tu = registry.get_or_create_tu("main.cpp");
        registry.add_header_context(tu, "a.h", 0);
        registry.add_header_context(tu, "b.h", 1);

        let mut paths = registry.clear_tu_contexts(tu);
        paths.sort();
        assert_eq!(paths, vec!["a.h", "b.h"]);
        assert!(registry.tu(tu).headers.is_empty());

        let header = registry.header_id("a.h").unwrap();
        assert!(!registry.header(header).contexts.contains_key(&tu));
    }

    #[test]
    fn test_drop_tu_retires_record() {
        let mut registry = IndexRegistry::new(PathBuf::from("/tmp/idx"));
        let tu = registry.get_or_create_tu("main.cpp");
        registry.apply_unit(tu, &sample_index());
        registry.tu_mut(tu).index_path = "/idx/main.cpp.1".into();
        registry.add_header_context(tu, "a.h", 0);

        let paths = registry.drop_tu("main.cpp");
        assert_eq!(paths, vec!["a.h"]);

        let record = registry.tu(tu);
        assert!(record.index_path.is_empty());
        assert!(record.locations.is_empty());
        assert_eq!(record.mtime_ms, 0);
        assert!(record.headers.is_empty());
    }

    #[test]
    fn test_index_path_naming() {
        let registry = IndexRegistry::new(PathBuf::from("/idx"));
        let path = registry.index_path_for("/proj/src/widget.cpp");
        let name = Path::new(&path).file_name().unwrap().to_string_lossy();

        let (base, stamp) = name.rsplit_once('.').unwrap();
        assert_eq!(base, "widget.cpp");
        assert!(stamp.parse::<i64>().unwrap() > 0);
    }
}
