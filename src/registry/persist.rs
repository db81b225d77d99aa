//! Registry snapshot: `index.json` save/load.
//!
//! The snapshot mirrors the in-memory records one-to-one, keyed by source
//! paths instead of arena ids so ids are free to differ across sessions.
//! A snapshot that fails to parse yields `RegistryCorrupt`; the caller
//! starts with an empty registry and lets orphan GC reclaim the dangling
//! blobs.

use super::{ContextEntry, HeaderIndexMeta, IncludeLocation, IndexRegistry};
use crate::error::{IndexError, IndexResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const SNAPSHOT_FILE: &str = "index.json";

#[derive(Debug, Serialize, Deserialize)]
struct TuSnapshot {
    src_path: String,
    index_path: String,
    mtime: i64,
    version: u32,
    locations: Vec<IncludeLocation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HeaderContextSnapshot {
    tu: String,
    entries: Vec<ContextEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HeaderSnapshot {
    src_path: String,
    indices: Vec<HeaderIndexMeta>,
    contexts: Vec<HeaderContextSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    paths: Vec<String>,
    tus: Vec<TuSnapshot>,
    headers: Vec<HeaderSnapshot>,
}

impl IndexRegistry {
    pub fn snapshot(&self) -> RegistrySnapshot {
        // Never-indexed and retired records have nothing worth persisting.
        let mut tus: Vec<TuSnapshot> = self
            .tus()
            .filter(|(_, tu)| tu.mtime_ms != 0)
            .map(|(_, tu)| TuSnapshot {
                src_path: tu.src_path.clone(),
                index_path: tu.index_path.clone(),
                mtime: tu.mtime_ms,
                version: tu.version,
                locations: tu.locations.clone(),
            })
            .collect();
        tus.sort_by(|a, b| a.src_path.cmp(&b.src_path));

        let mut headers: Vec<HeaderSnapshot> = self
            .headers()
            .map(|(_, header)| {
                let mut contexts: Vec<HeaderContextSnapshot> = header
                    .contexts
                    .iter()
                    .map(|(tu, entries)| HeaderContextSnapshot {
                        tu: self.tu(*tu).src_path.clone(),
                        entries: entries.clone(),
                    })
                    .collect();
                contexts.sort_by(|a, b| a.tu.cmp(&b.tu));
                HeaderSnapshot {
                    src_path: header.src_path.clone(),
                    indices: header.indices.clone(),
                    contexts,
                }
            })
            .collect();
        headers.sort_by(|a, b| a.src_path.cmp(&b.src_path));

        RegistrySnapshot {
            paths: (0..self.pool.len() as u32)
                .map(|slot| self.pool.get(slot).to_string())
                .collect(),
            tus,
            headers,
        }
    }

    pub fn from_snapshot(dir: PathBuf, snapshot: RegistrySnapshot) -> Self {
        let mut registry = IndexRegistry::new(dir);

        // Rebuild the pool first so location path refs stay valid.
        for path in &snapshot.paths {
            registry.pool.intern(path);
        }

        for tu in snapshot.tus {
            let id = registry.get_or_create_tu(&tu.src_path);
            let record = registry.tu_mut(id);
            record.index_path = tu.index_path;
            record.mtime_ms = tu.mtime;
            record.version = tu.version;
            record.locations = tu.locations;
        }

        for header in snapshot.headers {
            let header_id = registry.get_or_create_header(&header.src_path);
            registry.headers[header_id.0 as usize].indices = header.indices;
            for context in header.contexts {
                let tu_id = registry.get_or_create_tu(&context.tu);
                registry.headers[header_id.0 as usize]
                    .contexts
                    .insert(tu_id, context.entries);
                registry.tus[tu_id.0 as usize].headers.insert(header_id);
            }
        }

        registry
    }

    /// Write the snapshot atomically (temp file, then rename).
    pub fn save(&self) -> IndexResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| IndexError::FileWrite {
            path: self.dir.clone(),
            source: e,
        })?;

        let path = self.dir.join(SNAPSHOT_FILE);
        let json = serde_json::to_vec_pretty(&self.snapshot()).expect("snapshot serializes");

        let temp = path.with_extension("json.tmp");
        std::fs::write(&temp, json).map_err(|e| IndexError::FileWrite {
            path: temp.clone(),
            source: e,
        })?;
        std::fs::rename(&temp, &path).map_err(|e| IndexError::FileWrite {
            path: path.clone(),
            source: e,
        })?;
        Ok(())
    }

    /// Load a registry from `dir/index.json`. A missing file yields an
    /// empty registry; a malformed one is an error so the caller can log
    /// it before starting empty.
    pub fn load(dir: PathBuf) -> IndexResult<Self> {
        let path = dir.join(SNAPSHOT_FILE);
        if !path.exists() {
            return Ok(IndexRegistry::new(dir));
        }

        let content = std::fs::read_to_string(&path).map_err(|e| IndexError::FileRead {
            path: path.clone(),
            source: e,
        })?;

        let snapshot: RegistrySnapshot =
            serde_json::from_str(&content).map_err(|e| IndexError::RegistryCorrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        info!("loaded registry snapshot from {}", path.display());
        Ok(Self::from_snapshot(dir, snapshot))
    }

    /// Load the registry, falling back to an empty one when the snapshot is
    /// corrupt, optionally deleting unreferenced blobs.
    pub fn load_or_default(dir: &Path, gc_orphans: bool) -> Self {
        let registry = match Self::load(dir.to_path_buf()) {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!("{e}; starting with an empty registry");
                IndexRegistry::new(dir.to_path_buf())
            }
        };
        if gc_orphans {
            let removed = registry.gc_orphans();
            if removed > 0 {
                info!("garbage-collected {removed} orphan index files");
            }
        }
        registry
    }
}
