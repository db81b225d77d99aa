//! The index engine facade: owns every cache and arena, drives indexing,
//! and answers queries.
//!
//! All engine state lives behind this type, never in globals, so multiple
//! engines coexist in one process (tests rely on this). Registry and
//! header-index mutations happen under short-lived locks that are never
//! held across an await point; compilation and index building run on the
//! worker pool; file I/O is async.

use crate::ast::{
    AstUnit, CompilationDatabase, CompileParams, Compiler, FeatureProvider, TemplateResolver,
};
use crate::config::Settings;
use crate::error::{IndexError, IndexResult};
use crate::index::binary;
use crate::index::builder::IndexBuilder;
use crate::index::header::HeaderIndex;
use crate::index::tu::TuIndex;
use crate::lookup::{self, HierarchyItem, LookupHit, SymbolTarget};
use crate::registry::{IndexRegistry, NO_SLOT, persist::SNAPSHOT_FILE};
use crate::scheduler::IndexScheduler;
use crate::types::{ContentHash, RelationKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything produced for one header touched by a parse, ready to be
/// folded into the registry and written out.
struct HeaderArtifact {
    file_path: String,
    /// Include-location index within the TU.
    include: u32,
    raw: crate::index::raw::RawIndex,
    blob: Vec<u8>,
    symbol_hash: ContentHash,
    feature_blob: Option<Vec<u8>>,
    feature_hash: ContentHash,
}

/// The complete output of one parse: the TU's own index plus one artifact
/// per header context.
struct ParseOutput {
    tu_index: TuIndex,
    main_blob: Vec<u8>,
    main_feature: Option<Vec<u8>>,
    headers: Vec<HeaderArtifact>,
}

pub(crate) struct EngineState {
    pub settings: Settings,
    pub database: CompilationDatabase,
    pub compiler: Arc<dyn Compiler>,
    pub resolver: Option<Arc<dyn TemplateResolver>>,
    pub features: Option<Arc<dyn FeatureProvider>>,
    pub registry: Mutex<IndexRegistry>,
    /// In-memory header indices, one per header path, alive for the engine's
    /// lifetime.
    pub header_store: Mutex<HashMap<String, HeaderIndex>>,
}

impl EngineState {
    /// The body of one indexing task: compile, build raw indices, merge
    /// header contexts, write blobs, snapshot the registry. Cancellation is
    /// observed between stages.
    pub(crate) async fn index_file(
        self: &Arc<Self>,
        file: &Path,
        token: &CancellationToken,
    ) -> IndexResult<()> {
        let path_str = file.to_string_lossy().into_owned();

        if !self.needs_index(file).await {
            debug!("index for {} is up to date", path_str);
            return Ok(());
        }
        self.check_cancelled(file, token)?;

        let Some(command) = self.database.command_for(file) else {
            return Err(IndexError::NotIndexable {
                path: file.to_path_buf(),
            });
        };
        let params = CompileParams {
            file: command.file.clone(),
            arguments: command.arguments.clone(),
            directory: command.directory.clone(),
        };

        let compiler = self.compiler.clone();
        let unit = tokio::task::spawn_blocking(move || compiler.compile(&params))
            .await
            .map_err(|e| IndexError::CompileFailed {
                path: file.to_path_buf(),
                reason: e.to_string(),
            })?
            .map_err(|reason| IndexError::CompileFailed {
                path: file.to_path_buf(),
                reason,
            })?;
        self.check_cancelled(file, token)?;

        let output = self.build_artifacts(unit).await?;
        self.check_cancelled(file, token)?;

        // Fold the parse into the registry and the in-memory header
        // indices; collect the blob writes to perform afterwards. Locks are
        // released before any I/O.
        let writes = self.apply_parse(&path_str, output)?;

        for (path, data) in writes {
            self.check_cancelled(file, token)?;
            write_atomic(&path, &data).await?;
        }

        self.save_registry().await
    }

    fn check_cancelled(&self, file: &Path, token: &CancellationToken) -> IndexResult<()> {
        if token.is_cancelled() {
            Err(IndexError::Cancelled {
                path: file.to_path_buf(),
            })
        } else {
            Ok(())
        }
    }

    /// Compare registry mtimes against the filesystem. Unknown files and
    /// stat failures count as stale; a fresh record must dominate both the
    /// source and every header it pulled in.
    async fn needs_index(&self, file: &Path) -> bool {
        let snapshot = {
            let registry = self.registry.lock();
            registry.tu_id(&file.to_string_lossy()).map(|id| {
                let tu = registry.tu(id);
                let headers: Vec<String> = tu
                    .headers
                    .iter()
                    .map(|&h| registry.header(h).src_path.clone())
                    .collect();
                (tu.mtime_ms, tu.src_path.clone(), headers)
            })
        };

        let Some((mtime_ms, src_path, headers)) = snapshot else {
            return true;
        };

        if mtime_of(&src_path).await.is_none_or(|m| m > mtime_ms) {
            return true;
        }
        for header in headers {
            if mtime_of(&header).await.is_some_and(|m| m > mtime_ms) {
                return true;
            }
        }
        false
    }

    /// Run the builder and serializer on the worker pool.
    async fn build_artifacts(self: &Arc<Self>, unit: AstUnit) -> IndexResult<ParseOutput> {
        let resolver = self.resolver.clone();
        let features = self.features.clone();

        let result = tokio::task::spawn_blocking(move || {
            let mut builder = IndexBuilder::new(&unit);
            if let Some(resolver) = resolver.as_deref() {
                builder = builder.with_resolver(resolver);
            }
            let mut indices = builder.build();

            let main_raw = indices.remove(&AstUnit::MAIN_FILE).unwrap_or_default();
            let tu_index = TuIndex::build(&unit, main_raw);
            let main_blob = binary::serialize(&tu_index.raw);
            let main_feature = features
                .as_ref()
                .and_then(|f| f.features(&unit, AstUnit::MAIN_FILE));

            let mut headers = Vec::with_capacity(indices.len());
            for (file_id, raw) in indices {
                // A touched file without an include location cannot provide
                // a header context (its inclusion was guard-skipped).
                let Some(include) = tu_index.graph.include_of(file_id) else {
                    debug!("no include location for {}", unit.file_path(file_id).display());
                    continue;
                };

                let blob = binary::serialize(&raw);
                let symbol_hash = binary::content_hash(&blob);
                let feature_blob = features.as_ref().and_then(|f| f.features(&unit, file_id));
                let feature_hash = feature_blob
                    .as_deref()
                    .map(binary::content_hash)
                    .unwrap_or(0);

                headers.push(HeaderArtifact {
                    file_path: unit.file_path(file_id).to_string_lossy().into_owned(),
                    include,
                    raw,
                    blob,
                    symbol_hash,
                    feature_blob,
                    feature_hash,
                });
            }
            // Stable processing order keeps logs and slot assignment
            // readable.
            headers.sort_by(|a, b| a.file_path.cmp(&b.file_path));

            ParseOutput {
                tu_index,
                main_blob,
                main_feature,
                headers,
            }
        })
        .await;

        result.map_err(|e| IndexError::CompileFailed {
            path: PathBuf::new(),
            reason: format!("index build panicked: {e}"),
        })
    }

    /// Registry + header-store mutation for one successful parse. Returns
    /// the blob writes to perform. Synchronous: both locks are taken and
    /// released inside.
    fn apply_parse(&self, tu_path: &str, output: ParseOutput) -> IndexResult<Vec<(String, Vec<u8>)>> {
        let mut registry = self.registry.lock();
        let mut store = self.header_store.lock();

        let tu = registry.get_or_create_tu(tu_path);

        // A re-index replaces everything the previous parse contributed.
        for header_path in registry.clear_tu_contexts(tu) {
            if let Some(header_index) = store.get_mut(&header_path) {
                header_index.remove(tu_path);
            }
        }
        registry.apply_unit(tu, &output.tu_index);

        let mut writes = Vec::new();

        if registry.tu(tu).index_path.is_empty() {
            let prefix = registry.index_path_for(tu_path);
            registry.tu_mut(tu).index_path = prefix;
        }
        let prefix = registry.tu(tu).index_path.clone();
        writes.push((format!("{prefix}.sidx"), output.main_blob));
        if let Some(feature_blob) = output.main_feature {
            writes.push((format!("{prefix}.fidx"), feature_blob));
        }

        for artifact in output.headers {
            let include = artifact.include;
            let header_id = registry.add_header_context(tu, &artifact.file_path, include);
            store
                .entry(artifact.file_path.clone())
                .or_default()
                .merge(tu_path, include, artifact.raw)?;

            let (slot, fresh) = registry.assign_header_index(
                header_id,
                tu,
                include,
                artifact.symbol_hash,
                artifact.feature_hash,
            );
            if fresh {
                let blob_prefix = registry
                    .header_index_path(header_id, slot)
                    .expect("slot just assigned")
                    .to_string();
                writes.push((format!("{blob_prefix}.sidx"), artifact.blob));
                if let Some(feature_blob) = artifact.feature_blob {
                    writes.push((format!("{blob_prefix}.fidx"), feature_blob));
                }
            }
        }

        Ok(writes)
    }

    async fn save_registry(&self) -> IndexResult<()> {
        let (dir, json) = {
            let registry = self.registry.lock();
            let json = serde_json::to_vec_pretty(&registry.snapshot()).expect("snapshot serializes");
            (registry.dir().to_path_buf(), json)
        };
        write_atomic(&dir.join(SNAPSHOT_FILE).to_string_lossy(), &json).await
    }
}

async fn mtime_of(path: &str) -> Option<i64> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    let modified = meta.modified().ok()?;
    let duration = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(duration.as_millis() as i64)
}

async fn write_atomic(path: &str, data: &[u8]) -> IndexResult<()> {
    let temp = format!("{path}.tmp");
    tokio::fs::write(&temp, data)
        .await
        .map_err(|e| IndexError::FileWrite {
            path: PathBuf::from(&temp),
            source: e,
        })?;
    tokio::fs::rename(&temp, path)
        .await
        .map_err(|e| IndexError::FileWrite {
            path: PathBuf::from(path),
            source: e,
        })
}

/// A group of header contexts sharing one on-disk index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderContextGroup {
    pub index_path: String,
    pub contexts: Vec<ContextInfo>,
}

/// One header context as presented to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    /// Source path of the including translation unit.
    pub tu: String,
    /// Include-location index within that TU.
    pub include: u32,
    pub version: u32,
}

/// One frame of a resolved include chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeFrame {
    pub path: String,
    pub line: u32,
}

pub struct IndexEngine {
    state: Arc<EngineState>,
    scheduler: IndexScheduler,
}

impl IndexEngine {
    pub fn new(
        settings: Settings,
        database: CompilationDatabase,
        compiler: Arc<dyn Compiler>,
    ) -> Self {
        Self::with_hooks(settings, database, compiler, None, None)
    }

    pub fn with_hooks(
        settings: Settings,
        database: CompilationDatabase,
        compiler: Arc<dyn Compiler>,
        resolver: Option<Arc<dyn TemplateResolver>>,
        features: Option<Arc<dyn FeatureProvider>>,
    ) -> Self {
        if let Err(e) = std::fs::create_dir_all(&settings.index.dir) {
            tracing::warn!(
                "failed to create index directory {}: {e}",
                settings.index.dir.display()
            );
        }
        let registry =
            IndexRegistry::load_or_default(&settings.index.dir, settings.index.gc_orphans);
        let concurrency = settings.index.concurrency;

        let state = Arc::new(EngineState {
            settings,
            database,
            compiler,
            resolver,
            features,
            registry: Mutex::new(registry),
            header_store: Mutex::new(HashMap::new()),
        });
        let scheduler = IndexScheduler::new(state.clone(), concurrency);

        Self { state, scheduler }
    }

    /// Request (re)indexing of one file.
    pub fn add(&self, file: &Path) {
        self.scheduler.add(file.to_path_buf());
    }

    /// Drop interest in a file: dequeue or cancel its task.
    pub fn remove(&self, file: &Path) {
        self.scheduler.remove(file);
    }

    /// Queue every entry of the compilation database. TU records the
    /// database no longer lists are retired first; their blobs become
    /// collectable orphans.
    pub fn index_all(&self) {
        {
            let mut registry = self.state.registry.lock();
            let mut store = self.state.header_store.lock();

            let known: Vec<String> = registry
                .tus()
                .filter(|(_, tu)| tu.mtime_ms != 0)
                .map(|(_, tu)| tu.src_path.clone())
                .collect();
            for src_path in known {
                if self.state.database.command_for(Path::new(&src_path)).is_none() {
                    debug!("retiring {} (no longer in the compilation database)", src_path);
                    for header_path in registry.drop_tu(&src_path) {
                        if let Some(header_index) = store.get_mut(&header_path) {
                            header_index.remove(&src_path);
                        }
                    }
                }
            }
        }

        self.scheduler.index_all();
    }

    /// Wait until the scheduler drains. Mostly useful for batch runs and
    /// tests.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    pub fn running_count(&self) -> usize {
        self.scheduler.running_count()
    }

    pub fn pending_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// Persist the registry snapshot now.
    pub fn save(&self) -> IndexResult<()> {
        self.state.registry.lock().save()
    }

    /// Answer a position query: every `(path, range)` whose relation kind
    /// intersects `mask`, looking at the minimum set of blobs.
    pub async fn lookup(
        &self,
        file: &Path,
        offset: u32,
        mask: RelationKind,
    ) -> IndexResult<Vec<LookupHit>> {
        let (origin, others) = {
            let registry = self.state.registry.lock();
            let Some(origin) = registry.origin_blob(&file.to_string_lossy()) else {
                return Ok(Vec::new());
            };
            (origin, registry.all_blobs())
        };

        tokio::task::spawn_blocking(move || lookup::run_query(&origin, offset, mask, &others))
            .await
            .expect("lookup task panicked")
    }

    /// Resolve hierarchy entry points at a cursor position.
    pub async fn hierarchy_prepare(
        &self,
        file: &Path,
        offset: u32,
    ) -> IndexResult<Vec<HierarchyItem>> {
        let origin = {
            let registry = self.state.registry.lock();
            registry.origin_blob(&file.to_string_lossy())
        };
        let Some(origin) = origin else {
            return Ok(Vec::new());
        };
        tokio::task::spawn_blocking(move || lookup::prepare_hierarchy(&origin, offset))
            .await
            .expect("hierarchy task panicked")
    }

    pub async fn incoming_calls(&self, target: &SymbolTarget) -> Vec<LookupHit> {
        self.relations_of(target, RelationKind::CALLEE).await
    }

    pub async fn outgoing_calls(&self, target: &SymbolTarget) -> Vec<LookupHit> {
        self.relations_of(target, RelationKind::CALLER).await
    }

    pub async fn supertypes(&self, target: &SymbolTarget) -> Vec<LookupHit> {
        self.relations_of(target, RelationKind::BASE).await
    }

    pub async fn subtypes(&self, target: &SymbolTarget) -> Vec<LookupHit> {
        self.relations_of(target, RelationKind::DERIVED).await
    }

    async fn relations_of(&self, target: &SymbolTarget, mask: RelationKind) -> Vec<LookupHit> {
        let blobs = {
            let registry = self.state.registry.lock();
            registry.all_blobs()
        };
        let target = target.clone();
        tokio::task::spawn_blocking(move || lookup::relations_of(&target, mask, &blobs))
            .await
            .expect("relations task panicked")
    }

    /// Every header context of `file`, grouped by the on-disk index file
    /// holding its content.
    pub fn contexts_of(&self, file: &Path) -> Vec<HeaderContextGroup> {
        let registry = self.state.registry.lock();
        let Some(header_id) = registry.header_id(&file.to_string_lossy()) else {
            return Vec::new();
        };
        let header = registry.header(header_id);

        let mut groups: Vec<HeaderContextGroup> = header
            .indices
            .iter()
            .map(|meta| HeaderContextGroup {
                index_path: meta.path.clone(),
                contexts: Vec::new(),
            })
            .collect();

        let mut tu_entries: Vec<_> = header.contexts.iter().collect();
        tu_entries.sort_by(|a, b| {
            registry
                .tu(*a.0)
                .src_path
                .cmp(&registry.tu(*b.0).src_path)
        });

        for (tu, entries) in tu_entries {
            let record = registry.tu(*tu);
            for entry in entries {
                if entry.index_slot == NO_SLOT {
                    continue;
                }
                groups[entry.index_slot as usize].contexts.push(ContextInfo {
                    tu: record.src_path.clone(),
                    include: entry.include,
                    version: record.version,
                });
            }
        }

        groups.retain(|g| !g.contexts.is_empty());
        groups
    }

    /// The context presented as active for a header. Which one is "active"
    /// is a UI choice; this returns the first, like the original server.
    pub fn current_context(&self, file: &Path) -> Option<ContextInfo> {
        self.contexts_of(file)
            .into_iter()
            .next()
            .and_then(|group| group.contexts.into_iter().next())
    }

    /// Resolve a context to its `#include` stack, innermost first.
    pub fn resolve_context(&self, context: &ContextInfo) -> Vec<IncludeFrame> {
        let registry = self.state.registry.lock();
        let Some(tu) = registry.tu_id(&context.tu) else {
            return Vec::new();
        };
        registry
            .resolve_chain(tu, context.include)
            .into_iter()
            .map(|(path, line)| IncludeFrame { path, line })
            .collect()
    }
}

