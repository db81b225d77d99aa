//! Bounded-concurrency indexing driver.
//!
//! At most `concurrency` translation units index at once; excess requests
//! queue in insertion order. A repeated `add` for a running file supersedes
//! the stale task: the old one is cancelled (observed at its next await
//! point) and a fresh task takes its slot immediately.

use crate::engine::EngineState;
use crate::error::IndexError;
use indexmap::IndexSet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct RunningTask {
    /// Monotonic id distinguishing this task from one that superseded it.
    id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    running: HashMap<PathBuf, RunningTask>,
    pending: IndexSet<PathBuf>,
    next_task_id: u64,
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    engine: Arc<EngineState>,
    concurrency: usize,
}

#[derive(Clone)]
pub struct IndexScheduler {
    inner: Arc<SchedulerInner>,
}

impl IndexScheduler {
    pub fn new(engine: Arc<EngineState>, concurrency: usize) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedulerState::default()),
                engine,
                concurrency: concurrency.max(1),
            }),
        }
    }

    /// Request indexing of `file`. The last request wins: a running task for
    /// the same file is cancelled and restarted, a queued one stays queued.
    pub fn add(&self, file: PathBuf) {
        let mut state = self.inner.state.lock();

        if state.running.contains_key(&file) {
            // A newer request supersedes the stale task.
            let old = state.running.remove(&file).expect("checked above");
            old.token.cancel();
            old.handle.abort();
            debug!("restarting index task for {}", file.display());
            self.spawn_locked(&mut state, file);
            return;
        }

        if state.running.len() < self.inner.concurrency {
            state.pending.shift_remove(&file);
            self.spawn_locked(&mut state, file);
        } else {
            state.pending.insert(file);
        }
    }

    /// Drop interest in `file`: dequeue it, or cancel its running task.
    pub fn remove(&self, file: &Path) {
        let mut state = self.inner.state.lock();

        if state.pending.shift_remove(file) {
            return;
        }

        if let Some(task) = state.running.remove(file) {
            task.token.cancel();
            task.handle.abort();
            debug!("cancelled index task for {}", file.display());
        }
    }

    /// Queue every entry of the compilation database.
    pub fn index_all(&self) {
        let files: Vec<PathBuf> = self
            .inner
            .engine
            .database
            .files()
            .map(Path::to_path_buf)
            .collect();
        for file in files {
            self.add(file);
        }
    }

    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Wait until no task is running or queued.
    pub async fn wait_idle(&self) {
        loop {
            {
                let state = self.inner.state.lock();
                if state.running.is_empty() && state.pending.is_empty() {
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    fn spawn_locked(&self, state: &mut SchedulerState, file: PathBuf) {
        let id = state.next_task_id;
        state.next_task_id += 1;

        let token = CancellationToken::new();
        let scheduler = self.clone();
        let engine = self.inner.engine.clone();
        let task_token = token.clone();
        let task_file = file.clone();

        let handle = tokio::spawn(async move {
            let result = engine.index_file(&task_file, &task_token).await;
            match &result {
                Ok(()) => info!("indexed {}", task_file.display()),
                Err(IndexError::Cancelled { .. }) => {
                    debug!("index task for {} cancelled", task_file.display())
                }
                Err(e) if e.is_fatal() => error!("{e}"),
                Err(e) => warn!("{e}"),
            }
            scheduler.finish(&task_file, id);
        });

        state.running.insert(file, RunningTask { id, token, handle });
    }

    /// Called by a task on completion: release the slot and start the next
    /// queued file, if any.
    fn finish(&self, file: &Path, id: u64) {
        let mut state = self.inner.state.lock();

        match state.running.get(file) {
            Some(task) if task.id == id => {
                state.running.remove(file);
            }
            // Superseded or explicitly removed; the slot is not ours.
            _ => return,
        }

        if let Some(next) = state.pending.shift_remove_index(0) {
            self.spawn_locked(&mut state, next);
        }
    }
}
