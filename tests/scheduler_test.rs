//! Scheduler behavior: bounded concurrency, queueing, cancellation.

mod common;

use common::{MockCompiler, UnitBuilder, database_for, test_settings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tundra::IndexEngine;
use tundra::ast::NodeKind;
use tundra::types::{FileId, SymbolKind};

fn scripted_tu(dir: &TempDir, compiler: &MockCompiler, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, "int v;\n").unwrap();

    let mut unit = UnitBuilder::new(&path);
    let v = unit.decl("v", &format!("c:@{name}@v"), SymbolKind::Variable);
    unit.node(v, NodeKind::Definition, FileId(0), 4, 5);
    compiler.provide(&path, unit.build());
    path
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrency_is_bounded_and_pending_drains() {
    let dir = TempDir::new().unwrap();
    let compiler = Arc::new(MockCompiler::with_delay(Duration::from_millis(150)));

    let files: Vec<PathBuf> = (0..4)
        .map(|i| scripted_tu(&dir, &compiler, &format!("f{i}.cpp")))
        .collect();
    let refs: Vec<&std::path::Path> = files.iter().map(PathBuf::as_path).collect();

    let engine = IndexEngine::new(test_settings(dir.path(), 2), database_for(&refs), compiler.clone());
    for file in &files {
        engine.add(file);
    }

    // With capacity 2, two tasks run and two queue.
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(engine.running_count(), 2);
    assert_eq!(engine.pending_count(), 2);

    engine.wait_idle().await;
    assert_eq!(engine.running_count(), 0);
    assert_eq!(engine.pending_count(), 0);
    assert_eq!(compiler.compiles(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn readd_supersedes_running_task() {
    let dir = TempDir::new().unwrap();
    let compiler = Arc::new(MockCompiler::with_delay(Duration::from_millis(120)));
    let file = scripted_tu(&dir, &compiler, "main.cpp");

    let engine = IndexEngine::new(
        test_settings(dir.path(), 2),
        database_for(&[&file]),
        compiler.clone(),
    );

    engine.add(&file);
    tokio::time::sleep(Duration::from_millis(30)).await;
    // Supersede the in-flight task; the slot count must not grow.
    engine.add(&file);
    assert_eq!(engine.running_count(), 1);

    engine.wait_idle().await;
    assert_eq!(engine.running_count(), 0);

    // Both requests reached the compiler; the second finished the job.
    assert_eq!(compiler.compiles(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn remove_dequeues_pending_and_cancels_running() {
    let dir = TempDir::new().unwrap();
    let compiler = Arc::new(MockCompiler::with_delay(Duration::from_millis(150)));

    let running = scripted_tu(&dir, &compiler, "running.cpp");
    let queued = scripted_tu(&dir, &compiler, "queued.cpp");

    let engine = IndexEngine::new(
        test_settings(dir.path(), 1),
        database_for(&[&running, &queued]),
        compiler.clone(),
    );

    engine.add(&running);
    engine.add(&queued);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(engine.running_count(), 1);
    assert_eq!(engine.pending_count(), 1);

    // Dequeue the pending file: it never compiles.
    engine.remove(&queued);
    assert_eq!(engine.pending_count(), 0);

    // Cancel the running one.
    engine.remove(&running);
    assert_eq!(engine.running_count(), 0);

    engine.wait_idle().await;
    assert!(compiler.compiles() <= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn up_to_date_files_are_skipped() {
    let dir = TempDir::new().unwrap();
    let compiler = Arc::new(MockCompiler::new());
    let file = scripted_tu(&dir, &compiler, "main.cpp");

    let engine = IndexEngine::new(
        test_settings(dir.path(), 1),
        database_for(&[&file]),
        compiler.clone(),
    );

    engine.add(&file);
    engine.wait_idle().await;
    assert_eq!(compiler.compiles(), 1);

    // Unchanged on disk: the second add is a no-op.
    engine.add(&file);
    engine.wait_idle().await;
    assert_eq!(compiler.compiles(), 1);

    // Touch the file with a newer mtime: re-indexed.
    std::thread::sleep(Duration::from_millis(1100));
    std::fs::write(&file, "int v; // touched\n").unwrap();
    engine.add(&file);
    engine.wait_idle().await;
    assert_eq!(compiler.compiles(), 2);
}
