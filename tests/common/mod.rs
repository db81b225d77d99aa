//! Shared fixtures: a scriptable mock compiler and an annotated-source
//! helper for position tests.
#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tundra::ast::{
    AstFile, AstInclude, AstNode, AstUnit, CompilationDatabase, CompileCommand, CompileParams,
    Compiler, Declaration, IncludeSite, NodeKind, SourceLoc,
};
use tundra::types::{FileId, Range, SymbolKind};

/// Strip `@N` markers from an annotated source, returning the clean text
/// and the byte offset of each marker.
///
/// ```ignore
/// let (text, pos) = markers("int @1x = 1;");
/// assert_eq!(&text[pos[&1] as usize..][..1], "x");
/// ```
pub fn markers(source: &str) -> (String, HashMap<u32, u32>) {
    let mut text = String::with_capacity(source.len());
    let mut positions = HashMap::new();
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '@' && chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            let mut number = 0u32;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                number = number * 10 + d;
                chars.next();
            }
            positions.insert(number, text.len() as u32);
        } else {
            text.push(c);
        }
    }
    (text, positions)
}

/// Incrementally assembled [`AstUnit`] for tests.
pub struct UnitBuilder {
    unit: AstUnit,
}

impl UnitBuilder {
    pub fn new(main_path: impl Into<PathBuf>) -> Self {
        let mut unit = AstUnit::default();
        unit.files.push(AstFile {
            path: main_path.into(),
            included_at: None,
        });
        Self { unit }
    }

    /// Add an included file and its directive; returns the new file id.
    pub fn include(&mut self, path: impl Into<PathBuf>, includer: FileId, line: u32) -> FileId {
        let id = FileId(self.unit.files.len() as u32);
        self.unit.files.push(AstFile {
            path: path.into(),
            included_at: Some(IncludeSite { includer, line }),
        });
        self.unit.includes.push(AstInclude {
            file: Some(id),
            includer,
            line,
        });
        id
    }

    pub fn decl(&mut self, name: &str, usr: &str, kind: SymbolKind) -> tundra::ast::DeclId {
        let id = tundra::ast::DeclId(self.unit.decls.len() as u32);
        self.unit.decls.push(Declaration::new(name, usr, kind));
        id
    }

    pub fn node(
        &mut self,
        decl: tundra::ast::DeclId,
        kind: NodeKind,
        file: FileId,
        begin: u32,
        end: u32,
    ) -> &mut Self {
        self.unit.roots.push(AstNode::new(
            decl,
            kind,
            Some(SourceLoc::file_loc(file, Range::new(begin, end))),
        ));
        self
    }

    pub fn build(self) -> AstUnit {
        self.unit
    }
}

/// A compiler that serves pre-built units, counts invocations, and can be
/// slowed down to observe scheduling.
#[derive(Default)]
pub struct MockCompiler {
    units: Mutex<HashMap<PathBuf, AstUnit>>,
    pub compile_count: AtomicUsize,
    pub delay: Option<Duration>,
}

impl MockCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn provide(&self, file: impl Into<PathBuf>, unit: AstUnit) {
        self.units.lock().insert(file.into(), unit);
    }

    pub fn compiles(&self) -> usize {
        self.compile_count.load(Ordering::SeqCst)
    }
}

impl Compiler for MockCompiler {
    fn compile(&self, params: &CompileParams) -> Result<AstUnit, String> {
        self.compile_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.units
            .lock()
            .get(&params.file)
            .cloned()
            .ok_or_else(|| format!("no unit scripted for {}", params.file.display()))
    }
}

/// A compilation database entry for every scripted file.
pub fn database_for(files: &[&Path]) -> CompilationDatabase {
    let mut db = CompilationDatabase::default();
    for file in files {
        db.insert(CompileCommand {
            file: file.to_path_buf(),
            directory: PathBuf::from("/"),
            arguments: vec!["clang++".into(), "-c".into()],
        });
    }
    db
}

/// Engine settings rooted in a temp directory, single-threaded by default
/// so tests are deterministic.
pub fn test_settings(dir: &Path, concurrency: usize) -> tundra::Settings {
    let mut settings = tundra::Settings::default();
    settings.index.dir = dir.join("index");
    settings.index.concurrency = concurrency;
    settings
}
