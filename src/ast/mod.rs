//! Interfaces to the external AST front-end.
//!
//! The engine never parses C/C++ itself. A [`Compiler`] implementation
//! (typically a clang wrapper) turns a compile command into an [`AstUnit`]:
//! a read-only tree of declaration nodes with source locations and a
//! macro-expansion map. The index builder walks that tree; everything else
//! in the engine is front-end agnostic.

use crate::error::{IndexError, IndexResult};
use crate::types::{FileId, Range, SymbolKind};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One entry of the compilation database: a source file and the argv used
/// to compile it.
#[derive(Debug, Clone)]
pub struct CompileCommand {
    pub file: PathBuf,
    pub directory: PathBuf,
    pub arguments: Vec<String>,
}

/// Map from source path to compiler argv, loaded from a
/// `compile_commands.json` in the standard format.
#[derive(Debug, Clone, Default)]
pub struct CompilationDatabase {
    commands: HashMap<PathBuf, CompileCommand>,
}

#[derive(Deserialize)]
struct RawCommand {
    directory: String,
    file: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<String>>,
}

impl CompilationDatabase {
    pub fn load(path: &Path) -> IndexResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| IndexError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let raw: Vec<RawCommand> =
            serde_json::from_str(&content).map_err(|e| IndexError::RegistryCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut db = Self::default();
        for entry in raw {
            let arguments = match (entry.arguments, entry.command) {
                (Some(args), _) => args,
                (None, Some(cmd)) => cmd.split_whitespace().map(str::to_string).collect(),
                (None, None) => continue,
            };
            db.insert(CompileCommand {
                file: PathBuf::from(entry.file),
                directory: PathBuf::from(entry.directory),
                arguments,
            });
        }
        Ok(db)
    }

    pub fn insert(&mut self, command: CompileCommand) {
        self.commands.insert(command.file.clone(), command);
    }

    pub fn command_for(&self, file: &Path) -> Option<&CompileCommand> {
        self.commands.get(file)
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.commands.keys().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Identifier of a declaration entity inside one [`AstUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeclId(pub u32);

/// How a source location relates to macro expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationClass {
    /// A plain file location, no macros involved.
    File,
    /// Inside the expansion of a macro argument; the spelling location is
    /// where the user actually wrote the token.
    MacroArg,
    /// Inside a macro body expansion; only the expansion site is meaningful.
    MacroBody,
}

/// A resolved source location within the unit.
///
/// `spelling` is where the token text physically lives, `expansion` where
/// the top-level macro expansion happened. For `LocationClass::File` the two
/// coincide.
#[derive(Debug, Clone, Copy)]
pub struct SourceLoc {
    pub file: FileId,
    pub class: LocationClass,
    pub spelling: Range,
    pub expansion: Range,
}

impl SourceLoc {
    pub fn file_loc(file: FileId, range: Range) -> Self {
        Self {
            file,
            class: LocationClass::File,
            spelling: range,
            expansion: range,
        }
    }
}

/// A declaration entity as the front-end reports it.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    /// Canonical textual form of this declaration (USR). Two declarations
    /// the front-end considers the same canonical entity share it.
    pub usr: String,
    pub kind: SymbolKind,
    /// First declaration in the redeclaration chain, if this is not it.
    pub canonical: Option<DeclId>,
    /// For template specializations and instantiations, the primary
    /// template. Normalization replaces the declaration with the primary
    /// unless it is an explicit (full) specialization, an approximation
    /// that papers over a front-end quirk when both explicit specializations
    /// and instantiations of the same template appear.
    pub primary_template: Option<DeclId>,
    pub is_explicit_specialization: bool,
    /// For members of an implicit class template instantiation, the
    /// corresponding member in the template pattern.
    pub pattern_member: Option<DeclId>,
}

impl Declaration {
    pub fn new(name: impl Into<String>, usr: impl Into<String>, kind: SymbolKind) -> Self {
        Self {
            name: name.into(),
            usr: usr.into(),
            kind,
            canonical: None,
            primary_template: None,
            is_explicit_specialization: false,
            pattern_member: None,
        }
    }
}

/// What one AST node contributes to the index. A closed tagged variant; the
/// front-end's dozens of node classes collapse into the cases the indexer
/// distinguishes.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Declaration,
    Definition,
    Reference,
    Read,
    Write,
    /// A call site: `decl` is the callee, `caller` the enclosing function.
    Call { caller: DeclId },
    /// A base-class specifier: `decl` is the derived class.
    Inherit { base: DeclId },
    /// A type alias: `decl` is the alias, pointing at the aliased type.
    TypeAliasOf { underlying: DeclId },
    /// A constructor declaration: `decl` is the constructor.
    Construct { class: DeclId },
    /// A destructor declaration: `decl` is the destructor.
    Destruct { class: DeclId },
    /// A dependent name the front-end could not resolve; the template
    /// resolver is consulted for candidates.
    DependentName { name: String },
}

/// One node of the declaration tree.
#[derive(Debug, Clone)]
pub struct AstNode {
    pub decl: DeclId,
    pub kind: NodeKind,
    /// `None` for invalid locations; such nodes contribute nothing but
    /// their children are still visited.
    pub loc: Option<SourceLoc>,
    pub children: Vec<AstNode>,
}

impl AstNode {
    pub fn new(decl: DeclId, kind: NodeKind, loc: Option<SourceLoc>) -> Self {
        Self {
            decl,
            kind,
            loc,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<AstNode>) -> Self {
        self.children = children;
        self
    }
}

/// Where a file was included from.
#[derive(Debug, Clone, Copy)]
pub struct IncludeSite {
    pub includer: FileId,
    /// 1-based line of the `#include` directive.
    pub line: u32,
}

/// One file touched by the translation unit.
#[derive(Debug, Clone)]
pub struct AstFile {
    pub path: PathBuf,
    /// `None` for the main file.
    pub included_at: Option<IncludeSite>,
}

/// One `#include` directive observed during the parse.
#[derive(Debug, Clone, Copy)]
pub struct AstInclude {
    /// The file the directive brought in, or `None` when the inclusion was
    /// skipped by an include guard or `#pragma once`. Skipped inclusions
    /// produce no header context.
    pub file: Option<FileId>,
    pub includer: FileId,
    pub line: u32,
}

/// The compiled translation unit the index builder consumes.
#[derive(Debug, Clone, Default)]
pub struct AstUnit {
    pub files: Vec<AstFile>,
    pub decls: Vec<Declaration>,
    pub roots: Vec<AstNode>,
    pub includes: Vec<AstInclude>,
}

impl AstUnit {
    /// The main file always sits at index 0 of the file table.
    pub const MAIN_FILE: FileId = FileId(0);

    pub fn decl(&self, id: DeclId) -> &Declaration {
        &self.decls[id.0 as usize]
    }

    pub fn file(&self, id: FileId) -> &AstFile {
        &self.files[id.0 as usize]
    }

    pub fn file_path(&self, id: FileId) -> &Path {
        &self.files[id.0 as usize].path
    }

    pub fn file_ids(&self) -> impl Iterator<Item = FileId> {
        (0..self.files.len() as u32).map(FileId)
    }
}

/// Parameters handed to the compiler callable. Workers receive this struct
/// by value; the engine keeps no reference into it.
#[derive(Debug, Clone)]
pub struct CompileParams {
    pub file: PathBuf,
    pub arguments: Vec<String>,
    pub directory: PathBuf,
}

/// The external compiler front-end. Synchronous; the scheduler runs it on a
/// worker thread.
pub trait Compiler: Send + Sync {
    fn compile(&self, params: &CompileParams) -> Result<AstUnit, String>;
}

/// Best-effort resolver for qualified lookups into dependent names. The
/// builder records a reference relation to every candidate it yields.
pub trait TemplateResolver: Send + Sync {
    fn resolve(&self, unit: &AstUnit, name: &str) -> Vec<DeclId>;
}

/// Producer of opaque per-file feature blobs (semantic tokens, folding,
/// inlay hints). The engine stores the blob and its hash, nothing more.
pub trait FeatureProvider: Send + Sync {
    fn features(&self, unit: &AstUnit, file: FileId) -> Option<Vec<u8>>;
}
