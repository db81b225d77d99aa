//! The translation-unit index: the main file's raw index plus the include
//! graph of the whole parse.

use crate::ast::AstUnit;
use crate::index::raw::RawIndex;
use crate::types::FileId;
use std::collections::HashMap;

/// Sentinel for "no parent include location".
pub const NO_INCLUDE: u32 = u32::MAX;

/// One `#include` directive in the reversed chain. The head of a chain is
/// the innermost directive; following `include` walks out towards the main
/// file (`NO_INCLUDE` terminates).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncludeLocation {
    /// Index into the unit's path list.
    pub path: u32,
    /// 1-based line of the directive, `NO_INCLUDE` for the main file entry.
    pub line: u32,
    /// Parent include-location index.
    pub include: u32,
}

/// The include graph of one translation unit.
///
/// A header without a guard macro or `#pragma once` introduces one entry per
/// inclusion; guarded repeats are skipped by the front-end and never appear
/// here.
#[derive(Debug, Clone, Default)]
pub struct IncludeGraph {
    /// Deduplicated file paths; a header included from many places stores
    /// its path once.
    pub paths: Vec<String>,
    /// All include locations of this unit.
    pub locations: Vec<IncludeLocation>,
    /// File id -> its include-location index.
    file_table: HashMap<FileId, u32>,
}

impl IncludeGraph {
    /// Build the graph from a compiled unit, memoizing shared chain
    /// prefixes.
    pub fn from_unit(unit: &AstUnit) -> Self {
        let mut graph = Self::default();
        let mut path_slots: HashMap<String, u32> = HashMap::new();

        for include in &unit.includes {
            if let Some(file) = include.file {
                graph.add_chain(unit, file, &mut path_slots);
            }
        }
        graph
    }

    fn add_chain(
        &mut self,
        unit: &AstUnit,
        file: FileId,
        path_slots: &mut HashMap<String, u32>,
    ) -> u32 {
        if let Some(&index) = self.file_table.get(&file) {
            return index;
        }

        let index = self.locations.len() as u32;
        self.file_table.insert(file, index);
        self.locations.push(IncludeLocation {
            path: 0,
            line: NO_INCLUDE,
            include: NO_INCLUDE,
        });

        let path_text = unit.file_path(file).to_string_lossy().into_owned();
        let path = *path_slots.entry(path_text.clone()).or_insert_with(|| {
            self.paths.push(path_text);
            self.paths.len() as u32 - 1
        });
        self.locations[index as usize].path = path;

        if let Some(site) = unit.file(file).included_at {
            let parent = self.add_chain(unit, site.includer, path_slots);
            self.locations[index as usize].line = site.line;
            self.locations[index as usize].include = parent;
        }

        index
    }

    pub fn include_of(&self, file: FileId) -> Option<u32> {
        self.file_table.get(&file).copied()
    }

    pub fn path(&self, path_ref: u32) -> &str {
        &self.paths[path_ref as usize]
    }

    /// Files with an include location, i.e. candidates for header contexts.
    pub fn files(&self) -> impl Iterator<Item = (FileId, u32)> + '_ {
        self.file_table.iter().map(|(&file, &index)| (file, index))
    }
}

/// The index of a translation unit's own main file.
#[derive(Debug, Default)]
pub struct TuIndex {
    pub raw: RawIndex,
    /// Milliseconds since the epoch when this index was built.
    pub time: i64,
    pub graph: IncludeGraph,
}

impl TuIndex {
    pub fn build(unit: &AstUnit, raw: RawIndex) -> Self {
        Self {
            raw,
            time: chrono::Utc::now().timestamp_millis(),
            graph: IncludeGraph::from_unit(unit),
        }
    }
}
