//! The raw per-file index: the output of indexing one (TU, file) pair.
//!
//! A raw index represents one concrete parse and carries no context
//! structure. It is either written to disk verbatim (for a TU's main file)
//! or consumed into a [`HeaderIndex`](super::header::HeaderIndex).

use crate::symbol::{Occurrence, Relation, Symbol};
use crate::types::{Range, SymbolId};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct RawIndex {
    pub symbols: HashMap<SymbolId, Symbol>,
    pub occurrences: HashMap<Range, Vec<Occurrence>>,
}

impl RawIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or insert the symbol with the given id.
    pub fn get_symbol(&mut self, id: SymbolId) -> &mut Symbol {
        self.symbols.entry(id).or_insert_with(|| Symbol::new(id))
    }

    /// Add a relation to a symbol, deduplicating by
    /// `(kind, range, target_symbol)`.
    pub fn add_relation(&mut self, id: SymbolId, relation: Relation) -> bool {
        self.get_symbol(id).add_relation(relation)
    }

    /// Record that the span `range` resolves to `target_symbol`. Duplicate
    /// targets at the same range collapse into one record.
    pub fn add_occurrence(&mut self, range: Range, target_symbol: SymbolId) {
        let group = self.occurrences.entry(range).or_default();
        if !group.iter().any(|o| o.target_symbol == target_symbol) {
            group.push(Occurrence::new(target_symbol));
        }
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn occurrence_count(&self) -> usize {
        self.occurrences.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty() && self.occurrences.is_empty()
    }

    /// Total number of relation and occurrence records.
    pub fn element_count(&self) -> usize {
        self.symbols.values().map(|s| s.relations.len()).sum::<usize>() + self.occurrence_count()
    }
}
