//! Symbols, relations and occurrences: the record types every index stores.

use crate::types::{Contextual, Range, RelationKind, SymbolId, SymbolKind};

/// An edge attached to a symbol at a source range.
///
/// `target_symbol` is `SymbolId::NONE` when the relation is self-contained
/// (a declaration or definition of the symbol itself). The context tag never
/// participates in equality or hashing; two relations are the same edge if
/// `(kind, range, target_symbol)` match, and their contexts are merged.
#[derive(Debug, Clone, Copy)]
pub struct Relation {
    pub kind: RelationKind,
    pub range: Range,
    pub target_symbol: SymbolId,
    pub ctx: Contextual,
}

impl Relation {
    pub fn new(kind: RelationKind, range: Range, target_symbol: SymbolId) -> Self {
        Self {
            kind,
            range,
            target_symbol,
            ctx: Contextual::default(),
        }
    }

    fn key(&self) -> (u32, Range, SymbolId) {
        (self.kind.bits(), self.range, self.target_symbol)
    }
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Relation {}

impl std::hash::Hash for Relation {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// One textual span resolved to a symbol. Occurrences live in a map keyed by
/// range, so the range itself is not repeated here; several occurrences may
/// share a range (overloads, template uses).
#[derive(Debug, Clone, Copy)]
pub struct Occurrence {
    pub target_symbol: SymbolId,
    pub ctx: Contextual,
}

impl Occurrence {
    pub fn new(target_symbol: SymbolId) -> Self {
        Self {
            target_symbol,
            ctx: Contextual::default(),
        }
    }
}

/// A symbol with its deduplicated relation set.
#[derive(Debug, Clone, Default)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    pub relations: Vec<Relation>,
}

impl Symbol {
    pub fn new(id: SymbolId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Insert a relation, deduplicating by `(kind, range, target_symbol)`.
    ///
    /// Returns the stored relation and whether it was newly inserted. A
    /// symbol's relation set is small in practice (a handful of edges), so
    /// a linear scan beats any hashed structure here and keeps the context
    /// slot mutable after insertion.
    pub fn insert_relation(&mut self, relation: Relation) -> (&mut Relation, bool) {
        if let Some(pos) = self.relations.iter().position(|r| *r == relation) {
            (&mut self.relations[pos], false)
        } else {
            self.relations.push(relation);
            let last = self.relations.len() - 1;
            (&mut self.relations[last], true)
        }
    }

    pub fn add_relation(&mut self, relation: Relation) -> bool {
        self.insert_relation(relation).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_equality_ignores_ctx() {
        let mut a = Relation::new(RelationKind::REFERENCE, Range::new(1, 2), SymbolId::NONE);
        let b = Relation::new(RelationKind::REFERENCE, Range::new(1, 2), SymbolId::NONE);
        a.ctx = Contextual::independent(99);

        assert_eq!(a, b);
    }

    #[test]
    fn test_relation_distinct_by_kind_range_target() {
        let base = Relation::new(RelationKind::REFERENCE, Range::new(1, 2), SymbolId::NONE);

        let other_kind = Relation::new(RelationKind::DEFINITION, Range::new(1, 2), SymbolId::NONE);
        let other_range = Relation::new(RelationKind::REFERENCE, Range::new(1, 3), SymbolId::NONE);
        let other_target = Relation::new(RelationKind::REFERENCE, Range::new(1, 2), SymbolId(7));

        assert_ne!(base, other_kind);
        assert_ne!(base, other_range);
        assert_ne!(base, other_target);
    }

    #[test]
    fn test_symbol_relation_dedup() {
        let mut symbol = Symbol::new(SymbolId(1));
        let relation = Relation::new(RelationKind::DEFINITION, Range::new(0, 3), SymbolId::NONE);

        assert!(symbol.add_relation(relation));
        assert!(!symbol.add_relation(relation));
        assert_eq!(symbol.relations.len(), 1);
    }

    #[test]
    fn test_insert_relation_keeps_first_ctx_slot() {
        let mut symbol = Symbol::new(SymbolId(1));
        let mut first = Relation::new(RelationKind::REFERENCE, Range::new(0, 3), SymbolId::NONE);
        first.ctx = Contextual::dependent(5);
        symbol.add_relation(first);

        let dup = Relation::new(RelationKind::REFERENCE, Range::new(0, 3), SymbolId::NONE);
        let (stored, inserted) = symbol.insert_relation(dup);
        assert!(!inserted);
        assert_eq!(stored.ctx, Contextual::dependent(5));
    }
}
