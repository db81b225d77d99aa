//! Builds per-file raw indices from one compiled translation unit.
//!
//! Recursive descent over the declaration tree. Every node with a valid
//! location inside an interested file contributes an occurrence and/or a
//! relation; everything else is skipped silently and its children are still
//! visited. The builder never fails; a partially built result is valid.

use crate::ast::{AstNode, AstUnit, DeclId, LocationClass, NodeKind, SourceLoc, TemplateResolver};
use crate::index::raw::RawIndex;
use crate::symbol::Relation;
use crate::types::{FileId, RelationKind, SymbolId};
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub struct IndexBuilder<'a> {
    unit: &'a AstUnit,
    resolver: Option<&'a dyn TemplateResolver>,
    /// When set, only these files receive index entries.
    interested: Option<HashSet<FileId>>,
    /// Cache of normalized declaration -> symbol id.
    symbol_ids: HashMap<DeclId, SymbolId>,
    indices: HashMap<FileId, RawIndex>,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(unit: &'a AstUnit) -> Self {
        Self {
            unit,
            resolver: None,
            interested: None,
            symbol_ids: HashMap::new(),
            indices: HashMap::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: &'a dyn TemplateResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_interest(mut self, files: HashSet<FileId>) -> Self {
        self.interested = Some(files);
        self
    }

    /// Walk the unit and return one raw index per touched file.
    pub fn build(mut self) -> HashMap<FileId, RawIndex> {
        let roots = &self.unit.roots;
        for node in roots {
            self.visit(node);
        }
        self.indices
    }

    fn visit(&mut self, node: &AstNode) {
        self.handle_node(node);
        for child in &node.children {
            self.visit(child);
        }
    }

    fn handle_node(&mut self, node: &AstNode) {
        match &node.kind {
            NodeKind::Declaration => {
                self.handle_occurrence(node.decl, node.loc, RelationKind::DECLARATION);
            }
            NodeKind::Definition => {
                self.handle_occurrence(node.decl, node.loc, RelationKind::DEFINITION);
            }
            NodeKind::Reference => {
                self.handle_occurrence(node.decl, node.loc, RelationKind::REFERENCE);
            }
            NodeKind::Read => {
                self.handle_occurrence(node.decl, node.loc, RelationKind::READ);
            }
            NodeKind::Write => {
                self.handle_occurrence(node.decl, node.loc, RelationKind::WRITE);
            }
            NodeKind::Call { caller } => {
                // A call is a reference to the callee, plus the paired
                // caller/callee edges used by the call hierarchy.
                self.handle_occurrence(node.decl, node.loc, RelationKind::REFERENCE);
                self.add_paired(
                    node.loc,
                    *caller,
                    RelationKind::CALLER,
                    node.decl,
                    RelationKind::CALLEE,
                );
            }
            NodeKind::Inherit { base } => {
                self.handle_occurrence(*base, node.loc, RelationKind::REFERENCE);
                self.add_paired(
                    node.loc,
                    node.decl,
                    RelationKind::BASE,
                    *base,
                    RelationKind::DERIVED,
                );
            }
            NodeKind::TypeAliasOf { underlying } => {
                self.handle_occurrence(node.decl, node.loc, RelationKind::DECLARATION);
                self.add_paired(
                    node.loc,
                    node.decl,
                    RelationKind::TYPE_DEFINITION,
                    *underlying,
                    RelationKind::TYPE_DEFINITION,
                );
            }
            NodeKind::Construct { class } => {
                self.handle_occurrence(node.decl, node.loc, RelationKind::DEFINITION);
                self.add_paired(
                    node.loc,
                    *class,
                    RelationKind::CONSTRUCTOR,
                    node.decl,
                    RelationKind::CONSTRUCTOR,
                );
            }
            NodeKind::Destruct { class } => {
                self.handle_occurrence(node.decl, node.loc, RelationKind::DEFINITION);
                self.add_paired(
                    node.loc,
                    *class,
                    RelationKind::DESTRUCTOR,
                    node.decl,
                    RelationKind::DESTRUCTOR,
                );
            }
            NodeKind::DependentName { name } => {
                // Best effort: record a reference to every candidate the
                // resolver yields.
                let candidates = match self.resolver {
                    Some(resolver) => resolver.resolve(self.unit, name),
                    None => Vec::new(),
                };
                for candidate in candidates {
                    self.handle_occurrence(candidate, node.loc, RelationKind::REFERENCE);
                }
            }
        }
    }

    /// Record one occurrence of `decl` with the given relation kind.
    ///
    /// The occurrence is added at the **spelling** location for
    /// declaration/definition/reference kinds when the location is a plain
    /// file location or a macro-argument expansion, the positions a user
    /// can trigger go-to on. The relation itself always uses the
    /// **expansion** range, so macro sources show which expansion produced
    /// it.
    fn handle_occurrence(&mut self, decl: DeclId, loc: Option<SourceLoc>, kind: RelationKind) {
        let Some(loc) = loc else {
            debug!("dropping node without a valid location");
            return;
        };
        if !self.is_interested(loc.file) {
            return;
        }

        let id = self.symbol_id(decl);
        self.ensure_symbol(loc.file, decl, id);

        let wants_occurrence = kind
            .intersects(RelationKind::DECLARATION | RelationKind::DEFINITION | RelationKind::REFERENCE);
        let triggerable = matches!(loc.class, LocationClass::File | LocationClass::MacroArg);
        if wants_occurrence && triggerable {
            self.index_for(loc.file).add_occurrence(loc.spelling, id);
        }

        self.index_for(loc.file)
            .add_relation(id, Relation::new(kind, loc.expansion, SymbolId::NONE));
    }

    /// Add the symmetric pair of relations between two declarations at one
    /// site, e.g. caller/callee or base/derived.
    fn add_paired(
        &mut self,
        loc: Option<SourceLoc>,
        first: DeclId,
        first_kind: RelationKind,
        second: DeclId,
        second_kind: RelationKind,
    ) {
        let Some(loc) = loc else {
            return;
        };
        if !self.is_interested(loc.file) {
            return;
        }

        let first_id = self.symbol_id(first);
        let second_id = self.symbol_id(second);
        self.ensure_symbol(loc.file, first, first_id);
        self.ensure_symbol(loc.file, second, second_id);

        let index = self.index_for(loc.file);
        index.add_relation(
            first_id,
            Relation::new(first_kind, loc.expansion, second_id),
        );
        index.add_relation(
            second_id,
            Relation::new(second_kind, loc.expansion, first_id),
        );
    }

    /// Normalize a declaration to the entity the index identifies it with:
    /// the canonical (first) declaration; for template specializations the
    /// primary template, unless the specialization is explicit; for members
    /// of implicit instantiations the corresponding pattern member.
    fn normalize(&self, decl: DeclId) -> DeclId {
        let canonical = self.canonical(decl);
        let record = self.unit.decl(canonical);

        if let Some(primary) = record.primary_template {
            if !record.is_explicit_specialization {
                return self.canonical(primary);
            }
        }
        if let Some(member) = record.pattern_member {
            return self.canonical(member);
        }
        canonical
    }

    fn canonical(&self, decl: DeclId) -> DeclId {
        self.unit.decl(decl).canonical.unwrap_or(decl)
    }

    fn symbol_id(&mut self, decl: DeclId) -> SymbolId {
        let normalized = self.normalize(decl);
        if let Some(&id) = self.symbol_ids.get(&normalized) {
            return id;
        }
        let id = SymbolId::from_usr(&self.unit.decl(normalized).usr);
        self.symbol_ids.insert(normalized, id);
        id
    }

    /// Fill in the symbol record (name, kind) the first time the file sees
    /// this symbol.
    fn ensure_symbol(&mut self, file: FileId, decl: DeclId, id: SymbolId) {
        let normalized = self.normalize(decl);
        let record = self.unit.decl(normalized);
        let symbol = self.index_for(file).get_symbol(id);
        if symbol.name.is_empty() {
            symbol.name = record.name.clone();
            symbol.kind = record.kind;
        }
    }

    fn index_for(&mut self, file: FileId) -> &mut RawIndex {
        self.indices.entry(file).or_default()
    }

    fn is_interested(&self, file: FileId) -> bool {
        match &self.interested {
            Some(set) => set.contains(&file),
            None => true,
        }
    }
}

/// Convenience entry point: index the whole unit.
pub fn index_unit(unit: &AstUnit) -> HashMap<FileId, RawIndex> {
    IndexBuilder::new(unit).build()
}
