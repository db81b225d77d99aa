//! The header index: many parses of one header deduplicated into canonical
//! contexts.
//!
//! A header is re-parsed under every translation unit that includes it. Two
//! parses may produce identical content (same macro state, same declaration
//! set) or different content (`#ifdef`-gated). Storage here is proportional
//! to the number of distinct canonical contents, not to the number of
//! including TUs.
//!
//! Two identifier spaces:
//! - a **header context id** (hctx) per parse occurrence, never shared;
//! - a **canonical context id** (cctx) per distinct content, shared across
//!   header contexts whose dependent-element sets are identical.
//!
//! Both are allocated from rolling counters with FIFO freelists; removal is
//! by reference counting.

use crate::error::{IndexError, IndexResult};
use crate::index::raw::RawIndex;
use crate::types::Contextual;
use std::collections::{HashMap, HashSet, VecDeque, hash_map::Entry};

/// Width of the canonical-context bitmap: the number of simultaneously live
/// canonical contexts one header can have. Exceeding it is a fatal
/// configuration error.
pub const CONTEXT_BITS: u32 = 64;

/// Fixed-width bitmap over canonical context ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bitmap(u64);

impl Bitmap {
    pub const EMPTY: Bitmap = Bitmap(0);
    pub const FULL: Bitmap = Bitmap(u64::MAX);

    pub fn set(&mut self, bit: u32) {
        debug_assert!(bit < CONTEXT_BITS);
        self.0 |= 1 << bit;
    }

    pub fn reset(&mut self, bit: u32) {
        debug_assert!(bit < CONTEXT_BITS);
        self.0 &= !(1 << bit);
    }

    pub fn test(&self, bit: u32) -> bool {
        debug_assert!(bit < CONTEXT_BITS);
        self.0 & (1 << bit) != 0
    }

    pub fn intersect(&mut self, other: Bitmap) {
        self.0 &= other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// One parse of a header inside a particular TU at a particular include
/// site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderContext {
    /// The include-location id of this header context.
    pub include: u32,
    /// The header context id, unique per parse occurrence.
    pub hctx_id: u32,
    /// The canonical context id, shared with parses of identical content.
    pub cctx_id: u32,
}

/// Context bookkeeping: counters, freelists, refcounts and element states.
#[derive(Debug, Default)]
struct ContextTable {
    max_hctx_id: u32,
    max_cctx_id: u32,

    /// Erased ids kept for reuse, handed out oldest-first.
    erased_hctx_ids: VecDeque<u32>,
    erased_cctx_ids: VecDeque<u32>,

    /// Per canonical context: how many header contexts reference it.
    cctx_hctx_refs: Vec<u32>,
    /// Per canonical context: how many dependent elements participate in it.
    cctx_element_refs: Vec<u32>,

    /// Per dependent element: bit `i` set iff the element is present in
    /// canonical context `i`.
    dependent_elem_states: Vec<Bitmap>,
    /// Per independent element: the header context ids that saw it.
    independent_elem_states: Vec<HashSet<u32>>,
}

impl ContextTable {
    fn alloc_hctx_id(&mut self) -> u32 {
        if let Some(id) = self.erased_hctx_ids.pop_front() {
            id
        } else {
            let id = self.max_hctx_id;
            self.max_hctx_id += 1;
            id
        }
    }

    fn alloc_cctx_id(&mut self) -> IndexResult<u32> {
        if let Some(id) = self.erased_cctx_ids.pop_front() {
            self.cctx_hctx_refs[id as usize] = 1;
            self.cctx_element_refs[id as usize] = 0;
            Ok(id)
        } else if self.max_cctx_id == CONTEXT_BITS {
            Err(IndexError::ContextLimitExceeded {
                limit: CONTEXT_BITS,
            })
        } else {
            let id = self.max_cctx_id;
            self.max_cctx_id += 1;
            self.cctx_hctx_refs.push(1);
            self.cctx_element_refs.push(0);
            Ok(id)
        }
    }

    fn alloc_dependent_elem_id(&mut self) -> u32 {
        let id = self.dependent_elem_states.len() as u32;
        self.dependent_elem_states.push(Bitmap::EMPTY);
        id
    }

    fn alloc_independent_elem_id(&mut self) -> u32 {
        let id = self.independent_elem_states.len() as u32;
        self.independent_elem_states.push(HashSet::new());
        id
    }

    /// A mask with erased canonical contexts cleared, used to filter stale
    /// bits during merge and removal.
    fn erased_flag(&self) -> Bitmap {
        let mut map = Bitmap::FULL;
        for &cctx_id in &self.erased_cctx_ids {
            map.reset(cctx_id);
        }
        map
    }
}

/// Running state of one merge: the witness-intersection bitmap, the lazily
/// allocated new canonical context and the dependent elements visited so
/// far.
struct MergeCursor {
    flag: Bitmap,
    is_new_cctx: bool,
    new_cctx_id: Option<u32>,
    visited_elem_ids: Vec<u32>,
    old_elements_refs: u32,
    new_hctx_id: u32,
}

impl MergeCursor {
    /// Invoked for every element touched by the merge. `slot` is the stored
    /// element's context tag, `dependent` the raw element's table choice,
    /// `is_new` whether the element was newly inserted into the aggregate.
    fn update(
        &mut self,
        table: &mut ContextTable,
        slot: &mut Contextual,
        dependent: bool,
        is_new: bool,
    ) -> IndexResult<()> {
        if is_new {
            // A new element proves this parse introduces new content, so a
            // new canonical context is required.
            self.is_new_cctx = true;
            let cctx = match self.new_cctx_id {
                Some(id) => id,
                None => {
                    let id = table.alloc_cctx_id()?;
                    self.new_cctx_id = Some(id);
                    id
                }
            };

            if dependent {
                self.old_elements_refs += 1;
                let elem = table.alloc_dependent_elem_id();
                table.dependent_elem_states[elem as usize].set(cctx);
                *slot = Contextual::dependent(elem);
            } else {
                let elem = table.alloc_independent_elem_id();
                table.independent_elem_states[elem as usize].insert(self.new_hctx_id);
                *slot = Contextual::independent(elem);
            }
        } else if slot.is_dependent() {
            self.old_elements_refs += 1;
            match self.new_cctx_id {
                Some(cctx) if self.is_new_cctx => {
                    // The new context is already certain; tag the element
                    // directly.
                    table.dependent_elem_states[slot.offset() as usize].set(cctx);
                }
                _ => {
                    if !self.is_new_cctx {
                        self.flag
                            .intersect(table.dependent_elem_states[slot.offset() as usize]);
                        if self.flag.is_empty() {
                            // No existing context contains every element seen
                            // so far.
                            self.is_new_cctx = true;
                        }
                    }
                    // The bit is applied during finalization, once the new
                    // context id is known.
                    self.visited_elem_ids.push(slot.offset());
                }
            }
        } else {
            table.independent_elem_states[slot.offset() as usize].insert(self.new_hctx_id);
        }
        Ok(())
    }
}

/// A [`RawIndex`] aggregate plus the context bookkeeping that merges many
/// parses of the same header.
#[derive(Debug, Default)]
pub struct HeaderIndex {
    /// The merged symbols and occurrences of every live context.
    pub raw: RawIndex,
    /// Header contexts grouped by the source file whose parse contributed
    /// them.
    header_contexts: HashMap<String, Vec<HeaderContext>>,
    table: ContextTable,
}

impl HeaderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of source files with live contexts in this index.
    pub fn file_count(&self) -> usize {
        self.header_contexts.len()
    }

    /// The count of active header contexts in this index.
    pub fn header_context_count(&self) -> u32 {
        self.table.max_hctx_id - self.table.erased_hctx_ids.len() as u32
    }

    /// The count of active canonical contexts in this index.
    pub fn canonical_context_count(&self) -> u32 {
        self.table.max_cctx_id - self.table.erased_cctx_ids.len() as u32
    }

    /// Whether this index has exactly one live header context. Enables
    /// shortcut paths in callers.
    pub fn is_single_header_context(&self) -> bool {
        self.table.max_hctx_id == 1 && self.table.erased_hctx_ids.is_empty()
    }

    /// A mask with erased canonical contexts cleared.
    pub fn erased_flag(&self) -> Bitmap {
        self.table.erased_flag()
    }

    /// Iterate over active `(file, contexts)` entries.
    pub fn contexts(&self) -> impl Iterator<Item = (&str, &[HeaderContext])> {
        self.header_contexts
            .iter()
            .map(|(path, list)| (path.as_str(), list.as_slice()))
    }

    pub fn contexts_of(&self, path: &str) -> Option<&[HeaderContext]> {
        self.header_contexts.get(path).map(Vec::as_slice)
    }

    pub fn erased_hctx_ids(&self) -> &VecDeque<u32> {
        &self.table.erased_hctx_ids
    }

    pub fn erased_cctx_ids(&self) -> &VecDeque<u32> {
        &self.table.erased_cctx_ids
    }

    /// The bitmap of canonical contexts a dependent element belongs to.
    pub fn dependent_state(&self, elem: u32) -> Bitmap {
        self.table.dependent_elem_states[elem as usize]
    }

    /// Record a context for `path` without merging any content. Used when a
    /// parse produced an empty index and by tests that drive the id
    /// machinery directly.
    pub fn add_context(&mut self, path: &str, include: u32) -> IndexResult<HeaderContext> {
        let context = HeaderContext {
            include,
            cctx_id: self.table.alloc_cctx_id()?,
            hctx_id: self.table.alloc_hctx_id(),
        };
        self.header_contexts
            .entry(path.to_string())
            .or_default()
            .push(context);
        Ok(context)
    }

    /// Merge one fresh parse of this header into the aggregate.
    ///
    /// Walks every element of `raw`, intersecting the bitmap of contexts
    /// that could still equal this parse. An existing canonical context
    /// matches only if every element of `raw` has its bit set **and** its
    /// dependent-element count equals the number of elements seen; the
    /// count check distinguishes "subset of" from "equal to".
    pub fn merge(
        &mut self,
        path: &str,
        include: u32,
        mut raw: RawIndex,
    ) -> IndexResult<HeaderContext> {
        let new_hctx_id = self.table.alloc_hctx_id();

        let mut cursor = MergeCursor {
            flag: self.table.erased_flag(),
            is_new_cctx: false,
            new_cctx_id: None,
            visited_elem_ids: Vec::new(),
            old_elements_refs: 0,
            new_hctx_id,
        };

        // Merge symbols and their relations.
        for (id, mut symbol) in raw.symbols.drain() {
            match self.raw.symbols.entry(id) {
                Entry::Vacant(entry) => {
                    let stored = entry.insert(symbol);
                    for relation in stored.relations.iter_mut() {
                        let dependent = relation.ctx.is_dependent();
                        cursor.update(&mut self.table, &mut relation.ctx, dependent, true)?;
                    }
                }
                Entry::Occupied(mut entry) => {
                    let stored = entry.get_mut();
                    for relation in symbol.relations.drain(..) {
                        let dependent = relation.ctx.is_dependent();
                        let (slot, inserted) = stored.insert_relation(relation);
                        cursor.update(&mut self.table, &mut slot.ctx, dependent, inserted)?;
                    }
                }
            }
        }

        // Merge occurrence groups. Within a range group occurrences are
        // matched by target symbol; groups stay tiny in practice.
        for (range, mut group) in raw.occurrences.drain() {
            match self.raw.occurrences.entry(range) {
                Entry::Vacant(entry) => {
                    let stored = entry.insert(group);
                    for occurrence in stored.iter_mut() {
                        let dependent = occurrence.ctx.is_dependent();
                        cursor.update(&mut self.table, &mut occurrence.ctx, dependent, true)?;
                    }
                }
                Entry::Occupied(mut entry) => {
                    let stored = entry.get_mut();
                    for occurrence in group.drain(..) {
                        let dependent = occurrence.ctx.is_dependent();
                        let existing = stored
                            .iter_mut()
                            .position(|o| o.target_symbol == occurrence.target_symbol);
                        match existing {
                            Some(pos) => {
                                cursor.update(
                                    &mut self.table,
                                    &mut stored[pos].ctx,
                                    dependent,
                                    false,
                                )?;
                            }
                            None => {
                                stored.push(occurrence);
                                let slot = stored.last_mut().expect("just pushed");
                                cursor.update(&mut self.table, &mut slot.ctx, dependent, true)?;
                            }
                        }
                    }
                }
            }
        }

        // If no new context was forced, look for an exact match: a still-set
        // bit whose element count equals what this parse visited.
        if !cursor.is_new_cctx {
            for i in 0..self.table.max_cctx_id {
                if !cursor.flag.test(i) {
                    continue;
                }
                if self.table.cctx_element_refs[i as usize] == cursor.old_elements_refs {
                    self.table.cctx_hctx_refs[i as usize] += 1;
                    cursor.new_cctx_id = Some(i);
                    break;
                }
            }
        }

        let cctx_id = match cursor.new_cctx_id {
            Some(id) => id,
            None => {
                let id = self.table.alloc_cctx_id()?;
                cursor.is_new_cctx = true;
                id
            }
        };

        if cursor.is_new_cctx {
            for &elem in &cursor.visited_elem_ids {
                self.table.dependent_elem_states[elem as usize].set(cctx_id);
            }
            self.table.cctx_element_refs[cctx_id as usize] = cursor.old_elements_refs;
        }

        let context = HeaderContext {
            include,
            hctx_id: new_hctx_id,
            cctx_id,
        };
        self.header_contexts
            .entry(path.to_string())
            .or_default()
            .push(context);
        Ok(context)
    }

    /// Remove every context contributed by `path`.
    ///
    /// Header and canonical context ids return to the freelists; canonical
    /// contexts whose refcount drops to zero are released and their bit is
    /// cleared from every dependent element. Elements left unreachable are
    /// pruned from the aggregate.
    pub fn remove(&mut self, path: &str) {
        let Some(contexts) = self.header_contexts.remove(path) else {
            return;
        };

        let mut erased_hctx_ids = Vec::with_capacity(contexts.len());
        for context in &contexts {
            erased_hctx_ids.push(context.hctx_id);
            self.table.erased_hctx_ids.push_back(context.hctx_id);

            let refs = &mut self.table.cctx_hctx_refs[context.cctx_id as usize];
            debug_assert!(*refs > 0);
            *refs -= 1;
            if *refs == 0 {
                self.table.erased_cctx_ids.push_back(context.cctx_id);
                self.table.cctx_element_refs[context.cctx_id as usize] = 0;
            }
        }

        // Remove all refs to the erased header context ids.
        for state in self.table.independent_elem_states.iter_mut() {
            for hctx_id in &erased_hctx_ids {
                state.remove(hctx_id);
            }
        }

        // Clear the bits of the released canonical contexts.
        let erased_flag = self.table.erased_flag();
        for state in self.table.dependent_elem_states.iter_mut() {
            state.intersect(erased_flag);
        }

        self.prune_unreachable();
    }

    /// Drop relations and occurrences whose element is no longer present in
    /// any live context, then symbols and ranges left empty.
    fn prune_unreachable(&mut self) {
        let table = &self.table;
        let alive = |ctx: &Contextual| {
            if ctx.is_dependent() {
                !table.dependent_elem_states[ctx.offset() as usize].is_empty()
            } else {
                !table.independent_elem_states[ctx.offset() as usize].is_empty()
            }
        };

        self.raw.symbols.retain(|_, symbol| {
            symbol.relations.retain(|r| alive(&r.ctx));
            !symbol.relations.is_empty()
        });
        self.raw.occurrences.retain(|_, group| {
            group.retain(|o| alive(&o.ctx));
            !group.is_empty()
        });
    }
}
