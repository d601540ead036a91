//! Term interning: every term is stored once and referenced by a `u32` id.

use dashmap::DashMap;
use shapegate_model::Term;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TermId(u32);

impl TermId {
    pub const fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug)]
pub struct TermInterner {
    term_to_id: DashMap<Term, TermId>,
    id_to_term: DashMap<TermId, Term>,
    next_id: AtomicU32,
}

impl TermInterner {
    pub fn new() -> Self {
        Self {
            term_to_id: DashMap::new(),
            id_to_term: DashMap::new(),
            next_id: AtomicU32::new(0),
        }
    }

    /// Intern a term, returning its id.
    pub fn intern(&self, term: &Term) -> TermId {
        if let Some(id) = self.term_to_id.get(term) {
            return *id;
        }
        // The entry lock makes concurrent interning of the same term agree on one id.
        *self.term_to_id.entry(term.clone()).or_insert_with(|| {
            let id = TermId(self.next_id.fetch_add(1, Ordering::SeqCst));
            self.id_to_term.insert(id, term.clone());
            id
        })
    }

    /// Id of an already interned term, without inserting.
    pub fn id_of(&self, term: &Term) -> Option<TermId> {
        self.term_to_id.get(term).map(|id| *id)
    }

    pub fn resolve(&self, id: TermId) -> Option<Term> {
        self.id_to_term.get(&id).map(|t| t.clone())
    }

    pub fn len(&self) -> usize {
        self.id_to_term.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_term.is_empty()
    }
}

impl Default for TermInterner {
    fn default() -> Self {
        Self::new()
    }
}
