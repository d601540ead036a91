//! Fixtures shared by the unit tests.

use crate::connections::{ConnectionsGroup, GroupOptions};
use crate::query::PatternQueryEngine;
use shapegate_model::{Iri, Literal, Statement, Term};
use shapegate_store::{ChangeSet, MemoryStore, StatementSource};
use std::sync::Arc;

pub const EX: &str = "http://example.org/";

pub fn ex(local: &str) -> Term {
    Term::iri(&format!("{EX}{local}"))
}

pub fn pred(local: &str) -> Iri {
    Iri::new(format!("{EX}{local}"))
}

pub fn triple(s: &str, p: &str, o: &str) -> Statement {
    Statement::new(ex(s), pred(p), ex(o))
}

pub fn literal_triple(s: &str, p: &str, literal: Literal) -> Statement {
    Statement::new(ex(s), pred(p), Term::Literal(literal))
}

pub fn group_with(base: &[Statement], added: &[Statement], removed: &[Statement]) -> ConnectionsGroup {
    group_with_options(base, added, removed, |_| {})
}

pub fn group_with_options(
    base: &[Statement],
    added: &[Statement],
    removed: &[Statement],
    configure: impl FnOnce(&mut GroupOptions),
) -> ConnectionsGroup {
    let store = Arc::new(MemoryStore::new());
    store.insert_all(base.iter().cloned());
    let snapshot: Arc<dyn StatementSource> = Arc::new(store.snapshot());
    let added: ChangeSet = added.iter().cloned().collect();
    let removed: ChangeSet = removed.iter().cloned().collect();
    let mut options = GroupOptions::default();
    configure(&mut options);
    ConnectionsGroup::new(
        snapshot,
        Arc::new(added),
        Arc::new(removed),
        Arc::new(PatternQueryEngine::new()),
        options,
    )
    .expect("test group")
}
