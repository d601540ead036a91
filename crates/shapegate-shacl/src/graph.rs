//! Read helpers over a shapes graph.

use shapegate_model::{vocab, Iri, StatementPattern, Term};
use shapegate_store::{StatementSource, StoreError};
use ahash::AHashSet;

#[derive(Clone, Copy)]
pub struct GraphReader<'a> {
    source: &'a dyn StatementSource,
}

impl<'a> GraphReader<'a> {
    pub fn new(source: &'a dyn StatementSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &'a dyn StatementSource {
        self.source
    }

    pub fn objects(&self, subject: &Term, predicate: &str) -> Result<Vec<Term>, StoreError> {
        let pattern = StatementPattern::any()
            .with_subject(subject.clone())
            .with_predicate(Iri::new(predicate));
        let mut out: Vec<Term> = self.source.statements(&pattern)?.map(|st| st.object).collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    pub fn object(&self, subject: &Term, predicate: &str) -> Result<Option<Term>, StoreError> {
        Ok(self.objects(subject, predicate)?.into_iter().next())
    }

    pub fn subjects(&self, predicate: &str, object: Option<&Term>) -> Result<Vec<Term>, StoreError> {
        let mut pattern = StatementPattern::any().with_predicate(Iri::new(predicate));
        if let Some(object) = object {
            pattern = pattern.with_object(object.clone());
        }
        let mut out: Vec<Term> = self.source.statements(&pattern)?.map(|st| st.subject).collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    pub fn has_type(&self, node: &Term, class: &str) -> Result<bool, StoreError> {
        let pattern = StatementPattern::any()
            .with_subject(node.clone())
            .with_predicate(Iri::new(vocab::rdf::TYPE))
            .with_object(Term::iri(class));
        Ok(self.source.statements(&pattern)?.next().is_some())
    }

    pub fn is_list(&self, node: &Term) -> Result<bool, StoreError> {
        if *node == Term::iri(vocab::rdf::NIL) {
            return Ok(true);
        }
        Ok(!self.objects(node, vocab::rdf::FIRST)?.is_empty())
    }

    /// Members of the RDF list starting at `head`.
    ///
    /// The outer error is a store failure; the inner one describes a broken
    /// list (missing or repeated `rdf:first`/`rdf:rest`, or a cycle).
    pub fn list(&self, head: &Term) -> Result<Result<Vec<Term>, String>, StoreError> {
        let nil = Term::iri(vocab::rdf::NIL);
        let mut items = Vec::new();
        let mut seen = AHashSet::new();
        let mut cell = head.clone();
        while cell != nil {
            if !seen.insert(cell.clone()) {
                return Ok(Err(format!("list at {head} is cyclic")));
            }
            let first = self.objects(&cell, vocab::rdf::FIRST)?;
            let rest = self.objects(&cell, vocab::rdf::REST)?;
            let ([first], [rest]) = (first.as_slice(), rest.as_slice()) else {
                return Ok(Err(format!(
                    "list cell {cell} needs exactly one rdf:first and one rdf:rest"
                )));
            };
            items.push(first.clone());
            cell = rest.clone();
        }
        Ok(Ok(items))
    }
}
