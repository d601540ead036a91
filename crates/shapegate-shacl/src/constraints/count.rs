//! Constraints over all values of one focus node.

use super::logical::conforms;
use crate::connections::ConnectionsGroup;
use crate::error::Result;
use crate::plan::GroupTest;
use crate::shape::Shape;
use crate::tuple::ValidationTuple;
use shapegate_model::{Literal, Term};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn values(group: &[ValidationTuple]) -> impl Iterator<Item = &Term> {
    group.iter().filter_map(ValidationTuple::value)
}

fn distinct_values(group: &[ValidationTuple]) -> BTreeSet<&Term> {
    values(group).collect()
}

/// The failure tuple for a check about the focus node as a whole.
fn focus_failure(group: &[ValidationTuple]) -> Vec<ValidationTuple> {
    group.first().map(|t| t.focus_only()).into_iter().collect()
}

#[derive(Debug, Clone, Copy)]
pub struct MinCount(pub usize);

impl GroupTest for MinCount {
    fn violations(
        &self,
        _focus: &Term,
        group: &[ValidationTuple],
        _cx: &ConnectionsGroup,
    ) -> Result<Vec<ValidationTuple>> {
        Ok(if distinct_values(group).len() < self.0 {
            focus_failure(group)
        } else {
            Vec::new()
        })
    }

    fn signature(&self) -> String {
        format!("minCount {}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaxCount(pub usize);

impl GroupTest for MaxCount {
    fn violations(
        &self,
        _focus: &Term,
        group: &[ValidationTuple],
        _cx: &ConnectionsGroup,
    ) -> Result<Vec<ValidationTuple>> {
        Ok(if distinct_values(group).len() > self.0 {
            focus_failure(group)
        } else {
            Vec::new()
        })
    }

    fn signature(&self) -> String {
        format!("maxCount {}", self.0)
    }
}

/// Property shape form of `sh:hasValue`: at least one value equals the term.
#[derive(Debug, Clone)]
pub struct HasValueAmong(pub Term);

impl GroupTest for HasValueAmong {
    fn violations(
        &self,
        _focus: &Term,
        group: &[ValidationTuple],
        _cx: &ConnectionsGroup,
    ) -> Result<Vec<ValidationTuple>> {
        Ok(if values(group).any(|v| *v == self.0) {
            Vec::new()
        } else {
            focus_failure(group)
        })
    }

    fn signature(&self) -> String {
        format!("hasValue {}", self.0)
    }
}

/// No two values share a language tag. One failure per duplicated tag.
#[derive(Debug, Clone, Copy)]
pub struct UniqueLang;

impl GroupTest for UniqueLang {
    fn violations(
        &self,
        _focus: &Term,
        group: &[ValidationTuple],
        _cx: &ConnectionsGroup,
    ) -> Result<Vec<ValidationTuple>> {
        let mut by_tag: BTreeMap<&str, usize> = BTreeMap::new();
        for value in distinct_values(group) {
            if let Some(tag) = value.as_literal().and_then(Literal::language) {
                *by_tag.entry(tag).or_default() += 1;
            }
        }
        let duplicated = by_tag.values().filter(|count| **count > 1).count();
        Ok(match group.first() {
            Some(first) => (0..duplicated).map(|_| first.focus_only()).collect(),
            None => Vec::new(),
        })
    }

    fn signature(&self) -> String {
        "uniqueLang".to_string()
    }
}

/// `sh:qualifiedValueShape` with its count bounds.
#[derive(Debug, Clone)]
pub struct Qualified {
    pub shape: Arc<Shape>,
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl Qualified {
    pub fn component_id(&self) -> &'static str {
        match (self.min, self.max) {
            (Some(_), None) => "QualifiedMinCountConstraintComponent",
            _ => "QualifiedMaxCountConstraintComponent",
        }
    }
}

impl GroupTest for Qualified {
    fn violations(
        &self,
        _focus: &Term,
        group: &[ValidationTuple],
        cx: &ConnectionsGroup,
    ) -> Result<Vec<ValidationTuple>> {
        let mut conforming = 0;
        for value in distinct_values(group) {
            if conforms(&self.shape, value, cx)? {
                conforming += 1;
            }
        }
        let too_few = self.min.is_some_and(|min| conforming < min);
        let too_many = self.max.is_some_and(|max| conforming > max);
        Ok(if too_few || too_many {
            focus_failure(group)
        } else {
            Vec::new()
        })
    }

    fn signature(&self) -> String {
        format!(
            "qualified {} min {:?} max {:?}",
            self.shape.id(),
            self.min,
            self.max
        )
    }
}
