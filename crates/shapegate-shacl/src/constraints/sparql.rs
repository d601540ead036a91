//! Query-engine backed evaluation: `sh:sparql` constraints and value
//! lookups for the query approach.

use crate::connections::ConnectionsGroup;
use crate::error::{Result, ShaclError};
use crate::matcher::Variable;
use crate::path::Path;
use crate::plan::{PlanNode, PlanRef, TupleIter, View};
use crate::query::{Bindings, QueryError};
use crate::tuple::{Scope, ValidationTuple};
use std::sync::Arc;

const COMPONENT: &str = "SPARQLConstraintComponent";

fn evaluation_error(component: &str, error: QueryError) -> ShaclError {
    ShaclError::ConstraintEvaluation {
        component: component.to_string(),
        reason: error.to_string(),
    }
}

/// A SELECT-based constraint. Every solution is a violation; `?value`, when
/// bound, is the reported value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparqlConstraint {
    pub select: Arc<str>,
    pub message: Option<String>,
}

impl SparqlConstraint {
    /// `$PATH` is replaced by the property shape's path, which must then be
    /// a predicate path.
    pub fn new(select: &str, path: Option<&Path>, message: Option<String>) -> std::result::Result<Self, String> {
        let select = if select.contains("$PATH") {
            match path.and_then(Path::as_simple_predicate) {
                Some((predicate, true)) => select.replace("$PATH", &predicate.to_string()),
                _ => return Err("$PATH needs a property shape with a predicate path".to_string()),
            }
        } else {
            select.to_string()
        };
        Ok(Self {
            select: Arc::from(select),
            message,
        })
    }
}

/// Runs the constraint's query once per focus node with `$this` bound.
#[derive(Debug)]
pub struct SparqlNode {
    focus: PlanRef,
    constraint: SparqlConstraint,
}

impl SparqlNode {
    pub fn new(focus: PlanRef, constraint: SparqlConstraint) -> Self {
        Self { focus, constraint }
    }
}

impl PlanNode for SparqlNode {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        let this = Variable::new("this");
        let value = Variable::new("value");
        let upstream = self.focus.iterate(cx)?;
        Ok(Box::new(upstream.flat_map(move |item| -> Vec<Result<ValidationTuple>> {
            let tuple = match item {
                Ok(tuple) => tuple,
                Err(e) => return vec![Err(e)],
            };
            let bindings = Bindings::from([(this.clone(), tuple.focus().clone())]);
            let solutions = cx.query_engine().select(
                &self.constraint.select,
                &bindings,
                cx.view(View::Current),
            );
            match solutions {
                Ok(solutions) => solutions
                    .into_iter()
                    .map(|solution| {
                        Ok(match solution.get(&value) {
                            Some(v) => ValidationTuple::pair(
                                tuple.focus().clone(),
                                v.clone(),
                                tuple.scope(),
                            ),
                            None => tuple.focus_only(),
                        })
                    })
                    .collect(),
                Err(e) => vec![Err(evaluation_error(COMPONENT, e))],
            }
        })))
    }

    fn signature(&self) -> String {
        format!("Sparql[{}]({})", self.constraint.select, self.focus.signature())
    }
}

/// Every `(focus, value)` pair of a predicate path, fetched with one query.
#[derive(Debug)]
pub struct QueryValuesNode {
    query: String,
    component: &'static str,
}

impl QueryValuesNode {
    pub fn new(path: &Path, component: &'static str) -> Result<Self> {
        let pattern = path.render_as_pattern(&Variable::new("this"), &Variable::new("value"))?;
        Ok(Self {
            query: format!("SELECT ?this ?value WHERE {{ {pattern} }}"),
            component,
        })
    }
}

impl PlanNode for QueryValuesNode {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        let this = Variable::new("this");
        let value = Variable::new("value");
        let solutions = cx
            .query_engine()
            .select(&self.query, &Bindings::new(), cx.view(View::Current))
            .map_err(|e| evaluation_error(self.component, e))?;
        Ok(Box::new(solutions.into_iter().filter_map(move |solution| {
            match (solution.get(&this), solution.get(&value)) {
                (Some(f), Some(v)) => Some(Ok(ValidationTuple::pair(
                    f.clone(),
                    v.clone(),
                    Scope::PropertyShape,
                ))),
                _ => None,
            }
        })))
    }

    fn signature(&self) -> String {
        format!("QueryValues[{}]", self.query)
    }
}
