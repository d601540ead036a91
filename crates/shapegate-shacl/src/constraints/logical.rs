//! Shape-based constraints: `sh:and`, `sh:or`, `sh:not`, `sh:xone` and
//! `sh:node`.

use super::PlanMode;
use crate::connections::ConnectionsGroup;
use crate::error::Result;
use crate::plan::{PlanRef, TupleTest, ValuesNode};
use crate::shape::Shape;
use crate::tuple::ValidationTuple;
use shapegate_model::Term;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalKind {
    And,
    Or,
    Not,
    Xone,
    Node,
}

#[derive(Debug, Clone)]
pub struct LogicalCheck {
    pub kind: LogicalKind,
    pub shapes: Vec<Arc<Shape>>,
}

impl LogicalCheck {
    pub fn new(kind: LogicalKind, shapes: Vec<Arc<Shape>>) -> Self {
        Self { kind, shapes }
    }

    pub fn component_id(&self) -> &'static str {
        match self.kind {
            LogicalKind::And => "AndConstraintComponent",
            LogicalKind::Or => "OrConstraintComponent",
            LogicalKind::Not => "NotConstraintComponent",
            LogicalKind::Xone => "XoneConstraintComponent",
            LogicalKind::Node => "NodeConstraintComponent",
        }
    }

    pub fn passes(&self, value: &Term, cx: &ConnectionsGroup) -> Result<bool> {
        match self.kind {
            LogicalKind::And | LogicalKind::Node => {
                for shape in &self.shapes {
                    if !conforms(shape, value, cx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            LogicalKind::Or => {
                for shape in &self.shapes {
                    if conforms(shape, value, cx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            LogicalKind::Not => {
                for shape in &self.shapes {
                    if conforms(shape, value, cx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            LogicalKind::Xone => {
                let mut matched = 0;
                for shape in &self.shapes {
                    if conforms(shape, value, cx)? {
                        matched += 1;
                    }
                }
                Ok(matched == 1)
            }
        }
    }
}

impl TupleTest for LogicalCheck {
    fn test(&self, tuple: &ValidationTuple, cx: &ConnectionsGroup) -> Result<bool> {
        match tuple.value() {
            Some(value) => self.passes(value, cx),
            None => Ok(true),
        }
    }

    fn signature(&self) -> String {
        let ids: Vec<String> = self.shapes.iter().map(|s| s.id().to_string()).collect();
        format!("{:?}({})", self.kind, ids.join(" "))
    }
}

/// Whether `node`, taken as a focus node, produces no results for `shape`.
///
/// Targets of `shape` are ignored. Results are memoized per connections
/// group, so a node is checked against a nested shape at most once.
pub fn conforms(shape: &Shape, node: &Term, cx: &ConnectionsGroup) -> Result<bool> {
    if shape.is_deactivated() {
        return Ok(true);
    }
    if let Some(known) = cx.known_conformance(shape.id(), node) {
        return Ok(known);
    }

    let focus: PlanRef = Arc::new(ValuesNode::new(vec![ValidationTuple::target(
        node.clone(),
        shape.scope(),
    )]));
    let mut result = true;
    for component in shape.components() {
        let plan = component.plan(shape, focus.clone(), cx, PlanMode::Nested)?;
        if plan.iterate(cx)?.next().transpose()?.is_some() {
            result = false;
            break;
        }
    }
    if result {
        for property in shape.properties() {
            if !conforms(property, node, cx)? {
                result = false;
                break;
            }
        }
    }

    cx.record_conformance(shape.id(), node, result);
    Ok(result)
}
