//! Structural and semantic validation of workflow graphs
//!
//! The validator is a pure function over [`FlowGraph`]: it performs no I/O
//! and mutates nothing, so a validation failure never leaves partial
//! cluster state behind. Rules:
//!
//! - exactly one entrance: the unique untagged flow with no inputs, or the
//!   unique flow tagged `start`, or the single flow of a one-flow workflow
//!   tagged `orphan`
//! - at least one exit: a flow with no outputs or tagged `end`
//! - every referenced name (inputs, outputs, branch flows, branch
//!   conditions) resolves against the declared graph
//! - a `switch` flow declares a non-empty condition group; every branch
//!   destination flow also appears in the owning flow's own outputs
//! - ordering operators are rejected for `bool` conditions
//!
//! Cycles are deliberately not rejected: loops (retry and fan-back shapes)
//! are legitimate workflow constructs, and an exit is still guaranteed by
//! the exit rule above.

use std::collections::HashSet;

use thiserror::Error;

use super::FlowGraph;
use crate::crd::{ConditionType, Flow, Operator, Role, Statement};

/// A workflow graph invariant violation
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The same flow name is declared more than once
    #[error("flow {0} is defined more than once")]
    DuplicateFlow(String),

    /// The same condition name is declared more than once in one group
    #[error("condition {condition} in flow {flow} is defined more than once")]
    DuplicateCondition {
        /// Flow owning the condition group
        flow: String,
        /// The colliding condition name
        condition: String,
    },

    /// No flow qualifies as the entrance
    #[error("workflow has no entrance flow")]
    NoEntrance,

    /// More than one flow qualifies as the entrance
    #[error("workflow has more than one entrance flow")]
    MultipleEntrances,

    /// No flow qualifies as an exit
    #[error("workflow has no exit flow")]
    NoExit,

    /// A referenced flow or condition name is not declared
    #[error("{name} referenced by flow {flow} is not defined")]
    UnresolvedReference {
        /// The name that failed to resolve
        name: String,
        /// Flow holding the dangling reference
        flow: String,
    },

    /// A switch flow declares no conditions
    #[error("flow {0} uses a switch statement but declares no conditions")]
    MissingCondition(String),

    /// A branch destination is missing from the owning flow's outputs
    #[error("destination {name} in flow {flow} is not listed in its outputs")]
    DestinationNotInOutputs {
        /// The destination flow name
        name: String,
        /// Flow whose outputs do not cover it
        flow: String,
    },

    /// An ordering operator is used on a boolean condition
    #[error("operator {operator:?} is not valid for bool condition {condition}")]
    InvalidOperator {
        /// The offending condition name
        condition: String,
        /// The ordering operator that was used
        operator: Operator,
    },

    /// A flow references a function not registered in the workflow's domain
    #[error("function {0} is not defined in the workflow domain")]
    UndefinedFunction(String),
}

/// Validate the structural and semantic invariants of a workflow graph
pub fn validate(graph: &FlowGraph<'_>) -> Result<(), ValidationError> {
    check_entrance(graph)?;
    check_exit(graph)?;

    for flow in graph.flows() {
        check_references(graph, flow)?;
        check_conditions(graph, flow)?;
    }

    Ok(())
}

/// Validate that every flow's function is registered in the domain
///
/// `defined` is the set of Function names registered in the workflow's
/// domain; the caller filters the registry by domain before the call.
pub fn validate_functions_exist(
    graph: &FlowGraph<'_>,
    defined: &HashSet<String>,
) -> Result<(), ValidationError> {
    for flow in graph.flows() {
        if !defined.contains(&flow.function) {
            return Err(ValidationError::UndefinedFunction(flow.function.clone()));
        }
    }
    Ok(())
}

fn is_entrance(flow: &Flow, single_flow: bool) -> bool {
    match flow.role {
        Some(Role::Start) => true,
        Some(Role::Orphan) => single_flow,
        Some(Role::End) => false,
        None => flow.inputs.is_empty(),
    }
}

fn check_entrance(graph: &FlowGraph<'_>) -> Result<(), ValidationError> {
    let single = graph.len() == 1;
    let mut entrances = graph.flows().iter().filter(|f| is_entrance(f, single));

    match (entrances.next(), entrances.next()) {
        (Some(_), None) => Ok(()),
        (None, _) => Err(ValidationError::NoEntrance),
        (Some(_), Some(_)) => Err(ValidationError::MultipleEntrances),
    }
}

fn check_exit(graph: &FlowGraph<'_>) -> Result<(), ValidationError> {
    let has_exit = graph
        .flows()
        .iter()
        .any(|f| f.outputs.is_empty() || matches!(f.role, Some(Role::End) | Some(Role::Orphan)));

    if has_exit {
        Ok(())
    } else {
        Err(ValidationError::NoExit)
    }
}

fn check_references(graph: &FlowGraph<'_>, flow: &Flow) -> Result<(), ValidationError> {
    for name in flow.inputs.iter().chain(flow.outputs.iter()) {
        if !graph.contains_flow(name) {
            return Err(ValidationError::UnresolvedReference {
                name: name.clone(),
                flow: flow.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_conditions(graph: &FlowGraph<'_>, flow: &Flow) -> Result<(), ValidationError> {
    if flow.statement == Statement::Switch && flow.conditions.is_empty() {
        return Err(ValidationError::MissingCondition(flow.name.clone()));
    }

    // Every condition in the group is checked, reachable from the root or
    // not: an unreachable-but-broken condition is still an authoring error.
    for condition in &flow.conditions {
        if condition.type_ == ConditionType::Bool && condition.operator.is_ordering() {
            return Err(ValidationError::InvalidOperator {
                condition: condition.name.clone(),
                operator: condition.operator,
            });
        }

        let branches = [&condition.destination.is_true, &condition.destination.is_false];
        for next in branches {
            for dest in &next.flows {
                if !graph.contains_flow(dest) {
                    return Err(ValidationError::UnresolvedReference {
                        name: dest.clone(),
                        flow: flow.name.clone(),
                    });
                }
                // Outputs declare the full successor set; conditions only
                // select among it.
                if !flow.outputs.contains(dest) {
                    return Err(ValidationError::DestinationNotInOutputs {
                        name: dest.clone(),
                        flow: flow.name.clone(),
                    });
                }
            }
            for dest in &next.conditions {
                if graph.condition(&flow.name, dest).is_none() {
                    return Err(ValidationError::UnresolvedReference {
                        name: dest.clone(),
                        flow: flow.name.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}
