//! Workflow flow-graph model and validator
//!
//! This module gives the controller an indexed, in-memory view of a
//! workflow's flow graph. [`FlowGraph::from_spec`] builds name indexes in
//! one pass (failing fast on duplicates); [`validate`] then checks the
//! structural and semantic invariants of the graph before any cluster
//! state is touched.
//!
//! Conditions are kept as the flat arena they are declared as: every
//! condition of a flow lives in one list and branch destinations address
//! other conditions by name, so there is no aliasing to reason about and
//! equality is plain value equality.

mod validate;

pub use validate::{validate, validate_functions_exist, ValidationError};

use std::collections::HashMap;

use crate::crd::{ConditionSpec, Flow, WorkflowSpec};

/// Indexed view of a workflow's flow graph
///
/// Borrows the spec it was built from; the indexes map flow names and,
/// per flow, condition names to positions in the declared lists.
#[derive(Debug)]
pub struct FlowGraph<'a> {
    flows: &'a [Flow],
    flow_index: HashMap<&'a str, usize>,
    condition_indexes: Vec<HashMap<&'a str, usize>>,
}

impl<'a> FlowGraph<'a> {
    /// Build the name indexes for a workflow spec
    ///
    /// Fails fast with [`ValidationError::DuplicateFlow`] or
    /// [`ValidationError::DuplicateCondition`] on the first name collision.
    pub fn from_spec(spec: &'a WorkflowSpec) -> Result<Self, ValidationError> {
        let mut flow_index = HashMap::with_capacity(spec.flows.len());
        let mut condition_indexes = Vec::with_capacity(spec.flows.len());

        for (i, flow) in spec.flows.iter().enumerate() {
            if flow_index.insert(flow.name.as_str(), i).is_some() {
                return Err(ValidationError::DuplicateFlow(flow.name.clone()));
            }

            let mut conditions = HashMap::with_capacity(flow.conditions.len());
            for (j, condition) in flow.conditions.iter().enumerate() {
                if conditions.insert(condition.name.as_str(), j).is_some() {
                    return Err(ValidationError::DuplicateCondition {
                        flow: flow.name.clone(),
                        condition: condition.name.clone(),
                    });
                }
            }
            condition_indexes.push(conditions);
        }

        Ok(Self {
            flows: &spec.flows,
            flow_index,
            condition_indexes,
        })
    }

    /// All flows in declaration order
    pub fn flows(&self) -> &'a [Flow] {
        self.flows
    }

    /// Number of flows in the graph
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Whether the graph has no flows at all
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Look up a flow by name
    pub fn flow(&self, name: &str) -> Option<&'a Flow> {
        self.flow_index.get(name).map(|&i| &self.flows[i])
    }

    /// Whether a flow with this name is declared
    pub fn contains_flow(&self, name: &str) -> bool {
        self.flow_index.contains_key(name)
    }

    /// Look up a condition by name within the given flow's group
    pub fn condition(&self, flow: &str, name: &str) -> Option<&'a ConditionSpec> {
        let &i = self.flow_index.get(flow)?;
        let &j = self.condition_indexes[i].get(name)?;
        Some(&self.flows[i].conditions[j])
    }
}
