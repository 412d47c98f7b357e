//! Workflow Custom Resource Definition
//!
//! A Workflow wires Functions together into a flow graph. Each [`Flow`]
//! invokes one Function and routes its result to downstream flows either
//! directly or through a tree of [`ConditionSpec`] branching tests.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::function::Environment;

/// Specification for a Workflow
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "nimbus.dev",
    version = "v1alpha1",
    kind = "Workflow",
    plural = "workflows",
    shortname = "wf",
    status = "WorkflowStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Domain","type":"string","jsonPath":".spec.domain"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    /// Domain (function registry) the referenced Functions must belong to
    pub domain: String,

    /// Language environment tag for the workflow as a whole
    pub environment: Environment,

    /// Environment variables injected into the workflow's runtime pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// The flow graph: an ordered list of flows
    pub flows: Vec<Flow>,
}

/// One node in the workflow graph, invoking a single Function
///
/// A Function may be called from several places in one workflow, so flows
/// carry their own unique name independent of the function name.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    /// Name of the flow, unique within the workflow
    pub name: String,

    /// Name of the Function this flow invokes
    pub function: String,

    /// Names of upstream flows feeding into this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,

    /// Names of downstream flows this flow's result may go to
    ///
    /// For switch flows this declares the full successor set; conditions
    /// only select among it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,

    /// Flow control logic type
    pub statement: Statement,

    /// Role of the flow in the graph, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    /// Branching tests, only meaningful when `statement` is `switch`
    ///
    /// The list is a flat arena of named conditions; the first element is
    /// the root of the condition tree and branch destinations refer to
    /// other conditions by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionSpec>,
}

/// Flow control logic type
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Statement {
    /// The result of the flow goes to downstream flows directly
    Direct,
    /// The result of the flow goes to downstream flows selected by conditions
    Switch,
}

/// Role of a flow in the workflow graph
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The entrance of the workflow
    Start,
    /// An exit point of the workflow
    End,
    /// The single flow of a one-flow workflow
    Orphan,
}

/// One branching test evaluated against a flow's wrapped JSON result
///
/// ```yaml
/// name: root
/// type: int
/// operator: gt
/// target: $.a
/// comparision: "50"
/// destination:
///   isTrue:
///     flows: [flow-b]
///   isFalse:
///     conditions: [check-c]
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionSpec {
    /// Name of the condition, unique within its flow's condition group
    pub name: String,

    /// Result type the comparison is performed in
    #[serde(rename = "type")]
    pub type_: ConditionType,

    /// Comparison operator
    ///
    /// Ordering operators (lt/le/gt/ge) are invalid when `type` is `bool`;
    /// the validator rejects that combination.
    pub operator: Operator,

    /// Path selecting a field inside the flow's wrapped JSON result
    ///
    /// The runtime wraps every flow result into a JSON object keyed by `$`,
    /// so a simple result is addressed as `$` and a field of a structured
    /// result as e.g. `$.info.timeout`. Omitted or `$` means the whole
    /// result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Literal value the selected result field is compared against
    pub comparision: String,

    /// Downstream selection for each outcome of the test
    pub destination: Destination,
}

/// Result data types supported in workflow conditions
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConditionType {
    /// The condition compares strings
    String,
    /// The condition compares integers
    Int,
    /// The condition compares booleans
    Bool,
}

/// Comparison operators supported in workflow conditions
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// The result is equal to the comparision value
    Eq,
    /// The result is not equal to the comparision value
    Ne,
    /// The result is less than the comparision value
    Lt,
    /// The result is less than or equal to the comparision value
    Le,
    /// The result is greater than the comparision value
    Gt,
    /// The result is greater than or equal to the comparision value
    Ge,
}

impl Operator {
    /// Whether this operator requires an ordered result type
    pub fn is_ordering(&self) -> bool {
        matches!(self, Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge)
    }
}

/// Downstream flows selected by a condition's true/false outcome
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Where the result goes when the condition is satisfied
    pub is_true: Next,
    /// Where the result goes when the condition is not satisfied
    pub is_false: Next,
}

/// The next hop(s) for a flow result after a condition outcome
///
/// A result can go to downstream flows directly, to further conditions for
/// another round of checks, or both.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Next {
    /// Flow names the result goes to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flows: Vec<String>,

    /// Condition names (within the same group) evaluated next
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
}

/// Status for a Workflow
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    /// Current phase of the workflow lifecycle
    #[serde(default)]
    pub phase: WorkflowPhase,

    /// Human-readable message about the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WorkflowStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: WorkflowPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

/// Lifecycle phase of a Workflow
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum WorkflowPhase {
    /// Not yet reconciled
    #[default]
    Pending,
    /// Graph validated and runtime resources converged
    Running,
    /// Graph or domain validation failed; awaiting a spec change
    Invalid,
    /// Deletion requested; external cleanup in progress
    Terminating,
}
