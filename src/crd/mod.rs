//! Custom Resource Definitions for Nimbus
//!
//! This module contains all CRD definitions used by the Nimbus operator.

mod function;
mod runtime;
mod workflow;

pub use function::{Environment, Function, FunctionSpec, ResourceClaim};
pub use runtime::{
    Instance, InstanceStatus, Instances, ProcessRuntime, RuntimeStatus, WorkflowRuntime,
    WorkflowRuntimeSpec,
};
pub use workflow::{
    ConditionSpec, ConditionType, Destination, Flow, Next, Operator, Role, Statement, Workflow,
    WorkflowPhase, WorkflowSpec, WorkflowStatus,
};
