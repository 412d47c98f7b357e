//! Nimbus - CRD-driven Kubernetes operator for serverless workflows
//!
//! Nimbus turns a declarative description of a multi-step serverless
//! workflow into running cluster resources, and keeps a live map of where
//! each workflow's execution instances are physically running.
//!
//! # Architecture
//!
//! A `Workflow` resource describes a graph of functions wired together with
//! direct and conditional transitions. Once the graph validates, the
//! controller materializes a `WorkflowRuntime` for it, which in turn owns
//! the ServiceAccount, RoleBinding, Deployment and Service that host the
//! workflow's scheduler pods. A separate watch on EndpointSlices keeps the
//! runtime's instance map in sync with the pods that actually exist.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Workflow, WorkflowRuntime, Function)
//! - [`graph`] - Workflow flow-graph model and validator
//! - [`generate`] - Desired-state generators for managed child objects
//! - [`store`] - Object store abstraction over the Kubernetes API
//! - [`ensure`] - Create-or-update convergence for managed objects
//! - [`finalizer`] - Finalizer state machine for cleanup ordering
//! - [`jsonpatch`] - RFC 6902 patch operations and pointer escaping
//! - [`topology`] - Instance-map differ fed by endpoint observations
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`retry`] - Bounded backoff retry for transient store failures
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod ensure;
pub mod error;
pub mod finalizer;
pub mod generate;
pub mod graph;
pub mod jsonpatch;
pub mod retry;
pub mod store;
pub mod topology;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Centralizing these here keeps CRD defaults, generators and test fixtures
// consistent.

/// Default replica count for a WorkflowRuntime's Deployment
pub const DEFAULT_REPLICAS: i32 = 2;

/// Port the scheduler container listens on inside every runtime pod
pub const SCHEDULER_PORT: i32 = 80;

/// Finalizer token placed on Workflow resources to gate external cleanup
pub const WORKFLOW_FINALIZER: &str = "workflow.finalizers.nimbus.dev";

/// Field manager name used for server-side apply and status updates
pub const FIELD_MANAGER: &str = "nimbus-controller";
