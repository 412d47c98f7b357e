//! Function Custom Resource Definition
//!
//! A Function is a registry entry for a deployable unit of user code. The
//! workflow validator resolves every flow's function reference against the
//! Functions registered in the workflow's domain.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a Function
///
/// Functions are grouped into domains (a namespace-scoped registry). A
/// Workflow may only reference Functions from its own domain.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "nimbus.dev",
    version = "v1alpha1",
    kind = "Function",
    plural = "functions",
    namespaced,
    printcolumn = r#"{"name":"Domain","type":"string","jsonPath":".spec.domain"}"#,
    printcolumn = r#"{"name":"Environment","type":"string","jsonPath":".spec.environment"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    /// Domain (function registry) this Function belongs to
    pub domain: String,

    /// Language environment the scheduler launches for this Function
    pub environment: Environment,

    /// Resource claim for one Function process
    pub resource: ResourceClaim,
}

/// Language environments that Nimbus supports
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Environment {
    /// The function code runs in a Golang environment
    Golang,
    /// The function code runs in a Python environment
    Python,
    /// The function code runs in a JavaScript environment
    JavaScript,
}

impl Environment {
    /// Container image of the runner for this language environment
    pub fn runner_image(&self) -> &'static str {
        match self {
            Environment::Golang => "ghcr.io/nimbus-faas/runner-go:v0.2.0",
            Environment::Python => "ghcr.io/nimbus-faas/runner-python:v0.2.0",
            Environment::JavaScript => "ghcr.io/nimbus-faas/runner-node:v0.2.0",
        }
    }
}

/// Resource claim for a Function process
///
/// Quantities use the Kubernetes quantity syntax, e.g. `"500m"` of CPU or
/// `"128Mi"` of memory.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClaim {
    /// CPU, in cores (500m = .5 cores)
    pub cpu: String,
    /// Memory, in bytes (128Mi = 128 * 1024 * 1024)
    pub memory: String,
}
