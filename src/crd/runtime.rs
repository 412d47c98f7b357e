//! WorkflowRuntime Custom Resource Definition
//!
//! A WorkflowRuntime is created by the Workflow controller and owns the
//! infrastructure objects (ServiceAccount, RoleBinding, Deployment,
//! Service) that host a workflow's scheduler pods. Its instance map is
//! mutated exclusively by the topology synchronizer.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a WorkflowRuntime
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "nimbus.dev",
    version = "v1alpha1",
    kind = "WorkflowRuntime",
    plural = "workflowruntimes",
    shortname = "wfrt",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRuntimeSpec {
    /// Replication of the scheduler Deployment backing this runtime
    pub replicas: i32,

    /// Resources provided to each scheduler pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Observed runtime topology, kept current by the endpoint watch
    ///
    /// This lives inside the spec tree on purpose: the synchronizer patches
    /// `/spec/status/instances/...` with one JSON patch per observation,
    /// without going through the status subresource.
    #[serde(default)]
    pub status: RuntimeStatus,
}

/// Observed state of a WorkflowRuntime's pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    /// Live instances keyed by short pod identity, e.g. `9657bf88d-btxwt`
    #[serde(default)]
    pub instances: Instances,
}

/// Live instances keyed by short pod identity
pub type Instances = BTreeMap<String, Instance>;

/// Runtime record of one scheduler pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Network addresses of the pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InstanceStatus>,

    /// Function processes running in the pod, keyed by function name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub process_runtimes: BTreeMap<String, ProcessRuntime>,
}

impl Instance {
    /// An instance record holding just a pod IP
    pub fn with_pod_ip(ip: impl Into<String>) -> Self {
        Self {
            status: Some(InstanceStatus {
                host_ip: None,
                pod_ip: Some(ip.into()),
            }),
            process_runtimes: BTreeMap::new(),
        }
    }

    /// The recorded pod IP, if any
    pub fn pod_ip(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.pod_ip.as_deref())
    }
}

/// Network addresses of a pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct InstanceStatus {
    /// IP address of the host the pod is assigned to, empty until scheduled
    #[serde(default, rename = "hostIP", skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,

    /// IP address allocated to the pod, empty until allocated
    #[serde(default, rename = "podIP", skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
}

/// Process count for one Function running inside a pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRuntime {
    /// Number of processes running the same Function
    pub number: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: the synchronizer reads instances straight off the spec tree
    #[test]
    fn story_instance_map_roundtrips_through_json() {
        let mut instances = Instances::new();
        instances.insert("9657bf88d-btxwt".to_string(), Instance::with_pod_ip("10.0.0.7"));

        let spec = WorkflowRuntimeSpec {
            replicas: 2,
            resources: None,
            status: RuntimeStatus { instances },
        };

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(
            value["status"]["instances"]["9657bf88d-btxwt"]["status"]["podIP"],
            "10.0.0.7"
        );

        let parsed: WorkflowRuntimeSpec = serde_json::from_value(value).unwrap();
        assert_eq!(
            parsed.status.instances["9657bf88d-btxwt"].pod_ip(),
            Some("10.0.0.7")
        );
    }

    #[test]
    fn instance_without_status_has_no_pod_ip() {
        assert_eq!(Instance::default().pod_ip(), None);
    }
}
