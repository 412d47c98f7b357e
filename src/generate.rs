//! Desired-state generators for managed child objects
//!
//! Pure constructors mapping an owner resource plus its label set to the
//! fully-specified shape of each managed object. No cluster round-trips
//! happen here and the output is deterministic: the same inputs always
//! produce the same object, which is what makes the convergence step's
//! "unchanged" detection meaningful.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Pod, PodSpec, PodTemplateSpec, ResourceRequirements,
    SecurityContext, Service, ServiceAccount, ServicePort, ServiceSpec,
};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{
    Function, Instance, RuntimeStatus, Workflow, WorkflowRuntime, WorkflowRuntimeSpec,
};
use crate::{DEFAULT_REPLICAS, SCHEDULER_PORT};

// Scheduler image run in every runtime pod. The scheduler places function
// processes and proxies invocations between instances.
const SCHEDULER_IMAGE: &str = "ghcr.io/nimbus-faas/scheduler:v0.2.0";

// Role every runtime ServiceAccount is bound to. The Role itself ships
// with the operator install manifests.
const RUNTIME_ROLE: &str = "nimbus-operator";

// Intermediate-result store the scheduler connects to.
const STORE_HOST: &str = "nimbus-store.nimbus-system.svc";
const STORE_PORT: &str = "6379";

/// Ownership/selection labels for a runtime's child objects
pub fn runtime_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("type".to_string(), "workflowRuntime".to_string()),
        ("name".to_string(), name.to_string()),
    ])
}

/// Selection labels for a Function's runner pod
pub fn function_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("function".to_string(), name.to_string())])
}

/// Generator for the child objects of one WorkflowRuntime
///
/// Children share the runtime's namespace/name and its label set; the
/// labels double as the Service selector and the cleanup selector.
pub struct Generator<'a> {
    runtime: &'a WorkflowRuntime,
    labels: BTreeMap<String, String>,
}

impl<'a> Generator<'a> {
    /// A generator for the given runtime
    pub fn new(runtime: &'a WorkflowRuntime) -> Self {
        let labels = runtime_labels(&runtime.name_any());
        Self { runtime, labels }
    }

    fn object_meta(&self) -> ObjectMeta {
        ObjectMeta {
            namespace: self.runtime.metadata.namespace.clone(),
            name: Some(self.runtime.name_any()),
            labels: Some(self.labels.clone()),
            ..Default::default()
        }
    }

    /// The ServiceAccount the runtime pods run as
    pub fn desired_service_account(&self) -> ServiceAccount {
        ServiceAccount {
            metadata: self.object_meta(),
            ..Default::default()
        }
    }

    /// The RoleBinding tying the ServiceAccount to the operator role
    ///
    /// RoleBinding and ServiceAccount share the runtime's namespace/name.
    pub fn desired_role_binding(&self, sa: &ServiceAccount) -> RoleBinding {
        RoleBinding {
            metadata: self.object_meta(),
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: sa.name_any(),
                namespace: sa.metadata.namespace.clone(),
                ..Default::default()
            }]),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: RUNTIME_ROLE.to_string(),
            },
        }
    }

    /// The scheduler Deployment backing the runtime
    ///
    /// Replicas and container resources are the fields the owner keeps
    /// driving after creation; everything else is set once.
    pub fn desired_deployment(&self, service_account: &str) -> Deployment {
        Deployment {
            metadata: self.object_meta(),
            spec: Some(DeploymentSpec {
                replicas: Some(self.runtime.spec.replicas),
                selector: LabelSelector {
                    match_labels: Some(self.labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels.clone()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        service_account_name: Some(service_account.to_string()),
                        containers: vec![Container {
                            name: "scheduler".to_string(),
                            image: Some(SCHEDULER_IMAGE.to_string()),
                            ports: Some(vec![ContainerPort {
                                container_port: SCHEDULER_PORT,
                                protocol: Some("TCP".to_string()),
                                ..Default::default()
                            }]),
                            args: Some(vec![
                                "-c".to_string(), // collect mode
                                "-p".to_string(), // prestart mode
                                "-a".to_string(),
                                SCHEDULER_PORT.to_string(),
                                "-I".to_string(),
                                STORE_HOST.to_string(),
                                "-P".to_string(),
                                STORE_PORT.to_string(),
                            ]),
                            resources: self.runtime.spec.resources.clone(),
                            security_context: Some(SecurityContext {
                                privileged: Some(true),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// The Service exposing the runtime's scheduler pods
    pub fn desired_service(&self) -> Service {
        Service {
            metadata: self.object_meta(),
            spec: Some(ServiceSpec {
                selector: Some(self.labels.clone()),
                ports: Some(vec![ServicePort {
                    protocol: Some("TCP".to_string()),
                    port: SCHEDULER_PORT,
                    target_port: Some(IntOrString::Int(SCHEDULER_PORT)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// The WorkflowRuntime materialized for a Workflow
///
/// The instance map is seeded with a placeholder entry: the first `add`
/// patch from the topology synchronizer needs an existing `instances`
/// object to land in.
pub fn desired_workflow_runtime(workflow: &Workflow) -> WorkflowRuntime {
    let mut instances = BTreeMap::new();
    instances.insert("init".to_string(), Instance::with_pod_ip("localhost"));

    WorkflowRuntime {
        metadata: ObjectMeta {
            namespace: workflow.metadata.namespace.clone(),
            name: Some(workflow.name_any()),
            ..Default::default()
        },
        spec: WorkflowRuntimeSpec {
            replicas: DEFAULT_REPLICAS,
            resources: None,
            status: RuntimeStatus { instances },
        },
    }
}

/// The runner Pod kept warm for a Function
pub fn desired_function_pod(function: &Function) -> Pod {
    let claim = &function.spec.resource;
    let requests = BTreeMap::from([
        ("cpu".to_string(), Quantity(claim.cpu.clone())),
        ("memory".to_string(), Quantity(claim.memory.clone())),
    ]);

    Pod {
        metadata: ObjectMeta {
            namespace: function.metadata.namespace.clone(),
            name: Some(function.name_any()),
            labels: Some(function_labels(&function.name_any())),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "runner".to_string(),
                image: Some(function.spec.environment.runner_image().to_string()),
                ports: Some(vec![ContainerPort {
                    container_port: SCHEDULER_PORT,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                resources: Some(ResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            restart_policy: Some("OnFailure".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
