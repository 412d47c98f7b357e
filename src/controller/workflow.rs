//! Workflow controller implementation
//!
//! Reconciles Workflow resources: drives the finalizer state machine,
//! validates the flow graph and its function references, materializes the
//! owned WorkflowRuntime, and keeps the status phase current. A validation
//! failure abandons the pass without mutating cluster state; the object is
//! retried when its spec changes.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::Context;
use crate::crd::{Function, Workflow, WorkflowPhase, WorkflowRuntime, WorkflowStatus};
use crate::ensure::{ensure, no_drift, set_controller_reference};
use crate::finalizer::{self, Step};
use crate::generate::{desired_workflow_runtime, runtime_labels};
use crate::graph::{validate, validate_functions_exist, FlowGraph};
use crate::store::{KubeStore, Store};
use crate::{Error, Result};

/// Reconciler for one Workflow's namespace, built over store interfaces
pub struct WorkflowReconciler {
    workflows: Arc<dyn Store<Workflow>>,
    runtimes: Arc<dyn Store<WorkflowRuntime>>,
    functions: Arc<dyn Store<Function>>,
    pods: Arc<dyn Store<Pod>>,
}

impl WorkflowReconciler {
    /// Build a reconciler from explicit store interfaces
    pub fn new(
        workflows: Arc<dyn Store<Workflow>>,
        runtimes: Arc<dyn Store<WorkflowRuntime>>,
        functions: Arc<dyn Store<Function>>,
        pods: Arc<dyn Store<Pod>>,
    ) -> Self {
        Self {
            workflows,
            runtimes,
            functions,
            pods,
        }
    }

    /// Build a reconciler over the real cluster for one namespace
    pub fn from_client(client: &Client, namespace: &str) -> Self {
        Self::new(
            Arc::new(KubeStore::namespaced(client.clone(), namespace)),
            Arc::new(KubeStore::namespaced(client.clone(), namespace)),
            Arc::new(KubeStore::namespaced(client.clone(), namespace)),
            Arc::new(KubeStore::namespaced(client.clone(), namespace)),
        )
    }

    /// Run one reconcile pass for the given Workflow
    pub async fn reconcile(&self, workflow: &Workflow) -> Result<Action> {
        let state = finalizer::observe(&workflow.metadata);
        match finalizer::next_step(state) {
            Step::Register => {
                debug!("registering workflow finalizer");
                self.register_finalizer(workflow).await?;
                // the update raises a fresh watch event; converge then
                return Ok(Action::await_change());
            }
            Step::Cleanup => {
                info!("workflow deletion requested, running external cleanup");
                self.finalize(workflow).await?;
                return Ok(Action::await_change());
            }
            Step::Done => {
                debug!("finalizer already removed, nothing to do");
                return Ok(Action::await_change());
            }
            Step::Proceed => {}
        }

        if let Err(e) = self.validate(workflow).await? {
            warn!(error = %e, "workflow validation failed");
            self.update_phase(workflow, WorkflowPhase::Invalid, &e.to_string())
                .await?;
            // a validation error needs a spec change, not a requeue
            return Ok(Action::await_change());
        }

        self.ensure_runtime(workflow).await?;
        self.update_phase(workflow, WorkflowPhase::Running, "workflow runtime converged")
            .await?;

        Ok(Action::requeue(Duration::from_secs(300)))
    }

    /// Validate the flow graph and its function references
    ///
    /// Validation errors are data, not failures: the outer `Result` carries
    /// store errors, the inner one the verdict on the graph.
    async fn validate(
        &self,
        workflow: &Workflow,
    ) -> Result<std::result::Result<(), crate::graph::ValidationError>> {
        let graph = match FlowGraph::from_spec(&workflow.spec) {
            Ok(graph) => graph,
            Err(e) => return Ok(Err(e)),
        };
        if let Err(e) = validate(&graph) {
            return Ok(Err(e));
        }

        let defined: HashSet<String> = self
            .functions
            .list(&BTreeMap::new())
            .await?
            .into_iter()
            .filter(|f| f.spec.domain == workflow.spec.domain)
            .map(|f| f.name_any())
            .collect();

        Ok(validate_functions_exist(&graph, &defined))
    }

    /// Create the owned WorkflowRuntime if it does not exist yet
    ///
    /// An existing runtime is left untouched: its instance map belongs to
    /// the topology synchronizer and its replicas to the user.
    async fn ensure_runtime(&self, workflow: &Workflow) -> Result<()> {
        let mut desired = desired_workflow_runtime(workflow);
        set_controller_reference(&mut desired, workflow);

        let outcome = ensure(self.runtimes.as_ref(), desired, no_drift).await?;
        debug!(?outcome, "workflow runtime ensured");
        Ok(())
    }

    async fn register_finalizer(&self, workflow: &Workflow) -> Result<()> {
        let mut updated = workflow.clone();
        let current = updated.metadata.finalizers.take().unwrap_or_default();
        updated.metadata.finalizers = Some(finalizer::with_token(&current));
        self.workflows.update(&updated).await?;
        debug!("workflow finalizer registered");
        Ok(())
    }

    /// Delete external resources, then release the finalizer
    ///
    /// The token is only removed after cleanup fully succeeds, so a failed
    /// cleanup blocks deletion and is retried on the next reconcile.
    async fn finalize(&self, workflow: &Workflow) -> Result<()> {
        if let Err(e) = self
            .update_phase(workflow, WorkflowPhase::Terminating, "external cleanup running")
            .await
        {
            warn!(error = %e, "could not record terminating phase, continuing cleanup");
        }

        self.cleanup_external(workflow).await?;

        let mut updated = workflow.clone();
        let current = updated.metadata.finalizers.take().unwrap_or_default();
        updated.metadata.finalizers = Some(finalizer::without_token(&current));
        self.workflows.update(&updated).await?;
        info!("workflow finalizer removed, deletion proceeds");
        Ok(())
    }

    /// Delete pods selected by the owner's label set
    ///
    /// The ownership cascade covers the runtime's children; execution pods
    /// matched by the label set are cleaned up here. Safe to run any number
    /// of times: deleting an absent pod is not an error.
    async fn cleanup_external(&self, workflow: &Workflow) -> Result<()> {
        let labels = runtime_labels(&workflow.name_any());
        let pods = self
            .pods
            .list(&labels)
            .await
            .map_err(|e| Error::cleanup(format!("cannot list workflow pods: {e}")))?;

        for pod in pods {
            let name = pod.name_any();
            self.pods
                .delete(&name)
                .await
                .map_err(|e| Error::cleanup(format!("cannot delete pod {name}: {e}")))?;
            debug!(pod = %name, "external pod deleted");
        }
        Ok(())
    }

    async fn update_phase(
        &self,
        workflow: &Workflow,
        phase: WorkflowPhase,
        message: &str,
    ) -> Result<()> {
        let current = workflow.status.as_ref();
        if current.map(|s| s.phase) == Some(phase)
            && current.and_then(|s| s.message.as_deref()) == Some(message)
        {
            return Ok(());
        }

        let mut updated = workflow.clone();
        updated.status = Some(WorkflowStatus::with_phase(phase).message(message));
        self.workflows.update_status(&updated).await?;
        debug!(?phase, "workflow status updated");
        Ok(())
    }
}

/// Reconcile a Workflow resource
#[instrument(skip(workflow, ctx), fields(workflow = %workflow.name_any()))]
pub async fn reconcile(workflow: Arc<Workflow>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = workflow.namespace().unwrap_or_default();
    let reconciler = WorkflowReconciler::from_client(&ctx.client, &namespace);
    reconciler.reconcile(&workflow).await
}

/// Error policy for the Workflow controller: requeue with backoff
pub fn error_policy(workflow: Arc<Workflow>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        workflow = %workflow.name_any(),
        "workflow reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        Environment, Flow, FunctionSpec, ResourceClaim, Role, Statement, WorkflowSpec,
    };
    use crate::store::MemoryStore;
    use crate::WORKFLOW_FINALIZER;
    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;

    // =========================================================================
    // Test Fixtures
    // =========================================================================

    struct Fixture {
        workflows: Arc<MemoryStore<Workflow>>,
        runtimes: Arc<MemoryStore<WorkflowRuntime>>,
        functions: Arc<MemoryStore<Function>>,
        pods: Arc<MemoryStore<Pod>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                workflows: Arc::new(MemoryStore::new()),
                runtimes: Arc::new(MemoryStore::new()),
                functions: Arc::new(MemoryStore::new()),
                pods: Arc::new(MemoryStore::new()),
            }
        }

        fn reconciler(&self) -> WorkflowReconciler {
            WorkflowReconciler::new(
                self.workflows.clone(),
                self.runtimes.clone(),
                self.functions.clone(),
                self.pods.clone(),
            )
        }
    }

    fn function(name: &str, domain: &str) -> Function {
        let mut f = Function::new(
            name,
            FunctionSpec {
                domain: domain.to_string(),
                environment: Environment::Golang,
                resource: ResourceClaim {
                    cpu: "100m".to_string(),
                    memory: "64Mi".to_string(),
                },
            },
        );
        f.metadata.namespace = Some("default".to_string());
        f
    }

    fn sample_workflow(name: &str) -> Workflow {
        let checkout = Flow {
            name: "checkout".to_string(),
            function: "checkout".to_string(),
            inputs: vec![],
            outputs: vec!["notify".to_string()],
            statement: Statement::Direct,
            role: Some(Role::Start),
            conditions: vec![],
        };
        let notify = Flow {
            name: "notify".to_string(),
            function: "notify".to_string(),
            inputs: vec!["checkout".to_string()],
            outputs: vec![],
            statement: Statement::Direct,
            role: Some(Role::End),
            conditions: vec![],
        };

        let mut wf = Workflow::new(
            name,
            WorkflowSpec {
                domain: "orders".to_string(),
                environment: Environment::Golang,
                env: Default::default(),
                flows: vec![checkout, notify],
            },
        );
        wf.metadata.namespace = Some("default".to_string());
        wf.metadata.uid = Some("uid-wf-1".to_string());
        wf
    }

    fn registered(mut wf: Workflow) -> Workflow {
        wf.metadata.finalizers = Some(vec![WORKFLOW_FINALIZER.to_string()]);
        wf
    }

    fn deleting(mut wf: Workflow) -> Workflow {
        wf.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        wf
    }

    fn labeled_pod(name: &str, labels: BTreeMap<String, String>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    // =========================================================================
    // Lifecycle Stories
    // =========================================================================

    /// Story: the first pass registers the finalizer before anything else
    ///
    /// The token must be persisted before children exist, or a crash
    /// between create and register would leak external resources.
    #[tokio::test]
    async fn story_first_pass_registers_the_finalizer() {
        let fx = Fixture::new();
        let wf = sample_workflow("sample");
        fx.workflows.create(&wf).await.unwrap();

        fx.reconciler().reconcile(&wf).await.unwrap();

        let stored = fx.workflows.stored("sample").unwrap();
        assert!(stored
            .metadata
            .finalizers
            .unwrap()
            .contains(&WORKFLOW_FINALIZER.to_string()));
        // no runtime yet: the pass stopped after registering
        assert_eq!(fx.runtimes.len(), 0);
    }

    /// Story: a valid workflow gets its runtime and turns Running
    #[tokio::test]
    async fn story_valid_workflow_materializes_its_runtime() {
        let fx = Fixture::new();
        fx.functions.create(&function("checkout", "orders")).await.unwrap();
        fx.functions.create(&function("notify", "orders")).await.unwrap();

        let wf = registered(sample_workflow("sample"));
        fx.workflows.create(&wf).await.unwrap();

        fx.reconciler().reconcile(&wf).await.unwrap();

        let runtime = fx.runtimes.stored("sample").unwrap();
        assert_eq!(runtime.spec.replicas, crate::DEFAULT_REPLICAS);
        let refs = runtime.metadata.owner_references.unwrap();
        assert_eq!(refs[0].name, "sample");

        let status = fx.workflows.stored("sample").unwrap().status.unwrap();
        assert_eq!(status.phase, WorkflowPhase::Running);
    }

    /// Story: an invalid graph marks the workflow Invalid and touches nothing
    #[tokio::test]
    async fn story_invalid_graph_is_rejected_without_cluster_mutation() {
        let fx = Fixture::new();
        let mut wf = registered(sample_workflow("sample"));
        // dangling successor reference
        wf.spec.flows[0].outputs = vec!["ghost".to_string()];
        fx.workflows.create(&wf).await.unwrap();

        fx.reconciler().reconcile(&wf).await.unwrap();

        assert_eq!(fx.runtimes.len(), 0);
        let status = fx.workflows.stored("sample").unwrap().status.unwrap();
        assert_eq!(status.phase, WorkflowPhase::Invalid);
        assert!(status.message.unwrap().contains("ghost"));
    }

    /// Story: a function missing from the domain registry blocks the runtime
    #[tokio::test]
    async fn story_undefined_function_is_rejected() {
        let fx = Fixture::new();
        // the function exists, but in another domain
        fx.functions.create(&function("checkout", "billing")).await.unwrap();
        fx.functions.create(&function("notify", "orders")).await.unwrap();

        let wf = registered(sample_workflow("sample"));
        fx.workflows.create(&wf).await.unwrap();

        fx.reconciler().reconcile(&wf).await.unwrap();

        assert_eq!(fx.runtimes.len(), 0);
        let status = fx.workflows.stored("sample").unwrap().status.unwrap();
        assert_eq!(status.phase, WorkflowPhase::Invalid);
        assert!(status.message.unwrap().contains("checkout"));
    }

    /// Story: an already-converged workflow replays without extra writes
    #[tokio::test]
    async fn story_replayed_pass_is_idempotent() {
        let fx = Fixture::new();
        fx.functions.create(&function("checkout", "orders")).await.unwrap();
        fx.functions.create(&function("notify", "orders")).await.unwrap();

        let wf = registered(sample_workflow("sample"));
        fx.workflows.create(&wf).await.unwrap();

        fx.reconciler().reconcile(&wf).await.unwrap();
        let converged = fx.workflows.stored("sample").unwrap();
        let runtime_writes = fx.runtimes.writes();
        let workflow_writes = fx.workflows.writes();

        fx.reconciler().reconcile(&converged).await.unwrap();
        assert_eq!(fx.runtimes.writes(), runtime_writes);
        assert_eq!(fx.workflows.writes(), workflow_writes);
    }

    // =========================================================================
    // Finalization Stories
    // =========================================================================

    /// Story: deletion cleans labeled pods, then releases the finalizer
    #[tokio::test]
    async fn story_deletion_cleans_up_and_releases_the_finalizer() {
        let fx = Fixture::new();
        let wf = deleting(registered(sample_workflow("sample")));
        fx.workflows.create(&wf).await.unwrap();

        fx.pods
            .create(&labeled_pod("sample-1", runtime_labels("sample")))
            .await
            .unwrap();
        fx.pods
            .create(&labeled_pod("bystander", runtime_labels("other")))
            .await
            .unwrap();

        fx.reconciler().reconcile(&wf).await.unwrap();

        // only the owner's pods are gone
        assert!(fx.pods.stored("sample-1").is_none());
        assert!(fx.pods.stored("bystander").is_some());

        let finalizers = fx.workflows.stored("sample").unwrap().metadata.finalizers;
        assert_eq!(finalizers, Some(vec![]));
    }

    /// Story: a cleanup failure keeps the finalizer so deletion blocks
    #[tokio::test]
    async fn story_cleanup_failure_leaves_the_finalizer_in_place() {
        /// Pod store whose deletes always fail
        struct StuckPods(MemoryStore<Pod>);

        #[async_trait]
        impl Store<Pod> for StuckPods {
            async fn get(&self, name: &str) -> Result<Option<Pod>> {
                self.0.get(name).await
            }
            async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<Pod>> {
                self.0.list(labels).await
            }
            async fn create(&self, obj: &Pod) -> Result<Pod> {
                self.0.create(obj).await
            }
            async fn update(&self, obj: &Pod) -> Result<Pod> {
                self.0.update(obj).await
            }
            async fn update_status(&self, obj: &Pod) -> Result<Pod> {
                self.0.update_status(obj).await
            }
            async fn json_patch(&self, name: &str, ops: &[crate::jsonpatch::PatchOp]) -> Result<()> {
                self.0.json_patch(name, ops).await
            }
            async fn delete(&self, _name: &str) -> Result<()> {
                Err(Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "storage is sulking".to_string(),
                    reason: "InternalError".to_string(),
                    code: 500,
                })))
            }
        }

        let fx = Fixture::new();
        let wf = deleting(registered(sample_workflow("sample")));
        fx.workflows.create(&wf).await.unwrap();

        let pods = MemoryStore::new();
        pods.create(&labeled_pod("sample-1", runtime_labels("sample")))
            .await
            .unwrap();

        let reconciler = WorkflowReconciler::new(
            fx.workflows.clone(),
            fx.runtimes.clone(),
            fx.functions.clone(),
            Arc::new(StuckPods(pods)),
        );

        let err = reconciler.reconcile(&wf).await.unwrap_err();
        assert!(matches!(err, Error::Cleanup(_)));

        // the token survives, so the object cannot disappear yet
        let finalizers = fx.workflows.stored("sample").unwrap().metadata.finalizers;
        assert_eq!(finalizers, Some(vec![WORKFLOW_FINALIZER.to_string()]));
    }
}
