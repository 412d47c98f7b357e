//! WorkflowRuntime controller implementation
//!
//! Converges the infrastructure children of a WorkflowRuntime in
//! dependency order: ServiceAccount and RoleBinding first (the Deployment
//! refers to the ServiceAccount by name), then the scheduler Deployment,
//! then the Service exposing it. Replicas and container resources are the
//! only fields the owner keeps driving after creation; everything else is
//! written once and left to the cluster.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, instrument};

use super::Context;
use crate::crd::WorkflowRuntime;
use crate::ensure::{ensure, no_drift, set_controller_reference, Ensured};
use crate::generate::Generator;
use crate::store::{KubeStore, Store};
use crate::{Error, Result};

/// Store interfaces for a runtime's child object kinds
pub struct RuntimeStores {
    /// ServiceAccount store
    pub service_accounts: Arc<dyn Store<ServiceAccount>>,
    /// RoleBinding store
    pub role_bindings: Arc<dyn Store<RoleBinding>>,
    /// Deployment store
    pub deployments: Arc<dyn Store<Deployment>>,
    /// Service store
    pub services: Arc<dyn Store<Service>>,
}

impl RuntimeStores {
    /// Stores over the real cluster for one namespace
    pub fn from_client(client: &Client, namespace: &str) -> Self {
        Self {
            service_accounts: Arc::new(KubeStore::namespaced(client.clone(), namespace)),
            role_bindings: Arc::new(KubeStore::namespaced(client.clone(), namespace)),
            deployments: Arc::new(KubeStore::namespaced(client.clone(), namespace)),
            services: Arc::new(KubeStore::namespaced(client.clone(), namespace)),
        }
    }
}

/// Reconciler converging one WorkflowRuntime's children
pub struct RuntimeReconciler {
    stores: RuntimeStores,
}

impl RuntimeReconciler {
    /// Build a reconciler over the given stores
    pub fn new(stores: RuntimeStores) -> Self {
        Self { stores }
    }

    /// Run one convergence pass for the given runtime
    pub async fn reconcile(&self, runtime: &WorkflowRuntime) -> Result<Action> {
        let generator = Generator::new(runtime);

        let service_account = self.reconcile_rbac(runtime, &generator).await?;
        self.reconcile_deployment(runtime, &generator, &service_account)
            .await?;
        self.reconcile_service(runtime, &generator).await?;

        Ok(Action::requeue(Duration::from_secs(300)))
    }

    /// Ensure ServiceAccount and RoleBinding; returns the account name
    async fn reconcile_rbac(
        &self,
        runtime: &WorkflowRuntime,
        generator: &Generator<'_>,
    ) -> Result<String> {
        let mut sa = generator.desired_service_account();
        set_controller_reference(&mut sa, runtime);
        let name = sa.name_any();
        let outcome = ensure(self.stores.service_accounts.as_ref(), sa, no_drift).await?;
        log_outcome("serviceaccount", &name, outcome);

        // the rolebinding is built from the desired account, not the actual:
        // on the create path there is no actual object yet
        let sa = generator.desired_service_account();
        let mut binding = generator.desired_role_binding(&sa);
        set_controller_reference(&mut binding, runtime);
        let outcome = ensure(self.stores.role_bindings.as_ref(), binding, no_drift).await?;
        log_outcome("rolebinding", &name, outcome);

        Ok(name)
    }

    async fn reconcile_deployment(
        &self,
        runtime: &WorkflowRuntime,
        generator: &Generator<'_>,
        service_account: &str,
    ) -> Result<()> {
        let mut deployment = generator.desired_deployment(service_account);
        set_controller_reference(&mut deployment, runtime);
        let name = deployment.name_any();
        let outcome = ensure(
            self.stores.deployments.as_ref(),
            deployment,
            deployment_drift,
        )
        .await?;
        log_outcome("deployment", &name, outcome);
        Ok(())
    }

    async fn reconcile_service(
        &self,
        runtime: &WorkflowRuntime,
        generator: &Generator<'_>,
    ) -> Result<()> {
        let mut service = generator.desired_service();
        set_controller_reference(&mut service, runtime);
        let name = service.name_any();
        let outcome = ensure(self.stores.services.as_ref(), service, no_drift).await?;
        log_outcome("service", &name, outcome);
        Ok(())
    }
}

fn log_outcome(kind: &str, name: &str, outcome: Ensured) {
    match outcome {
        Ensured::Created => tracing::info!(kind, name, "child created"),
        Ensured::Updated => tracing::info!(kind, name, "child updated"),
        Ensured::Unchanged => debug!(kind, name, "child unchanged"),
    }
}

/// Copy owner-driven Deployment fields onto the live object
///
/// Replicas and the scheduler container's resources may drift as the
/// runtime spec changes; system-managed fields stay untouched.
fn deployment_drift(desired: &Deployment, actual: &mut Deployment) -> bool {
    let (Some(want), Some(have)) = (desired.spec.as_ref(), actual.spec.as_mut()) else {
        return false;
    };

    let mut changed = false;
    if have.replicas != want.replicas {
        have.replicas = want.replicas;
        changed = true;
    }

    let want_resources = want
        .template
        .spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.resources.clone());
    if let Some(container) = have
        .template
        .spec
        .as_mut()
        .and_then(|s| s.containers.first_mut())
    {
        if container.resources != want_resources {
            container.resources = want_resources;
            changed = true;
        }
    }

    changed
}

/// Reconcile a WorkflowRuntime resource
#[instrument(skip(runtime, ctx), fields(runtime = %runtime.name_any()))]
pub async fn reconcile(runtime: Arc<WorkflowRuntime>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = runtime.namespace().unwrap_or_default();
    let stores = RuntimeStores::from_client(&ctx.client, &namespace);
    RuntimeReconciler::new(stores).reconcile(&runtime).await
}

/// Error policy for the WorkflowRuntime controller: requeue with backoff
pub fn error_policy(runtime: Arc<WorkflowRuntime>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        runtime = %runtime.name_any(),
        "runtime reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}
