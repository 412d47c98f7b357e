//! Function controller implementation
//!
//! Keeps a warm runner pod per registered Function so the scheduler has an
//! execution target the first time a workflow invokes it. The pod carries
//! the `function: <name>` selection label and is owned by the Function, so
//! deleting the Function cascades to the pod.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, instrument};

use super::Context;
use crate::crd::Function;
use crate::ensure::{ensure, no_drift, set_controller_reference};
use crate::generate::desired_function_pod;
use crate::store::{KubeStore, Store};
use crate::{Error, Result};

/// Reconciler keeping one Function's runner pod alive
pub struct FunctionReconciler {
    pods: Arc<dyn Store<Pod>>,
}

impl FunctionReconciler {
    /// Build a reconciler over the given pod store
    pub fn new(pods: Arc<dyn Store<Pod>>) -> Self {
        Self { pods }
    }

    /// Build a reconciler over the real cluster for one namespace
    pub fn from_client(client: &Client, namespace: &str) -> Self {
        Self::new(Arc::new(KubeStore::namespaced(client.clone(), namespace)))
    }

    /// Run one convergence pass for the given Function
    pub async fn reconcile(&self, function: &Function) -> Result<Action> {
        let mut pod = desired_function_pod(function);
        set_controller_reference(&mut pod, function);

        let outcome = ensure(self.pods.as_ref(), pod, no_drift).await?;
        debug!(?outcome, "function runner pod ensured");

        Ok(Action::requeue(Duration::from_secs(300)))
    }
}

/// Reconcile a Function resource
#[instrument(skip(function, ctx), fields(function = %function.name_any()))]
pub async fn reconcile(function: Arc<Function>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = function.namespace().unwrap_or_default();
    FunctionReconciler::from_client(&ctx.client, &namespace)
        .reconcile(&function)
        .await
}

/// Error policy for the Function controller: requeue with backoff
pub fn error_policy(function: Arc<Function>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        function = %function.name_any(),
        "function reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}
