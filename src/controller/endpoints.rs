//! Endpoint watch feeding the topology synchronizer
//!
//! Every EndpointSlice change for a runtime Service is turned into a
//! minimal JSON patch against the owning WorkflowRuntime's instance map.
//! The whole get-diff-patch cycle runs under optimistic concurrency: on a
//! conflict the runtime is re-read and the diff recomputed, so concurrent
//! endpoint churn cannot silently drop an update.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument};

use super::Context;
use crate::crd::WorkflowRuntime;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::store::{KubeStore, Store};
use crate::topology::{diff, live_mesh, runtime_name};
use crate::{Error, Result};

// Conflicts under endpoint churn settle fast; a short bounded retry is
// enough before handing the slice back to the controller queue.
const PATCH_ATTEMPTS: u32 = 3;

/// Synchronizer applying endpoint observations to one namespace
pub struct EndpointSync {
    runtimes: Arc<dyn Store<WorkflowRuntime>>,
}

impl EndpointSync {
    /// Build a synchronizer over the given runtime store
    pub fn new(runtimes: Arc<dyn Store<WorkflowRuntime>>) -> Self {
        Self { runtimes }
    }

    /// Build a synchronizer over the real cluster for one namespace
    pub fn from_client(client: &Client, namespace: &str) -> Self {
        Self::new(Arc::new(KubeStore::namespaced(client.clone(), namespace)))
    }

    /// Apply one endpoint snapshot to the owning runtime's instance map
    pub async fn sync(&self, slice: &EndpointSlice) -> Result<()> {
        let live = live_mesh(slice);
        let name = runtime_name(&slice.name_any());

        let config = RetryConfig {
            max_attempts: PATCH_ATTEMPTS,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        };

        retry_with_backoff(&config, "topology_patch", Error::is_conflict, || {
            let runtimes = self.runtimes.clone();
            let live = live.clone();
            let name = name.clone();
            async move {
                let Some(runtime) = runtimes.get(&name).await? else {
                    // the runtime is gone (or never existed): the cascade is
                    // tearing the world down, nothing to record
                    debug!(runtime = %name, "no runtime for endpoint slice, skipping");
                    return Ok(());
                };

                let ops = diff(&live, &runtime.spec.status.instances)?;
                if ops.is_empty() {
                    debug!(runtime = %name, "topology unchanged");
                    return Ok(());
                }

                info!(runtime = %name, ops = ops.len(), "patching instance map");
                runtimes.json_patch(&name, &ops).await
            }
        })
        .await
    }
}

/// Reconcile an EndpointSlice observation
#[instrument(skip(slice, ctx), fields(slice = %slice.name_any()))]
pub async fn reconcile(slice: Arc<EndpointSlice>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = slice.namespace().unwrap_or_default();
    EndpointSync::from_client(&ctx.client, &namespace)
        .sync(&slice)
        .await?;
    Ok(Action::await_change())
}

/// Error policy for the endpoint watch: requeue with backoff
pub fn error_policy(slice: Arc<EndpointSlice>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        slice = %slice.name_any(),
        "topology synchronization failed"
    );
    Action::requeue(Duration::from_secs(5))
}
