//! Nimbus Operator - serverless workflow placement and topology bookkeeping

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nimbus::controller::{endpoints, function, runtime, workflow, Context};
use nimbus::crd::{Function, Workflow, WorkflowRuntime};

/// Nimbus - CRD-driven Kubernetes operator for serverless workflows
#[derive(Parser, Debug)]
#[command(name = "nimbus", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches Workflow, WorkflowRuntime and Function CRDs plus the
    /// EndpointSlices of runtime Services, and reconciles them.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        // Generate CRD YAML for all resources
        for crd in [
            serde_yaml::to_string(&Workflow::crd())?,
            serde_yaml::to_string(&WorkflowRuntime::crd())?,
            serde_yaml::to_string(&Function::crd())?,
        ] {
            println!("---");
            println!("{crd}");
        }
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller().await,
    }
}

/// Ensure all Nimbus CRDs are installed
///
/// The operator installs its own CRDs on startup using server-side apply,
/// so the CRD versions always match the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(nimbus::FIELD_MANAGER).force();

    tracing::info!("Installing Workflow CRD...");
    crds.patch("workflows.nimbus.dev", &params, &Patch::Apply(&Workflow::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install Workflow CRD: {}", e))?;

    tracing::info!("Installing WorkflowRuntime CRD...");
    crds.patch(
        "workflowruntimes.nimbus.dev",
        &params,
        &Patch::Apply(&WorkflowRuntime::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install WorkflowRuntime CRD: {}", e))?;

    tracing::info!("Installing Function CRD...");
    crds.patch("functions.nimbus.dev", &params, &Patch::Apply(&Function::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install Function CRD: {}", e))?;

    tracing::info!("All Nimbus CRDs installed/updated");
    Ok(())
}

/// Run in controller mode - manages workflows and their runtimes
async fn run_controller() -> anyhow::Result<()> {
    tracing::info!("Nimbus controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    // Operator installs its own CRDs on startup
    ensure_crds_installed(&client).await?;

    let ctx = Arc::new(Context::new(client.clone()));

    let workflows: Api<Workflow> = Api::all(client.clone());
    let runtimes: Api<WorkflowRuntime> = Api::all(client.clone());
    let functions: Api<Function> = Api::all(client.clone());
    // Runtime Services propagate their labels onto the EndpointSlices the
    // endpoint controller derives from them, so the watch can select on the
    // runtime label set directly.
    let slices: Api<EndpointSlice> = Api::all(client.clone());
    let slice_watch = WatcherConfig::default().labels("type=workflowRuntime");

    tracing::info!("Starting Nimbus controllers...");
    tracing::info!("  - Workflow controller");
    tracing::info!("  - WorkflowRuntime controller");
    tracing::info!("  - Function controller");
    tracing::info!("  - EndpointSlice topology watch");

    let workflow_controller = Controller::new(workflows, WatcherConfig::default())
        .owns(
            Api::<WorkflowRuntime>::all(client.clone()),
            WatcherConfig::default(),
        )
        .shutdown_on_signal()
        .run(workflow::reconcile, workflow::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "Workflow reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "Workflow reconciliation error"),
            }
        });

    let runtime_controller = Controller::new(runtimes, WatcherConfig::default())
        .owns(Api::<Deployment>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Service>::all(client.clone()), WatcherConfig::default())
        .shutdown_on_signal()
        .run(runtime::reconcile, runtime::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "Runtime reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "Runtime reconciliation error"),
            }
        });

    let function_controller = Controller::new(functions, WatcherConfig::default())
        .owns(Api::<Pod>::all(client.clone()), WatcherConfig::default())
        .shutdown_on_signal()
        .run(function::reconcile, function::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "Function reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "Function reconciliation error"),
            }
        });

    let endpoint_controller = Controller::new(slices, slice_watch)
        .shutdown_on_signal()
        .run(endpoints::reconcile, endpoints::error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => tracing::debug!(?action, "Topology synchronization completed"),
                Err(e) => tracing::error!(error = ?e, "Topology synchronization error"),
            }
        });

    // Run all controllers concurrently
    tokio::select! {
        _ = workflow_controller => {
            tracing::info!("Workflow controller completed");
        }
        _ = runtime_controller => {
            tracing::info!("Runtime controller completed");
        }
        _ = function_controller => {
            tracing::info!("Function controller completed");
        }
        _ = endpoint_controller => {
            tracing::info!("EndpointSlice watch completed");
        }
    }

    tracing::info!("Nimbus controller shutting down");
    Ok(())
}
