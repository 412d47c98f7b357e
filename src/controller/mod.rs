//! Controller implementations for Nimbus CRDs
//!
//! This module contains the reconciliation logic for all Nimbus custom
//! resources plus the endpoint watch feeding the topology synchronizer.
//! Controllers follow the Kubernetes controller pattern with
//! observe-diff-act loops; each reconciler is built over [`crate::store`]
//! trait objects so its logic runs unchanged against the in-memory store
//! in tests.

pub mod endpoints;
pub mod function;
pub mod runtime;
pub mod workflow;

use kube::Client;

/// Controller context containing shared state and clients
///
/// The context is shared across all reconciliation calls and holds the
/// Kubernetes client the per-namespace stores are built from.
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,
}

impl Context {
    /// Create a new controller context with the given Kubernetes client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}
