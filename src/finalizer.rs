//! Finalizer state machine for cleanup ordering
//!
//! Deletion of a Workflow must not complete until its external resources
//! are gone. The machine is kept as pure functions over what is observable
//! on the object - whether our token is in `metadata.finalizers` and
//! whether a deletion timestamp is set - so the transitions can be tested
//! without a cluster:
//!
//! ```text
//! Unregistered --add token--> Registered --deletion marker--> Terminating
//!      Terminating --cleanup ok, remove token--> Finalized
//! ```
//!
//! A cleanup failure leaves the token in place, which blocks the deletion
//! until a later reconcile succeeds.

use kube::api::ObjectMeta;

use crate::WORKFLOW_FINALIZER;

/// Where an object stands in its finalization lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerState {
    /// Alive, token not yet registered
    Unregistered,
    /// Alive, token registered
    Registered,
    /// Deletion requested, token still present: cleanup must run
    Terminating,
    /// Deletion requested and token removed: the store will collect it
    Finalized,
}

/// The action a reconcile pass must take for a given state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Persist the token before creating any child resource
    Register,
    /// Run external cleanup, then remove the token
    Cleanup,
    /// Converge normally
    Proceed,
    /// Nothing left to do; the object is on its way out
    Done,
}

/// Derive the finalizer state from an object's metadata
pub fn observe(meta: &ObjectMeta) -> FinalizerState {
    let registered = meta
        .finalizers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|f| f == WORKFLOW_FINALIZER);
    let deleting = meta.deletion_timestamp.is_some();

    match (registered, deleting) {
        (false, false) => FinalizerState::Unregistered,
        (true, false) => FinalizerState::Registered,
        (true, true) => FinalizerState::Terminating,
        (false, true) => FinalizerState::Finalized,
    }
}

/// The transition function: what to do in each state
pub fn next_step(state: FinalizerState) -> Step {
    match state {
        FinalizerState::Unregistered => Step::Register,
        FinalizerState::Registered => Step::Proceed,
        FinalizerState::Terminating => Step::Cleanup,
        FinalizerState::Finalized => Step::Done,
    }
}

/// The finalizer list with our token added
pub fn with_token(finalizers: &[String]) -> Vec<String> {
    let mut out = finalizers.to_vec();
    if !out.iter().any(|f| f == WORKFLOW_FINALIZER) {
        out.push(WORKFLOW_FINALIZER.to_string());
    }
    out
}

/// The finalizer list with our token removed
pub fn without_token(finalizers: &[String]) -> Vec<String> {
    finalizers
        .iter()
        .filter(|f| f.as_str() != WORKFLOW_FINALIZER)
        .cloned()
        .collect()
}
