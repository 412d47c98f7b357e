//! Create-or-update convergence for managed objects
//!
//! One idempotent primitive drives every child object toward its desired
//! shape: fetch by name, create when absent, otherwise let a drift closure
//! copy the few owner-managed fields onto the live object and persist only
//! if something actually changed. System-managed fields are never touched,
//! and a replayed reconcile of an already-converged object performs zero
//! writes.

use kube::{Resource, ResourceExt};

use crate::store::Store;
use crate::Result;

/// Outcome of one convergence step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ensured {
    /// The object did not exist and was created
    Created,
    /// The object existed and drifted fields were written back
    Updated,
    /// The object already matched; nothing was written
    Unchanged,
}

/// Drive one object to its desired shape
///
/// `drift` receives the desired object and the live one; it copies the
/// fields the owner is allowed to keep driving (e.g. replicas) onto the
/// live object and returns whether anything changed. Pass
/// [`no_drift`] for objects that are set once at creation.
pub async fn ensure<K, F>(store: &dyn Store<K>, desired: K, drift: F) -> Result<Ensured>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync,
    F: FnOnce(&K, &mut K) -> bool + Send,
{
    let name = desired.name_any();
    match store.get(&name).await? {
        None => {
            store.create(&desired).await?;
            Ok(Ensured::Created)
        }
        Some(mut actual) => {
            if drift(&desired, &mut actual) {
                store.update(&actual).await?;
                Ok(Ensured::Updated)
            } else {
                Ok(Ensured::Unchanged)
            }
        }
    }
}

/// Drift closure for objects fully determined at creation time
pub fn no_drift<K>(_desired: &K, _actual: &mut K) -> bool {
    false
}

/// Record `owner` as the controlling owner of `child`
///
/// The back-reference is what lets the orchestration substrate cascade
/// deletion from owner to child. A no-op when the owner has no uid yet or
/// the reference is already present.
pub fn set_controller_reference<K, O>(child: &mut K, owner: &O)
where
    K: Resource<DynamicType = ()>,
    O: Resource<DynamicType = ()>,
{
    let Some(owner_ref) = owner.controller_owner_ref(&()) else {
        return;
    };
    let refs = child.meta_mut().owner_references.get_or_insert_with(Vec::new);
    if !refs
        .iter()
        .any(|r| r.uid == owner_ref.uid && r.name == owner_ref.name && r.kind == owner_ref.kind)
    {
        refs.push(owner_ref);
    }
}
