//! Object store abstraction over the Kubernetes API
//!
//! Reconcilers talk to the external state store through the [`Store`]
//! trait instead of a concrete client, so the convergence logic can be
//! exercised against an in-memory fake. [`KubeStore`] is the production
//! implementation: a namespace-scoped `kube::Api` with every call bounded
//! by an explicit deadline.
//!
//! NotFound is not an error at this boundary: `get` returns `Ok(None)` and
//! `delete` of an absent object succeeds, so convergence code can treat a
//! missing object as the create path and cleanup stays idempotent.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::jsonpatch::PatchOp;
use crate::{Error, Result};

/// Default deadline for a single store call
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Namespace-scoped access to one kind of stored object
#[async_trait]
pub trait Store<K>: Send + Sync {
    /// Fetch an object by name; `None` when it does not exist
    async fn get(&self, name: &str) -> Result<Option<K>>;

    /// List objects matching all of the given labels
    async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<K>>;

    /// Create a new object
    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace an existing object
    async fn update(&self, obj: &K) -> Result<K>;

    /// Replace the status subresource of an existing object
    async fn update_status(&self, obj: &K) -> Result<K>;

    /// Apply a JSON patch to the named object as one atomic request
    async fn json_patch(&self, name: &str, ops: &[PatchOp]) -> Result<()>;

    /// Delete an object; deleting an absent object is not an error
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Production [`Store`] backed by a namespace-scoped `kube::Api`
pub struct KubeStore<K> {
    api: Api<K>,
    op_timeout: Duration,
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug,
{
    /// A store for `K` objects in the given namespace
    pub fn namespaced(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Override the per-call deadline
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// Run a store call under the configured deadline
    ///
    /// An unbounded call can wedge a reconcile worker forever; every
    /// request goes through here.
    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = kube::Result<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(kube::Error::Api(ae))) if ae.code == 409 => Err(Error::conflict(ae.message)),
            Ok(Err(e)) => Err(Error::Kube(e)),
            Err(_) => Err(Error::deadline(what.to_string())),
        }
    }
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl<K> Store<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync,
{
    async fn get(&self, name: &str) -> Result<Option<K>> {
        self.bounded("get", self.api.get_opt(name)).await
    }

    async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<K>> {
        let params = ListParams::default().labels(&label_selector(labels));
        let list = self.bounded("list", self.api.list(&params)).await?;
        Ok(list.items)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        self.bounded("create", self.api.create(&PostParams::default(), obj))
            .await
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.bounded("update", self.api.replace(&name, &PostParams::default(), obj))
            .await
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        let data = serde_json::to_vec(obj).map_err(|e| Error::serialization(e.to_string()))?;
        self.bounded(
            "update_status",
            self.api.replace_status(&name, &PostParams::default(), data),
        )
        .await
    }

    async fn json_patch(&self, name: &str, ops: &[PatchOp]) -> Result<()> {
        let patch: json_patch::Patch = serde_json::from_value(
            serde_json::to_value(ops).map_err(|e| Error::serialization(e.to_string()))?,
        )
        .map_err(|e| Error::serialization(e.to_string()))?;

        self.bounded(
            "json_patch",
            self.api
                .patch(name, &PatchParams::default(), &Patch::Json::<()>(patch)),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let result = tokio::time::timeout(
            self.op_timeout,
            self.api.delete(name, &DeleteParams::default()),
        )
        .await;

        match result {
            Ok(Ok(_)) => Ok(()),
            // already gone: cleanup stays idempotent
            Ok(Err(kube::Error::Api(ae))) if ae.code == 404 => Ok(()),
            Ok(Err(e)) => Err(Error::Kube(e)),
            Err(_) => Err(Error::deadline("delete".to_string())),
        }
    }
}

#[cfg(test)]
pub use memory::MemoryStore;

#[cfg(test)]
mod memory {
    //! In-memory [`Store`] fake for unit tests
    //!
    //! Applies JSON patches with the same pointer semantics as the API
    //! server and counts writes, so idempotence ("the second pass performs
    //! zero writes") is directly assertable.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use serde_json::Value;

    use super::*;
    use crate::jsonpatch::{unescape, Op};

    /// In-memory store keyed by object name
    pub struct MemoryStore<K> {
        items: Mutex<BTreeMap<String, K>>,
        writes: AtomicU32,
        fail_next: Mutex<Option<Error>>,
    }

    impl<K> MemoryStore<K>
    where
        K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
    {
        /// An empty store
        pub fn new() -> Self {
            Self {
                items: Mutex::new(BTreeMap::new()),
                writes: AtomicU32::new(0),
                fail_next: Mutex::new(None),
            }
        }

        /// A store pre-seeded with objects
        pub fn with_objects(objects: impl IntoIterator<Item = K>) -> Self {
            let store = Self::new();
            {
                let mut items = store.items.lock().unwrap();
                for obj in objects {
                    items.insert(obj.name_any(), obj);
                }
            }
            store
        }

        /// Number of write operations performed so far
        pub fn writes(&self) -> u32 {
            self.writes.load(Ordering::SeqCst)
        }

        /// Make the next store call fail with the given error
        pub fn inject_error(&self, err: Error) {
            *self.fail_next.lock().unwrap() = Some(err);
        }

        /// Snapshot of a stored object
        pub fn stored(&self, name: &str) -> Option<K> {
            self.items.lock().unwrap().get(name).cloned()
        }

        /// Number of stored objects
        pub fn len(&self) -> usize {
            self.items.lock().unwrap().len()
        }

        fn check_injected(&self) -> Result<()> {
            match self.fail_next.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn record_write(&self) {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Apply one patch operation to a JSON tree, pointer semantics only as
    /// deep as the operator needs (object members, no array indexes).
    fn apply_op(root: &mut Value, op: &PatchOp) -> Result<()> {
        let segments: Vec<String> = op
            .path
            .split('/')
            .skip(1)
            .map(unescape)
            .collect();
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| Error::serialization(format!("empty patch path {:?}", op.path)))?;

        let mut node = root;
        for segment in parents {
            node = node
                .get_mut(segment.as_str())
                .ok_or_else(|| Error::conflict(format!("missing path segment {segment}")))?;
        }
        let map = node
            .as_object_mut()
            .ok_or_else(|| Error::conflict(format!("{:?} is not an object", op.path)))?;

        match op.op {
            Op::Add | Op::Replace => {
                map.insert(last.clone(), op.value.clone().unwrap_or(Value::Null));
            }
            Op::Remove => {
                map.remove(last.as_str())
                    .ok_or_else(|| Error::conflict(format!("remove of absent {:?}", op.path)))?;
            }
        }
        Ok(())
    }

    #[async_trait]
    impl<K> Store<K> for MemoryStore<K>
    where
        K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
    {
        async fn get(&self, name: &str) -> Result<Option<K>> {
            self.check_injected()?;
            Ok(self.items.lock().unwrap().get(name).cloned())
        }

        async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<K>> {
            self.check_injected()?;
            let items = self.items.lock().unwrap();
            Ok(items
                .values()
                .filter(|obj| {
                    let meta = obj.meta();
                    let have = meta.labels.clone().unwrap_or_default();
                    labels.iter().all(|(k, v)| have.get(k) == Some(v))
                })
                .cloned()
                .collect())
        }

        async fn create(&self, obj: &K) -> Result<K> {
            self.check_injected()?;
            let mut items = self.items.lock().unwrap();
            let name = obj.name_any();
            if items.contains_key(&name) {
                return Err(Error::conflict(format!("{name} already exists")));
            }
            items.insert(name, obj.clone());
            self.record_write();
            Ok(obj.clone())
        }

        async fn update(&self, obj: &K) -> Result<K> {
            self.check_injected()?;
            let mut items = self.items.lock().unwrap();
            let name = obj.name_any();
            if !items.contains_key(&name) {
                return Err(Error::conflict(format!("{name} does not exist")));
            }
            items.insert(name, obj.clone());
            self.record_write();
            Ok(obj.clone())
        }

        async fn update_status(&self, obj: &K) -> Result<K> {
            self.update(obj).await
        }

        async fn json_patch(&self, name: &str, ops: &[PatchOp]) -> Result<()> {
            self.check_injected()?;
            if ops.is_empty() {
                return Ok(());
            }
            let mut items = self.items.lock().unwrap();
            let obj = items
                .get(name)
                .ok_or_else(|| Error::conflict(format!("{name} does not exist")))?;

            let mut value =
                serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
            for op in ops {
                apply_op(&mut value, op)?;
            }
            let patched: K =
                serde_json::from_value(value).map_err(|e| Error::serialization(e.to_string()))?;

            items.insert(name.to_string(), patched);
            self.record_write();
            Ok(())
        }

        async fn delete(&self, name: &str) -> Result<()> {
            self.check_injected()?;
            if self.items.lock().unwrap().remove(name).is_some() {
                self.record_write();
            }
            Ok(())
        }
    }
}
