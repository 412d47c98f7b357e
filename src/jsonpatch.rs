//! RFC 6902 JSON Patch operations and pointer escaping
//!
//! The topology synchronizer describes every change to a runtime's
//! instance map as a sequence of patch operations applied atomically in
//! one request:
//!
//! ```json
//! [
//!   { "op": "replace", "path": "/spec/status/instances/abc-def/status", "value": {...} },
//!   { "op": "remove", "path": "/spec/status/instances/old-pod" }
//! ]
//! ```
//!
//! Pointer segments containing literal `~` or `/` are escaped as `~0` and
//! `~1` respectively, per RFC 6901.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One add/replace/remove edit against a stored object's field tree
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PatchOp {
    /// The operation kind
    pub op: Op,
    /// Slash-separated pointer into the target object
    pub path: String,
    /// New value, absent for `remove`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOp {
    /// An `add` operation inserting `value` at `path`
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: Op::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    /// A `replace` operation setting `path` to `value`
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: Op::Replace,
            path: path.into(),
            value: Some(value),
        }
    }

    /// A `remove` operation deleting the value at `path`
    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: Op::Remove,
            path: path.into(),
            value: None,
        }
    }
}

/// JSON Patch operation kinds used by the operator
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    /// Insert a value at a path that does not exist yet
    Add,
    /// Overwrite the value at an existing path
    Replace,
    /// Delete the value at an existing path
    Remove,
}

/// Escape one pointer segment per RFC 6901
///
/// `~` must be escaped before `/`, or an input `/` would end up as `~01`.
pub fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Unescape one pointer segment per RFC 6901
pub fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Build a pointer from segments, escaping each one
///
/// `pointer(&["spec", "status", "instances", name])` yields
/// `/spec/status/instances/<escaped-name>`.
pub fn pointer<S: AsRef<str>>(segments: &[S]) -> String {
    let mut path = String::new();
    for segment in segments {
        path.push('/');
        path.push_str(&escape(segment.as_ref()));
    }
    path
}
