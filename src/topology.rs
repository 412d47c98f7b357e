//! Instance-map differ fed by endpoint observations
//!
//! The endpoint watch delivers snapshots of the network endpoints backing a
//! runtime's Service. This module turns one snapshot plus the runtime's
//! current instance map into the minimal set of patch operations that
//! brings the map up to date: `replace` for moved pods, `remove` for
//! terminated ones, `add` for newly observed ones. An unchanged
//! observation yields an empty patch.

use std::collections::BTreeMap;

use k8s_openapi::api::discovery::v1::EndpointSlice;

use crate::crd::{Instance, InstanceStatus, Instances};
use crate::jsonpatch::{pointer, PatchOp};
use crate::{Error, Result};

/// Short identity of a pod: the last two dash-separated name segments
///
/// e.g. `workflow-sample-9657bf88d-btxwt` → `9657bf88d-btxwt`
pub fn pod_identity(pod_name: &str) -> String {
    let segments: Vec<&str> = pod_name.split('-').collect();
    if segments.len() <= 2 {
        return pod_name.to_string();
    }
    segments[segments.len() - 2..].join("-")
}

/// Owning runtime of an endpoint slice: the slice name minus its hash
///
/// e.g. `workflow-sample-qk4ng` → `workflow-sample`
pub fn runtime_name(slice_name: &str) -> String {
    match slice_name.rsplit_once('-') {
        Some((prefix, _hash)) => prefix.to_string(),
        None => slice_name.to_string(),
    }
}

/// Network view of a slice: pod identity → authoritative (first) address
///
/// Endpoints without a target pod or without any address are skipped; they
/// carry nothing the instance map could record.
pub fn live_mesh(slice: &EndpointSlice) -> BTreeMap<String, String> {
    let mut mesh = BTreeMap::new();
    for endpoint in &slice.endpoints {
        let Some(target) = endpoint.target_ref.as_ref().and_then(|r| r.name.as_deref()) else {
            continue;
        };
        let Some(address) = endpoint.addresses.first() else {
            continue;
        };
        mesh.insert(pod_identity(target), address.clone());
    }
    mesh
}

fn instance_path(identity: &str) -> String {
    pointer(&["spec", "status", "instances", identity])
}

fn status_path(identity: &str) -> String {
    pointer(&["spec", "status", "instances", identity, "status"])
}

/// Diff a live endpoint view against the current instance map
///
/// For identities present in both, the address is replaced only when it
/// changed. Identities only in the current map are removed (the pod has
/// terminated); identities only in the live view are added.
pub fn diff(live: &BTreeMap<String, String>, current: &Instances) -> Result<Vec<PatchOp>> {
    let mut ops = Vec::new();
    let mut fresh = live.clone();

    for (identity, instance) in current {
        match fresh.remove(identity) {
            Some(address) => {
                if instance.pod_ip() != Some(address.as_str()) {
                    let status = InstanceStatus {
                        host_ip: None,
                        pod_ip: Some(address),
                    };
                    let value = serde_json::to_value(&status)
                        .map_err(|e| Error::serialization(e.to_string()))?;
                    ops.push(PatchOp::replace(status_path(identity), value));
                }
            }
            None => ops.push(PatchOp::remove(instance_path(identity))),
        }
    }

    for (identity, address) in fresh {
        let value = serde_json::to_value(Instance::with_pod_ip(address))
            .map_err(|e| Error::serialization(e.to_string()))?;
        ops.push(PatchOp::add(instance_path(&identity), value));
    }

    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonpatch::Op;
    use serde_json::json;

    fn instances(entries: &[(&str, &str)]) -> Instances {
        entries
            .iter()
            .map(|(id, ip)| (id.to_string(), Instance::with_pod_ip(*ip)))
            .collect()
    }

    fn mesh(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(id, ip)| (id.to_string(), ip.to_string()))
            .collect()
    }

    #[test]
    fn pod_identity_keeps_the_last_two_segments() {
        assert_eq!(pod_identity("workflow-sample-9657bf88d-btxwt"), "9657bf88d-btxwt");
        assert_eq!(pod_identity("a-b"), "a-b");
        assert_eq!(pod_identity("solo"), "solo");
    }

    #[test]
    fn runtime_name_strips_the_trailing_hash() {
        assert_eq!(runtime_name("workflow-sample-qk4ng"), "workflow-sample");
        assert_eq!(runtime_name("nohash"), "nohash");
    }

    /// The canonical churn case: `a` unchanged, `c` gone, `b` new
    #[test]
    fn diff_emits_exactly_remove_and_add_for_churn() {
        let current = instances(&[("a", "ip1"), ("c", "ip3")]);
        let live = mesh(&[("a", "ip1"), ("b", "ip2")]);

        let ops = diff(&live, &current).unwrap();

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].op, Op::Remove);
        assert_eq!(ops[0].path, "/spec/status/instances/c");
        assert_eq!(ops[1].op, Op::Add);
        assert_eq!(ops[1].path, "/spec/status/instances/b");
        assert_eq!(ops[1].value.as_ref().unwrap()["status"]["podIP"], json!("ip2"));
    }

    /// A moved pod becomes a single replace of its status
    #[test]
    fn diff_replaces_a_changed_address() {
        let current = instances(&[("a", "ip_old")]);
        let live = mesh(&[("a", "ip_new")]);

        let ops = diff(&live, &current).unwrap();

        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op, Op::Replace);
        assert_eq!(ops[0].path, "/spec/status/instances/a/status");
        assert_eq!(ops[0].value.as_ref().unwrap()["podIP"], json!("ip_new"));
    }

    /// An unchanged observation yields an empty patch
    #[test]
    fn diff_of_identical_views_is_empty() {
        let current = instances(&[("a", "ip1"), ("b", "ip2")]);
        let live = mesh(&[("a", "ip1"), ("b", "ip2")]);

        assert!(diff(&live, &current).unwrap().is_empty());
    }

    #[test]
    fn live_mesh_takes_the_first_address_and_skips_empty_endpoints() {
        use k8s_openapi::api::core::v1::ObjectReference;
        use k8s_openapi::api::discovery::v1::Endpoint;

        let slice = EndpointSlice {
            address_type: "IPv4".to_string(),
            endpoints: vec![
                Endpoint {
                    addresses: vec!["10.0.0.7".to_string(), "10.0.0.8".to_string()],
                    target_ref: Some(ObjectReference {
                        name: Some("workflow-sample-9657bf88d-btxwt".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Endpoint {
                    // no target pod: nothing to key an instance by
                    addresses: vec!["10.0.0.9".to_string()],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let mesh = live_mesh(&slice);
        assert_eq!(mesh.len(), 1);
        assert_eq!(mesh.get("9657bf88d-btxwt").map(String::as_str), Some("10.0.0.7"));
    }
}
