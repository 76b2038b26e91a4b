//! Toggles whether new Pods may be scheduled onto a Node.
//!
//! The flag is flipped on a local copy of the Node and the difference is submitted as a JSON patch.
//! If the difference cannot be computed, the whole object is replaced instead; callers cannot
//! tell the two apart.
use crate::cluster::ClusterClient;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{event, instrument, Level};

/// Returns whether the Node is currently marked unschedulable.
pub fn is_unschedulable(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false)
}

/// Sets the Node's `spec.unschedulable` flag to `desired_unschedulable`.
///
/// Returns `Ok(false)` without contacting the cluster if the flag already has the desired value.
#[instrument(skip(client, node), fields(node_name = %node.name_any()), err)]
pub async fn set_schedulable<T: ClusterClient>(
    client: &T,
    node: &Node,
    desired_unschedulable: bool,
) -> kube::Result<bool> {
    if is_unschedulable(node) == desired_unschedulable {
        event!(
            Level::DEBUG,
            unschedulable = desired_unschedulable,
            "Node already has the desired schedulability."
        );
        return Ok(false);
    }

    let mut updated = node.clone();
    updated.spec.get_or_insert_with(Default::default).unschedulable = Some(desired_unschedulable);

    let patch = schedulability_patch(node, &updated);
    patch_or_replace(client, &updated, patch).await?;

    event!(
        Level::INFO,
        unschedulable = desired_unschedulable,
        "Updated Node schedulability."
    );
    Ok(true)
}

/// Computes the JSON patch turning `before` into `after`.
fn schedulability_patch(before: &Node, after: &Node) -> serde_json::Result<json_patch::Patch> {
    let before = serde_json::to_value(before)?;
    let after = serde_json::to_value(after)?;
    Ok(json_patch::diff(&before, &after))
}

async fn patch_or_replace<T: ClusterClient>(
    client: &T,
    updated: &Node,
    patch: serde_json::Result<json_patch::Patch>,
) -> kube::Result<Node> {
    let name = updated.name_any();
    match patch {
        Ok(patch) => client.patch_node(&name, &patch).await,
        Err(err) => {
            event!(
                Level::WARN,
                %err,
                "Unable to compute Node patch, replacing the whole object instead."
            );
            client.replace_node(&name, updated).await
        }
    }
}
