//! Discovers whether the cluster serves the Eviction API.
use crate::cluster::ClusterClient;
use crate::constants::{CORE_API_VERSION, EVICTION_KIND, EVICTION_SUBRESOURCE, POLICY_API_GROUP};

use tracing::{event, instrument, Level};

/// Returns the group version (e.g. `policy/v1`) under which Pod evictions are served, or `None` if
/// Pods can only be removed by deleting them.
///
/// Only the `pods/eviction` subresource of the core API is considered; other resources of the
/// policy group are irrelevant.
#[instrument(skip(client), err)]
pub async fn detect_eviction_support<T: ClusterClient>(client: &T) -> kube::Result<Option<String>> {
    let groups = client.list_api_groups().await?;
    if !groups
        .groups
        .iter()
        .any(|group| group.name == POLICY_API_GROUP)
    {
        event!(Level::INFO, "Cluster does not serve the policy API group.");
        return Ok(None);
    }

    let resources = client.list_core_api_resources(CORE_API_VERSION).await?;
    let group_version = resources.resources.iter().find_map(|resource| {
        if resource.name != EVICTION_SUBRESOURCE || resource.kind != EVICTION_KIND {
            return None;
        }
        match (resource.group.as_deref(), resource.version.as_deref()) {
            (Some(group), Some(version)) if !group.is_empty() && !version.is_empty() => {
                Some(format!("{}/{}", group, version))
            }
            _ => None,
        }
    });

    event!(Level::DEBUG, ?group_version, "Detected eviction support.");
    Ok(group_version)
}
