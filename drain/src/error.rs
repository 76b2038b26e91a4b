use crate::deadline::Abort;
use crate::wait::error::WaitError;

use snafu::Snafu;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, DrainError>;

/// The ways a drain can fail. Errors concerning individual Pods are never dropped: every failed Pod
/// contributes exactly one entry to [`DrainError::PodsBlocked`] or [`DrainError::RemovePods`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DrainError {
    #[snafu(display("Unable to get Node '{}': '{}'", node_name, source))]
    GetNode {
        node_name: String,
        source: kube::Error,
    },

    #[snafu(display("Node '{}' is not reachable: its Ready condition is Unknown", node_name))]
    NodeUnreachable { node_name: String },

    #[snafu(display(
        "Unable to check Node '{}' against label selector '{}': '{}'",
        node_name,
        selector,
        source
    ))]
    SelectNode {
        node_name: String,
        selector: String,
        source: kube::Error,
    },

    #[snafu(display(
        "Node '{}' does not match label selector '{}'",
        node_name,
        selector
    ))]
    NodeNotSelected { node_name: String, selector: String },

    #[snafu(display(
        "Unable to set Node '{}' unschedulable={}: '{}'",
        node_name,
        desired,
        source
    ))]
    Cordon {
        node_name: String,
        desired: bool,
        source: kube::Error,
    },

    #[snafu(display("Unable to list Pods on Node '{}': '{}'", node_name, source))]
    ListPods {
        node_name: String,
        source: kube::Error,
    },

    #[snafu(display(
        "Cannot drain Node '{}': {}",
        node_name,
        errors.join("; ")
    ))]
    PodsBlocked {
        node_name: String,
        errors: Vec<String>,
    },

    #[snafu(display("Unable to discover whether the cluster supports eviction: '{}'", source))]
    DetectEvictionSupport { source: kube::Error },

    #[snafu(display(
        "Failed to remove {} Pod(s) from Node '{}': {}",
        errors.len(),
        node_name,
        join_errors(errors)
    ))]
    RemovePods {
        node_name: String,
        errors: Vec<PodRemovalError>,
    },
}

impl DrainError {
    /// Whether the drain was refused because of the state of the Node or its Pods, rather than
    /// failing while talking to the cluster.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            DrainError::NodeUnreachable { .. }
                | DrainError::NodeNotSelected { .. }
                | DrainError::PodsBlocked { .. }
        )
    }
}

/// The failure of a single Pod's removal.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PodRemovalError {
    #[snafu(display("Unable to create eviction for Pod '{}': '{}'", pod, source))]
    Evict { pod: String, source: kube::Error },

    #[snafu(display("Unable to delete Pod '{}': '{}'", pod, source))]
    Delete { pod: String, source: kube::Error },

    #[snafu(display("Stopped removing Pod '{}': {}", pod, source))]
    Aborted { pod: String, source: Abort },

    #[snafu(display("Error waiting for Pod '{}' to be deleted: {}", pod, source))]
    WaitForDeletion {
        pod: String,
        source: Arc<WaitError>,
    },
}

fn join_errors(errors: &[PodRemovalError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
