//! Sequences a drain: fetch the Node, check it is reachable, cordon it, pick its Pods, then remove them.
use crate::cluster::{is_not_found, ClusterClient};
use crate::constants::{CONDITION_STATUS_UNKNOWN, NODE_READY_CONDITION};
use crate::cordon::set_schedulable;
use crate::deadline::DrainDeadline;
use crate::error::{self, Result};
use crate::eviction::detect_eviction_support;
use crate::filters::select_pods_for_removal;
use crate::policy::DrainPolicy;
use crate::removal::{noop_hook, remove_pods, PodRemovedHook};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

#[cfg(any(test, feature = "mockall"))]
use mockall::mock;

/// What a successful drain did.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub node_name: String,
    /// One line per warning reason, listing the affected Pods.
    pub warnings: Vec<String>,
    /// `namespace/name` of every Pod confirmed gone.
    pub removed_pods: Vec<String>,
    /// Whether Pods were evicted rather than deleted.
    pub used_eviction: bool,
}

impl DrainReport {
    fn empty(node_name: &str) -> Self {
        DrainReport {
            node_name: node_name.to_string(),
            ..Default::default()
        }
    }
}

#[async_trait]
/// A trait providing the operations callers use to drain, cordon and uncordon Nodes. This is provided
/// as a trait in order to allow mocks to be used for testing purposes.
pub trait NodeDrainClient: Clone + Sized + Send + Sync {
    /// Cordon the Node and remove its Pods according to `policy`.
    async fn drain_node(&self, node_name: &str, policy: &DrainPolicy) -> Result<DrainReport>;
    /// Mark the Node unschedulable. Returns whether the Node changed.
    async fn cordon_node(&self, node_name: &str) -> Result<bool>;
    /// Mark the Node schedulable. Returns whether the Node changed.
    async fn uncordon_node(&self, node_name: &str) -> Result<bool>;
}

#[cfg(any(test, feature = "mockall"))]
mock! {
    /// A Mock NodeDrainClient for use in tests.
    pub NodeDrainClient {}
    #[async_trait]
    impl NodeDrainClient for NodeDrainClient {
        async fn drain_node(&self, node_name: &str, policy: &DrainPolicy) -> Result<DrainReport>;
        async fn cordon_node(&self, node_name: &str) -> Result<bool>;
        async fn uncordon_node(&self, node_name: &str) -> Result<bool>;
    }

    impl Clone for NodeDrainClient {
        fn clone(&self) -> Self;
    }
}

#[async_trait]
impl<T> NodeDrainClient for Arc<T>
where
    T: NodeDrainClient,
{
    async fn drain_node(&self, node_name: &str, policy: &DrainPolicy) -> Result<DrainReport> {
        (**self).drain_node(node_name, policy).await
    }

    async fn cordon_node(&self, node_name: &str) -> Result<bool> {
        (**self).cordon_node(node_name).await
    }

    async fn uncordon_node(&self, node_name: &str) -> Result<bool> {
        (**self).uncordon_node(node_name).await
    }
}

/// Drains Nodes using a [`ClusterClient`].
///
/// Every drain runs under a child of the drainer's shutdown token, so cancelling
/// [`NodeDrainer::shutdown_token`] stops all drains in flight.
#[derive(Clone)]
pub struct NodeDrainer<T: ClusterClient> {
    cluster: T,
    on_pod_removed: PodRemovedHook,
    shutdown: CancellationToken,
}

impl<T: ClusterClient> NodeDrainer<T> {
    pub fn new(cluster: T) -> Self {
        NodeDrainer {
            cluster,
            on_pod_removed: noop_hook(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Registers a hook called once for every Pod that is confirmed removed.
    pub fn with_pod_removed_hook(mut self, hook: PodRemovedHook) -> Self {
        self.on_pod_removed = hook;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Drains `node_name`, stopping early if `cancel` (or the drainer's shutdown token) fires.
    ///
    /// A Node that does not exist is considered drained. The Node stays cordoned if the drain fails.
    #[instrument(skip(self, policy, cancel), err)]
    pub async fn drain_node_with_cancel(
        &self,
        node_name: &str,
        policy: &DrainPolicy,
        cancel: &CancellationToken,
    ) -> Result<DrainReport> {
        let node = match self.cluster.get_node(node_name).await {
            Ok(node) => node,
            Err(err) if is_not_found(&err) => {
                event!(
                    Level::INFO,
                    "Node '{}' no longer exists, nothing to drain.",
                    node_name
                );
                return Ok(DrainReport::empty(node_name));
            }
            Err(source) => {
                return Err(error::DrainError::GetNode {
                    node_name: node_name.to_string(),
                    source,
                })
            }
        };

        ensure!(
            !is_unreachable(&node),
            error::NodeUnreachableSnafu { node_name }
        );
        self.check_node_selected(node_name, policy).await?;

        set_schedulable(&self.cluster, &node, true)
            .await
            .context(error::CordonSnafu {
                node_name,
                desired: true,
            })?;

        let selection = select_pods_for_removal(&self.cluster, node_name, policy)
            .await
            .context(error::ListPodsSnafu { node_name })?;
        let warnings = selection.warnings();
        for warning in warnings.iter() {
            event!(Level::WARN, "{}", warning);
        }
        let errors = selection.errors();
        ensure!(
            errors.is_empty(),
            error::PodsBlockedSnafu { node_name, errors }
        );

        let pods = selection.pods_to_remove();
        if pods.is_empty() {
            event!(Level::INFO, "No Pods to remove from Node '{}'.", node_name);
            return Ok(DrainReport {
                warnings,
                ..DrainReport::empty(node_name)
            });
        }

        let used_eviction = if policy.disable_eviction {
            false
        } else {
            let group_version = detect_eviction_support(&self.cluster)
                .await
                .context(error::DetectEvictionSupportSnafu)?;
            event!(
                Level::INFO,
                ?group_version,
                "Removing {} Pod(s) from Node '{}'.",
                pods.len(),
                node_name
            );
            group_version.is_some()
        };

        let deadline = DrainDeadline::new(cancel.child_token(), policy.timeout());
        let removed_pods = remove_pods(
            &self.cluster,
            pods,
            policy,
            used_eviction,
            &deadline,
            &self.on_pod_removed,
        )
        .await
        .map_err(|errors| error::DrainError::RemovePods {
            node_name: node_name.to_string(),
            errors,
        })?;

        event!(
            Level::INFO,
            removed = removed_pods.len(),
            "Drained Node '{}'.",
            node_name
        );
        Ok(DrainReport {
            node_name: node_name.to_string(),
            warnings,
            removed_pods,
            used_eviction,
        })
    }

    /// Sets the Node's `spec.unschedulable` flag. Returns whether the Node changed.
    #[instrument(skip(self), err)]
    pub async fn cordon_or_uncordon(
        &self,
        node_name: &str,
        desired_unschedulable: bool,
    ) -> Result<bool> {
        let node = self
            .cluster
            .get_node(node_name)
            .await
            .context(error::GetNodeSnafu { node_name })?;
        set_schedulable(&self.cluster, &node, desired_unschedulable)
            .await
            .context(error::CordonSnafu {
                node_name,
                desired: desired_unschedulable,
            })
    }

    /// Fails unless the Node matches the policy's label selector, if one is set.
    async fn check_node_selected(&self, node_name: &str, policy: &DrainPolicy) -> Result<()> {
        let (params, selector) = match (
            policy.node_list_params(node_name),
            policy.label_selector.as_deref(),
        ) {
            (Some(params), Some(selector)) => (params, selector),
            _ => return Ok(()),
        };

        let nodes = self
            .cluster
            .list_nodes(&params)
            .await
            .context(error::SelectNodeSnafu {
                node_name,
                selector,
            })?;
        ensure!(
            nodes
                .iter()
                .any(|node| node.metadata.name.as_deref() == Some(node_name)),
            error::NodeNotSelectedSnafu {
                node_name,
                selector,
            }
        );
        Ok(())
    }
}

#[async_trait]
impl<T: ClusterClient> NodeDrainClient for NodeDrainer<T> {
    async fn drain_node(&self, node_name: &str, policy: &DrainPolicy) -> Result<DrainReport> {
        let cancel = self.shutdown.child_token();
        self.drain_node_with_cancel(node_name, policy, &cancel).await
    }

    async fn cordon_node(&self, node_name: &str) -> Result<bool> {
        self.cordon_or_uncordon(node_name, true).await
    }

    async fn uncordon_node(&self, node_name: &str) -> Result<bool> {
        self.cordon_or_uncordon(node_name, false).await
    }
}

/// A Node whose Ready condition is `Unknown` has stopped reporting to the control plane.
fn is_unreachable(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|condition| condition.type_ == NODE_READY_CONDITION)
        })
        .map_or(false, |ready| ready.status == CONDITION_STATUS_UNKNOWN)
}
