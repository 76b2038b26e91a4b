//! Safely removes a worker Node from a Kubernetes cluster, similar to `kubectl drain`.
//!
//! A drain marks the Node unschedulable ("cordoning" it), decides which of its Pods may be removed,
//! then evicts (or deletes) every selected Pod and waits for each of them to disappear.
//! [`NodeDrainer`] sequences those steps and is the entrypoint for callers.
pub mod cluster;
pub mod constants;
pub mod cordon;
pub mod deadline;
pub mod drainer;
pub mod error;
pub mod eviction;
pub mod filters;
pub mod policy;
pub mod removal;
pub mod telemetry;
pub mod wait;

#[cfg(test)]
pub(crate) mod test_util;

pub use crate::cluster::{ClusterClient, K8SClusterClient};
pub use crate::drainer::{DrainReport, NodeDrainClient, NodeDrainer};
pub use crate::error::DrainError;
pub use crate::policy::DrainPolicy;
pub use crate::removal::PodRemovedHook;

#[cfg(any(test, feature = "mockall"))]
pub use crate::cluster::MockClusterClient;
#[cfg(any(test, feature = "mockall"))]
pub use crate::drainer::MockNodeDrainClient;
