use tokio::time::Duration;

// Well-known object metadata.
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";
pub const DAEMON_SET_KIND: &str = "DaemonSet";
pub const NODE_READY_CONDITION: &str = "Ready";
pub const CONDITION_STATUS_UNKNOWN: &str = "Unknown";
pub const POD_PHASE_SUCCEEDED: &str = "Succeeded";
pub const POD_PHASE_FAILED: &str = "Failed";

// Discovery names used to decide whether the Eviction API is served.
pub const POLICY_API_GROUP: &str = "policy";
pub const EVICTION_SUBRESOURCE: &str = "pods/eviction";
pub const EVICTION_KIND: &str = "Eviction";
pub const CORE_API_VERSION: &str = "v1";

// When an eviction is throttled (usually to honor a PodDisruptionBudget), we stall for a fixed
// interval between attempts. `kubectl drain` similarly waits 5 seconds.
pub const EVICTION_RETRY_INTERVAL: Duration = Duration::from_secs(5);

// Poll interval while waiting for removed Pods to disappear.
pub const DELETION_CHECK_INTERVAL: Duration = Duration::from_secs(1);

// Message fragment the API server uses when refusing new content in a terminating namespace.
pub const NAMESPACE_TERMINATING_MESSAGE: &str = "because it is being terminated";
