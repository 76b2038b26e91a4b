pub const NODE_DRAIN_ENDPOINT: &str = "/node/drain";
pub const NODE_CORDON_ENDPOINT: &str = "/node/cordon";
pub const NODE_UNCORDON_ENDPOINT: &str = "/node/uncordon";
pub const METRICS_ENDPOINT: &str = "/metrics";
pub const HEALTH_CHECK_ROUTE: &str = "/ping";

// Operation labels used in metrics and audit events.
pub const DRAIN_OPERATION: &str = "drain";
pub const CORDON_OPERATION: &str = "cordon";
pub const UNCORDON_OPERATION: &str = "uncordon";
