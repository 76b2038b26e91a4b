//! Caller-supplied options that control how a Node is drained.
use k8s_openapi::apimachinery::pkg::apis::meta::v1::DeleteOptions;
use kube::api::{DeleteParams, ListParams};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use validator::Validate;

/// `DrainPolicy` carries the options of a single drain invocation. It is never mutated while draining.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct DrainPolicy {
    /// Remove Pods that are not managed by any controller. They will not be recreated.
    pub force: bool,
    /// Leave DaemonSet-managed Pods in place instead of refusing to drain.
    pub ignore_all_daemon_sets: bool,
    /// Remove Pods using `emptyDir` volumes. Their data is lost.
    pub delete_local_data: bool,
    /// Always delete Pods directly, even if the cluster serves the Eviction API.
    pub disable_eviction: bool,
    /// Grace period handed to each removed Pod. `None` uses the Pod's own setting. At most one year.
    #[validate(range(max = 31_536_000))]
    pub grace_period_seconds: Option<u32>,
    /// Global time budget for the whole drain, in seconds. Zero waits forever.
    pub timeout: u64,
    /// Pods that have been terminating for longer than this are not waited on. Zero disables the check.
    /// At most one year.
    #[validate(range(max = 31_536_000))]
    pub skip_wait_for_delete_timeout_seconds: u64,
    /// Label selector narrowing which Pods on the Node are considered.
    #[validate(length(min = 1))]
    pub pod_selector: Option<String>,
    /// Label selector the Node itself must match.
    #[validate(length(min = 1))]
    pub label_selector: Option<String>,
}

impl DrainPolicy {
    /// The global deadline budget, if any.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    /// The stuck-terminating threshold, if enabled.
    ///
    /// Values that do not fit a `chrono::Duration` disable the check rather than wrapping around.
    pub fn skip_wait_for_delete_timeout(&self) -> Option<chrono::Duration> {
        if self.skip_wait_for_delete_timeout_seconds == 0 {
            return None;
        }
        i64::try_from(self.skip_wait_for_delete_timeout_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }

    pub fn delete_params(&self) -> DeleteParams {
        DeleteParams {
            grace_period_seconds: self.grace_period_seconds,
            ..Default::default()
        }
    }

    /// Delete options sent in the body of each Eviction.
    pub fn eviction_options(&self) -> DeleteOptions {
        DeleteOptions {
            grace_period_seconds: self.grace_period_seconds.map(i64::from),
            ..Default::default()
        }
    }

    /// Parameters listing every Pod bound to `node_name`, narrowed by the Pod selector.
    pub fn pod_list_params(&self, node_name: &str) -> ListParams {
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node_name));
        match self.pod_selector.as_deref() {
            Some(selector) => params.labels(selector),
            None => params,
        }
    }

    /// Parameters matching `node_name` only if it also satisfies the Node label selector.
    pub fn node_list_params(&self, node_name: &str) -> Option<ListParams> {
        self.label_selector.as_deref().map(|selector| {
            ListParams::default()
                .fields(&format!("metadata.name={}", node_name))
                .labels(selector)
        })
    }

    /// Fills in a default global timeout when the caller left it unbounded.
    pub fn with_default_timeout(mut self, default_timeout: Option<Duration>) -> Self {
        if self.timeout == 0 {
            if let Some(default_timeout) = default_timeout {
                self.timeout = default_timeout.as_secs();
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_camel_case_with_defaults() {
        let policy: DrainPolicy = serde_json::from_str(
            r#"{"force": true, "ignoreAllDaemonSets": true, "timeout": 20, "podSelector": "app=web"}"#,
        )
        .unwrap();

        assert_eq!(
            policy,
            DrainPolicy {
                force: true,
                ignore_all_daemon_sets: true,
                timeout: 20,
                pod_selector: Some("app=web".to_string()),
                ..Default::default()
            }
        );
        assert_eq!(policy.timeout(), Some(Duration::from_secs(20)));
        assert_eq!(policy.skip_wait_for_delete_timeout(), None);
    }

    #[test]
    fn test_zero_timeout_is_unbounded() {
        let policy = DrainPolicy::default();
        assert_eq!(policy.timeout(), None);

        let policy = policy.with_default_timeout(Some(Duration::from_secs(600)));
        assert_eq!(policy.timeout(), Some(Duration::from_secs(600)));

        // An explicit timeout wins over the default.
        let policy = DrainPolicy {
            timeout: 30,
            ..Default::default()
        }
        .with_default_timeout(Some(Duration::from_secs(600)));
        assert_eq!(policy.timeout, 30);
    }

    #[test]
    fn test_list_params() {
        let policy = DrainPolicy {
            pod_selector: Some("app=web".to_string()),
            ..Default::default()
        };
        let params = policy.pod_list_params("node-1");
        assert_eq!(params.field_selector.as_deref(), Some("spec.nodeName=node-1"));
        assert_eq!(params.label_selector.as_deref(), Some("app=web"));

        assert!(policy.node_list_params("node-1").is_none());
        let policy = DrainPolicy {
            label_selector: Some("pool=batch".to_string()),
            ..Default::default()
        };
        let params = policy.node_list_params("node-1").unwrap();
        assert_eq!(params.field_selector.as_deref(), Some("metadata.name=node-1"));
        assert_eq!(params.label_selector.as_deref(), Some("pool=batch"));
    }

    #[test]
    fn test_grace_period_is_forwarded() {
        let policy = DrainPolicy {
            grace_period_seconds: Some(30),
            ..Default::default()
        };
        assert_eq!(policy.delete_params().grace_period_seconds, Some(30));
        assert_eq!(policy.eviction_options().grace_period_seconds, Some(30));
    }

    #[test]
    fn test_skip_wait_threshold_is_bounded() {
        let policy: DrainPolicy =
            serde_json::from_str(r#"{"skipWaitForDeleteTimeoutSeconds": 10000000000000000}"#)
                .unwrap();
        assert!(policy.validate().is_err());
        assert_eq!(policy.skip_wait_for_delete_timeout(), None);

        let policy: DrainPolicy =
            serde_json::from_str(r#"{"skipWaitForDeleteTimeoutSeconds": 18446744073709551615}"#)
                .unwrap();
        assert!(policy.validate().is_err());
        // Out of range values never turn into a negative threshold.
        assert_eq!(policy.skip_wait_for_delete_timeout(), None);

        let policy = DrainPolicy {
            skip_wait_for_delete_timeout_seconds: 31_536_000,
            ..Default::default()
        };
        assert!(policy.validate().is_ok());
        assert_eq!(
            policy.skip_wait_for_delete_timeout(),
            Some(chrono::Duration::days(365))
        );
    }

    #[test]
    fn test_validation() {
        assert!(DrainPolicy::default().validate().is_ok());
        assert!(DrainPolicy {
            pod_selector: Some(String::new()),
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(DrainPolicy {
            grace_period_seconds: Some(31_536_001),
            ..Default::default()
        }
        .validate()
        .is_err());
    }
}
