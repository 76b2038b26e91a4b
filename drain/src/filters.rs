//! Decides which Pods on a Node are removed during a drain.
//!
//! Every Pod is run through an ordered chain of filters. The first filter that refuses to delete
//! a Pod decides its fate; the remaining filters are not consulted. Each Pod ends up in exactly one
//! of three buckets: selected for removal, skipped, or blocking the drain.
use crate::cluster::{pod_key, ClusterClient};
use crate::constants::{
    DAEMON_SET_KIND, MIRROR_POD_ANNOTATION, POD_PHASE_FAILED, POD_PHASE_SUCCEEDED,
};
use crate::policy::DrainPolicy;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use tracing::{event, instrument, Level};

/// Why a filter decided what it decided about a Pod.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum PodDeleteReason {
    /// No filter objected.
    Okay,
    /// Static Pod mirrored from the kubelet; it cannot be removed through the API.
    MirrorPod,
    /// Already terminating for longer than the skip threshold.
    StuckTerminating,
    /// Managed by a DaemonSet.
    DaemonSetManaged,
    /// Not managed by any controller.
    Unreplicated,
    /// Uses node-local `emptyDir` storage.
    LocalStorage,
}

/// How a filter's decision is reported to the operator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PodDeleteLevel {
    Okay,
    /// Reported as a warning, does not fail the drain.
    Warning,
    /// Fails the drain before any Pod is touched.
    Error,
}

/// The outcome of running a Pod through one filter, or through the whole chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PodDeleteStatus {
    pub delete: bool,
    pub reason: PodDeleteReason,
    pub level: PodDeleteLevel,
    pub message: String,
}

impl PodDeleteStatus {
    fn okay() -> Self {
        PodDeleteStatus {
            delete: true,
            reason: PodDeleteReason::Okay,
            level: PodDeleteLevel::Okay,
            message: String::new(),
        }
    }

    fn skip(reason: PodDeleteReason, message: &str) -> Self {
        PodDeleteStatus {
            delete: false,
            reason,
            level: PodDeleteLevel::Warning,
            message: message.to_string(),
        }
    }

    fn delete_with_warning(reason: PodDeleteReason, message: &str) -> Self {
        PodDeleteStatus {
            delete: true,
            reason,
            level: PodDeleteLevel::Warning,
            message: message.to_string(),
        }
    }

    fn error(reason: PodDeleteReason, message: &str) -> Self {
        PodDeleteStatus {
            delete: false,
            reason,
            level: PodDeleteLevel::Error,
            message: message.to_string(),
        }
    }
}

/// Inputs shared by every filter for a single selection pass.
pub struct FilterContext<'a> {
    pub policy: &'a DrainPolicy,
    pub now: DateTime<Utc>,
}

/// A filter is a pure predicate over a Pod.
pub type PodFilter = fn(&Pod, &FilterContext) -> PodDeleteStatus;

/// Builds the ordered filter chain. The order matters: earlier filters short-circuit later ones.
pub fn make_filters() -> Vec<PodFilter> {
    vec![
        mirror_pod_filter,
        stuck_terminating_filter,
        daemon_set_filter,
        unreplicated_filter,
        local_storage_filter,
    ]
}

/// Runs a Pod through the chain. A refusal short-circuits; otherwise the first warning is kept.
pub fn classify(pod: &Pod, filters: &[PodFilter], ctx: &FilterContext) -> PodDeleteStatus {
    let mut outcome = PodDeleteStatus::okay();
    for filter in filters {
        let status = filter(pod, ctx);
        if !status.delete {
            return status;
        }
        if status.level == PodDeleteLevel::Warning && outcome.level == PodDeleteLevel::Okay {
            outcome = status;
        }
    }
    outcome
}

fn mirror_pod_filter(pod: &Pod, _ctx: &FilterContext) -> PodDeleteStatus {
    let is_mirror = pod
        .metadata
        .annotations
        .as_ref()
        .map_or(false, |annotations| annotations.contains_key(MIRROR_POD_ANNOTATION));
    if is_mirror {
        PodDeleteStatus::skip(PodDeleteReason::MirrorPod, "ignoring static mirror Pods")
    } else {
        PodDeleteStatus::okay()
    }
}

fn stuck_terminating_filter(pod: &Pod, ctx: &FilterContext) -> PodDeleteStatus {
    if is_stuck_terminating(pod, ctx.policy.skip_wait_for_delete_timeout(), ctx.now) {
        PodDeleteStatus::skip(
            PodDeleteReason::StuckTerminating,
            "skipping Pods that have been terminating longer than the skip threshold",
        )
    } else {
        PodDeleteStatus::okay()
    }
}

fn daemon_set_filter(pod: &Pod, ctx: &FilterContext) -> PodDeleteStatus {
    let owned_by_daemon_set = controller_kind(pod) == Some(DAEMON_SET_KIND);
    match (owned_by_daemon_set, ctx.policy.ignore_all_daemon_sets) {
        (false, _) => PodDeleteStatus::okay(),
        (true, true) => PodDeleteStatus::skip(
            PodDeleteReason::DaemonSetManaged,
            "ignoring DaemonSet-managed Pods",
        ),
        (true, false) => PodDeleteStatus::error(
            PodDeleteReason::DaemonSetManaged,
            "cannot delete DaemonSet-managed Pods (use ignoreAllDaemonSets to ignore)",
        ),
    }
}

fn unreplicated_filter(pod: &Pod, ctx: &FilterContext) -> PodDeleteStatus {
    if is_finished(pod) || controller_kind(pod).is_some() {
        return PodDeleteStatus::okay();
    }
    if ctx.policy.force {
        PodDeleteStatus::delete_with_warning(
            PodDeleteReason::Unreplicated,
            "deleting Pods that declare no controller",
        )
    } else {
        PodDeleteStatus::error(
            PodDeleteReason::Unreplicated,
            "cannot delete Pods that declare no controller (use force to override)",
        )
    }
}

fn local_storage_filter(pod: &Pod, ctx: &FilterContext) -> PodDeleteStatus {
    if is_finished(pod) || !has_local_storage(pod) {
        return PodDeleteStatus::okay();
    }
    if ctx.policy.delete_local_data {
        PodDeleteStatus::delete_with_warning(
            PodDeleteReason::LocalStorage,
            "deleting Pods with local storage",
        )
    } else {
        PodDeleteStatus::error(
            PodDeleteReason::LocalStorage,
            "cannot delete Pods with local storage (use deleteLocalData to override)",
        )
    }
}

/// Returns the kind of the Pod's managing controller, if any.
fn controller_kind(pod: &Pod) -> Option<&str> {
    pod.metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|reference| reference.controller == Some(true))
        .map(|reference| reference.kind.as_str())
}

fn is_finished(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .map_or(false, |phase| {
            phase == POD_PHASE_SUCCEEDED || phase == POD_PHASE_FAILED
        })
}

fn has_local_storage(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .map_or(false, |volumes| {
            volumes.iter().any(|volume| volume.empty_dir.is_some())
        })
}

/// Returns whether the Pod has carried a deletion timestamp for longer than `threshold`.
/// A `threshold` of `None` never considers a Pod stuck.
pub fn is_stuck_terminating(
    pod: &Pod,
    threshold: Option<chrono::Duration>,
    now: DateTime<Utc>,
) -> bool {
    match (threshold, pod.metadata.deletion_timestamp.as_ref()) {
        (Some(threshold), Some(deleted_at)) => now - deleted_at.0 > threshold,
        _ => false,
    }
}

/// A Pod together with the chain's verdict on it.
#[derive(Clone, Debug)]
pub struct PodDelete {
    pub pod: Pod,
    pub status: PodDeleteStatus,
}

/// The partition of a Node's Pods produced by [`select_pods_for_removal`].
#[derive(Clone, Debug, Default)]
pub struct PodSelection {
    /// Pods to evict or delete.
    pub selected: Vec<PodDelete>,
    /// Pods left alone.
    pub skipped: Vec<PodDelete>,
    /// Pods that forbid the drain under the current policy.
    pub blocking: Vec<PodDelete>,
}

impl PodSelection {
    /// Partitions `pods` using the given filter chain.
    pub fn from_pods(pods: Vec<Pod>, filters: &[PodFilter], ctx: &FilterContext) -> Self {
        let mut selection = PodSelection::default();
        for pod in pods {
            let status = classify(&pod, filters, ctx);
            let bucket = match (status.delete, status.level) {
                (_, PodDeleteLevel::Error) => &mut selection.blocking,
                (true, _) => &mut selection.selected,
                (false, _) => &mut selection.skipped,
            };
            bucket.push(PodDelete { pod, status });
        }
        selection
    }

    /// One line per warning message, listing the affected Pods.
    pub fn warnings(&self) -> Vec<String> {
        group_messages(
            self.selected
                .iter()
                .chain(self.skipped.iter())
                .filter(|pod_delete| pod_delete.status.level == PodDeleteLevel::Warning),
        )
    }

    /// One line per error message, listing the affected Pods.
    pub fn errors(&self) -> Vec<String> {
        group_messages(self.blocking.iter())
    }

    pub fn pods_to_remove(&self) -> Vec<Pod> {
        self.selected
            .iter()
            .map(|pod_delete| pod_delete.pod.clone())
            .collect()
    }
}

fn group_messages<'a>(pod_deletes: impl Iterator<Item = &'a PodDelete>) -> Vec<String> {
    let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for pod_delete in pod_deletes {
        grouped
            .entry(pod_delete.status.message.as_str())
            .or_default()
            .push(pod_key(&pod_delete.pod));
    }
    grouped
        .into_iter()
        .map(|(message, pods)| format!("{}: {}", message, pods.join(", ")))
        .collect()
}

/// Lists every Pod bound to `node_name` and partitions them according to `policy`.
#[instrument(skip(client, policy), err)]
pub async fn select_pods_for_removal<T: ClusterClient>(
    client: &T,
    node_name: &str,
    policy: &DrainPolicy,
) -> kube::Result<PodSelection> {
    let pods = client
        .list_pods(&policy.pod_list_params(node_name))
        .await?;
    let total = pods.len();

    let ctx = FilterContext {
        policy,
        now: Utc::now(),
    };
    let selection = PodSelection::from_pods(pods, &make_filters(), &ctx);

    event!(
        Level::INFO,
        total,
        selected = selection.selected.len(),
        skipped = selection.skipped.len(),
        blocking = selection.blocking.len(),
        "Classified Pods on Node."
    );
    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterClient;
    use crate::test_util::{
        daemon_set_pod, mirror_pod, owned_by, pod, replicated_pod, terminating_since, with_empty_dir,
        with_phase,
    };

    use chrono::Duration;
    use kube::ResourceExt;

    fn classify_one(pod: &Pod, policy: &DrainPolicy) -> PodDeleteStatus {
        let ctx = FilterContext {
            policy,
            now: Utc::now(),
        };
        classify(pod, &make_filters(), &ctx)
    }

    #[test]
    fn test_replicated_pod_is_selected() {
        let status = classify_one(&replicated_pod("web", "ns"), &DrainPolicy::default());
        assert_eq!(status, PodDeleteStatus::okay());
    }

    #[test]
    fn test_mirror_pod_is_always_skipped() {
        let policy = DrainPolicy {
            force: true,
            ignore_all_daemon_sets: true,
            delete_local_data: true,
            ..Default::default()
        };
        let status = classify_one(&mirror_pod("kube-apiserver", "kube-system"), &policy);
        assert!(!status.delete);
        assert_eq!(status.reason, PodDeleteReason::MirrorPod);
        assert_ne!(status.level, PodDeleteLevel::Error);

        // Mirror Pods declare no controller, but must never be reported as unreplicated.
        let status = classify_one(
            &mirror_pod("kube-apiserver", "kube-system"),
            &DrainPolicy::default(),
        );
        assert_eq!(status.reason, PodDeleteReason::MirrorPod);
    }

    #[test]
    fn test_daemon_set_gate() {
        let pod = daemon_set_pod("node-exporter-x1", "monitoring");

        let status = classify_one(&pod, &DrainPolicy::default());
        assert_eq!(status.level, PodDeleteLevel::Error);
        assert_eq!(status.reason, PodDeleteReason::DaemonSetManaged);

        let status = classify_one(
            &pod,
            &DrainPolicy {
                ignore_all_daemon_sets: true,
                ..Default::default()
            },
        );
        assert!(!status.delete);
        assert_eq!(status.level, PodDeleteLevel::Warning);
    }

    #[test]
    fn test_unreplicated_gate() {
        let bare = pod("debug", "default");

        let status = classify_one(&bare, &DrainPolicy::default());
        assert_eq!(status.level, PodDeleteLevel::Error);
        assert_eq!(status.reason, PodDeleteReason::Unreplicated);

        let status = classify_one(
            &bare,
            &DrainPolicy {
                force: true,
                ..Default::default()
            },
        );
        assert!(status.delete);
        assert_eq!(status.level, PodDeleteLevel::Warning);

        // Finished Pods are deleted without complaint.
        let status = classify_one(&with_phase(bare, "Succeeded"), &DrainPolicy::default());
        assert_eq!(status, PodDeleteStatus::okay());
    }

    #[test]
    fn test_local_storage_gate() {
        let cache = with_empty_dir(replicated_pod("cache", "default"));

        let status = classify_one(&cache, &DrainPolicy::default());
        assert_eq!(status.level, PodDeleteLevel::Error);
        assert_eq!(status.reason, PodDeleteReason::LocalStorage);

        let status = classify_one(
            &cache,
            &DrainPolicy {
                delete_local_data: true,
                ..Default::default()
            },
        );
        assert!(status.delete);
        assert_eq!(status.reason, PodDeleteReason::LocalStorage);
    }

    #[test]
    fn test_first_refusal_short_circuits() {
        // A bare Pod with local storage only reports the earlier unreplicated error.
        let pod = with_empty_dir(pod("scratch", "default"));
        let status = classify_one(&pod, &DrainPolicy::default());
        assert_eq!(status.reason, PodDeleteReason::Unreplicated);

        // Under force the unreplicated warning is kept while local storage still blocks.
        let status = classify_one(
            &pod,
            &DrainPolicy {
                force: true,
                ..Default::default()
            },
        );
        assert_eq!(status.reason, PodDeleteReason::LocalStorage);
        assert_eq!(status.level, PodDeleteLevel::Error);
    }

    #[test]
    fn test_stuck_terminating() {
        let policy = DrainPolicy {
            skip_wait_for_delete_timeout_seconds: 60,
            ..Default::default()
        };
        let now = Utc::now();

        let stuck = terminating_since(pod("old", "default"), now - Duration::seconds(120));
        let threshold = policy.skip_wait_for_delete_timeout();
        assert!(is_stuck_terminating(&stuck, threshold, now));
        // Bare but stuck: skipped before the unreplicated gate can block the drain.
        let status = classify_one(&stuck, &policy);
        assert!(!status.delete);
        assert_eq!(status.reason, PodDeleteReason::StuckTerminating);

        let recent = terminating_since(pod("new", "default"), now - Duration::seconds(10));
        assert!(!is_stuck_terminating(&recent, threshold, now));

        // Disabled threshold never skips.
        assert!(!is_stuck_terminating(&stuck, None, now));
    }

    #[test]
    fn test_every_pod_lands_in_exactly_one_bucket() {
        let now = Utc::now();
        let pods = vec![
            replicated_pod("web-1", "default"),
            replicated_pod("web-2", "default"),
            pod("bare", "default"),
            daemon_set_pod("agent", "kube-system"),
            mirror_pod("etcd", "kube-system"),
            with_empty_dir(replicated_pod("cache", "default")),
            with_phase(pod("job-done", "batch"), "Failed"),
            terminating_since(
                owned_by(pod("stuck", "default"), "StatefulSet", "db"),
                now - Duration::seconds(3600),
            ),
        ];
        let names: Vec<String> = pods.iter().map(|pod| pod.name_any()).collect();

        let policies = [
            DrainPolicy::default(),
            DrainPolicy {
                force: true,
                ignore_all_daemon_sets: true,
                delete_local_data: true,
                skip_wait_for_delete_timeout_seconds: 60,
                ..Default::default()
            },
            DrainPolicy {
                ignore_all_daemon_sets: true,
                ..Default::default()
            },
        ];

        for policy in policies.iter() {
            let ctx = FilterContext { policy, now };
            let selection = PodSelection::from_pods(pods.clone(), &make_filters(), &ctx);

            let mut seen: Vec<String> = selection
                .selected
                .iter()
                .chain(selection.skipped.iter())
                .chain(selection.blocking.iter())
                .map(|pod_delete| pod_delete.pod.name_any())
                .collect();
            seen.sort();
            let mut expected = names.clone();
            expected.sort();
            assert_eq!(seen, expected, "policy: {:?}", policy);
        }
    }

    #[test]
    fn test_messages_are_grouped() {
        let policy = DrainPolicy {
            ignore_all_daemon_sets: true,
            ..Default::default()
        };
        let ctx = FilterContext {
            policy: &policy,
            now: Utc::now(),
        };
        let selection = PodSelection::from_pods(
            vec![
                daemon_set_pod("agent-a", "kube-system"),
                daemon_set_pod("agent-b", "kube-system"),
                pod("bare-a", "default"),
                pod("bare-b", "team"),
            ],
            &make_filters(),
            &ctx,
        );

        assert_eq!(
            selection.warnings(),
            vec!["ignoring DaemonSet-managed Pods: kube-system/agent-a, kube-system/agent-b"]
        );
        assert_eq!(
            selection.errors(),
            vec!["cannot delete Pods that declare no controller (use force to override): default/bare-a, team/bare-b"]
        );
        assert!(selection.pods_to_remove().is_empty());
    }

    #[tokio::test]
    async fn test_select_lists_pods_on_node() {
        let mut client = MockClusterClient::new();
        client
            .expect_list_pods()
            .withf(|params| params.field_selector.as_deref() == Some("spec.nodeName=node-1"))
            .times(1)
            .returning(|_| {
                Ok(vec![
                    replicated_pod("web", "default"),
                    daemon_set_pod("agent", "kube-system"),
                ])
            });

        let selection = select_pods_for_removal(&client, "node-1", &DrainPolicy::default())
            .await
            .unwrap();
        assert_eq!(selection.selected.len(), 1);
        assert_eq!(selection.blocking.len(), 1);
    }
}
