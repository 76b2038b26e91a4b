//! Removes the Pods selected for a drain, either by evicting them or by deleting them directly.
//!
//! Evictions respect PodDisruptionBudgets: the API answers `429 TOO_MANY_REQUESTS` while removing a
//! Pod would violate its budget. Such evictions are retried at a fixed interval until they succeed,
//! or until the drain's global deadline expires.
use crate::cluster::{
    is_namespace_terminating, is_not_found, is_too_many_requests, pod_key, pod_namespace,
    ClusterClient,
};
use crate::constants::EVICTION_RETRY_INTERVAL;
use crate::deadline::{Abort, DrainDeadline};
use crate::error::PodRemovalError;
use crate::policy::DrainPolicy;
use crate::wait::{wait_for_deletion, WaitParams};

use futures::{stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::DeleteOptions;
use kube::api::DeleteParams;
use kube::ResourceExt;
use std::sync::Arc;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::{event, instrument, Level};

/// Called once for every Pod that is confirmed gone. The flag tells whether it was evicted (`true`)
/// or deleted (`false`).
pub type PodRemovedHook = Arc<dyn Fn(&Pod, bool) + Send + Sync>;

/// A hook that does nothing.
pub fn noop_hook() -> PodRemovedHook {
    Arc::new(|_: &Pod, _: bool| {})
}

/// The outcome of a successful eviction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Evicted {
    /// The API accepted the eviction; the Pod still has to terminate.
    Submitted,
    /// The Pod no longer exists.
    AlreadyGone,
}

#[derive(Debug)]
enum EvictionAttemptError {
    /// The eviction may succeed later, e.g. once a disruption budget allows it.
    Retriable(kube::Error),
    NonRetriable(kube::Error),
    Aborted(Abort),
}

impl EvictionAttemptError {
    fn should_retry(&self) -> bool {
        matches!(self, Self::Retriable(_))
    }
}

/// Retry condition for evictions.
struct EvictionRetry {}

impl tokio_retry::Condition<EvictionAttemptError> for EvictionRetry {
    fn should_retry(&mut self, error: &EvictionAttemptError) -> bool {
        error.should_retry()
    }
}

/// Removes every Pod in `pods`, evicting them if `use_eviction` is set and deleting them otherwise.
///
/// Returns the `namespace/name` of every Pod confirmed gone. Pods that were dropped from the wait
/// because they are stuck terminating are neither removed nor failed. On failure, every Pod that
/// could not be removed contributes exactly one error.
#[instrument(skip(client, pods, policy, deadline, on_removed), fields(pods = pods.len()))]
pub async fn remove_pods<T: ClusterClient>(
    client: &T,
    pods: Vec<Pod>,
    policy: &DrainPolicy,
    use_eviction: bool,
    deadline: &DrainDeadline,
    on_removed: &PodRemovedHook,
) -> Result<Vec<String>, Vec<PodRemovalError>> {
    let wait_params = WaitParams::from_policy(policy);
    if use_eviction {
        evict_pods(client, pods, policy, &wait_params, deadline, on_removed).await
    } else {
        delete_pods(client, pods, policy, &wait_params, deadline, on_removed).await
    }
}

/// Evicts all Pods concurrently. Each Pod's eviction and its wait for deletion run as one unit.
async fn evict_pods<T: ClusterClient>(
    client: &T,
    pods: Vec<Pod>,
    policy: &DrainPolicy,
    wait_params: &WaitParams,
    deadline: &DrainDeadline,
    on_removed: &PodRemovedHook,
) -> Result<Vec<String>, Vec<PodRemovalError>> {
    let options = policy.eviction_options();
    let concurrency = pods.len().max(1);

    let outcomes: Vec<Result<Option<String>, PodRemovalError>> = stream::iter(pods)
        .map(|pod| evict_and_wait(client, pod, &options, wait_params, deadline, on_removed))
        .buffer_unordered(concurrency)
        .collect()
        .await;

    partition_outcomes(outcomes)
}

async fn evict_and_wait<T: ClusterClient>(
    client: &T,
    pod: Pod,
    options: &DeleteOptions,
    wait_params: &WaitParams,
    deadline: &DrainDeadline,
    on_removed: &PodRemovedHook,
) -> Result<Option<String>, PodRemovalError> {
    let key = pod_key(&pod);
    match evict_pod(client, &pod, options, deadline).await? {
        Evicted::AlreadyGone => {
            on_removed(&pod, true);
            return Ok(Some(key));
        }
        Evicted::Submitted => {}
    }

    let mut gone = false;
    wait_for_deletion(client, vec![pod], wait_params, deadline, |pod| {
        gone = true;
        on_removed(pod, true);
    })
    .await
    .map_err(|source| PodRemovalError::WaitForDeletion {
        pod: key.clone(),
        source: Arc::new(source),
    })?;

    Ok(gone.then_some(key))
}

/// Creates an eviction for the Pod, retrying while the API asks us to come back later.
#[instrument(skip(client, pod, options, deadline), fields(pod = %pod_key(pod)), err)]
async fn evict_pod<T: ClusterClient>(
    client: &T,
    pod: &Pod,
    options: &DeleteOptions,
    deadline: &DrainDeadline,
) -> Result<Evicted, PodRemovalError> {
    // It's possible for an eviction to become stuck: the API keeps answering 429 because a
    // PodDisruptionBudget cannot be satisfied with the current cluster resources. Only the global
    // deadline ends such a retry loop.
    let retries = RetryIf::spawn(
        FixedInterval::new(EVICTION_RETRY_INTERVAL),
        || attempt_eviction(client, pod, options, deadline),
        EvictionRetry {},
    );

    match deadline.run(retries).await {
        Ok(Ok(evicted)) => Ok(evicted),
        Ok(Err(EvictionAttemptError::Aborted(source))) | Err(source) => {
            Err(PodRemovalError::Aborted {
                pod: pod_key(pod),
                source,
            })
        }
        Ok(Err(
            EvictionAttemptError::Retriable(source) | EvictionAttemptError::NonRetriable(source),
        )) => Err(PodRemovalError::Evict {
            pod: pod_key(pod),
            source,
        }),
    }
}

async fn attempt_eviction<T: ClusterClient>(
    client: &T,
    pod: &Pod,
    options: &DeleteOptions,
    deadline: &DrainDeadline,
) -> Result<Evicted, EvictionAttemptError> {
    // Once the deadline has passed, no Pod makes any further attempt.
    deadline.check().map_err(EvictionAttemptError::Aborted)?;

    event!(Level::INFO, "Attempting to evict Pod '{}'", pod_key(pod));
    match client
        .evict_pod(&pod_namespace(pod), &pod.name_any(), options)
        .await
    {
        Ok(()) => {
            event!(Level::INFO, "Successfully evicted Pod '{}'", pod_key(pod));
            Ok(Evicted::Submitted)
        }
        Err(err) if is_not_found(&err) => {
            event!(Level::INFO, "Pod '{}' is already gone.", pod_key(pod));
            Ok(Evicted::AlreadyGone)
        }
        Err(err) if is_too_many_requests(&err) => {
            event!(
                Level::WARN,
                "Too many requests when creating Eviction for Pod '{}': '{}'. This is likely due to respecting a Pod Disruption Budget. Retrying in {:.2}s.",
                pod_key(pod),
                err,
                EVICTION_RETRY_INTERVAL.as_secs_f64()
            );
            Err(EvictionAttemptError::Retriable(err))
        }
        Err(err) if is_namespace_terminating(&err) => {
            // An eviction in a namespace being deleted is always refused. A Pod already marked for
            // deletion will go away with its namespace, so it is waited on instead.
            if pod.metadata.deletion_timestamp.is_some() {
                Ok(Evicted::Submitted)
            } else {
                event!(
                    Level::WARN,
                    "Namespace of Pod '{}' is terminating. Retrying in {:.2}s.",
                    pod_key(pod),
                    EVICTION_RETRY_INTERVAL.as_secs_f64()
                );
                Err(EvictionAttemptError::Retriable(err))
            }
        }
        Err(err) => {
            event!(
                Level::ERROR,
                "Error when evicting Pod '{}': '{}'.",
                pod_key(pod),
                err
            );
            Err(EvictionAttemptError::NonRetriable(err))
        }
    }
}

/// Deletes every Pod, then waits for all of them at once.
async fn delete_pods<T: ClusterClient>(
    client: &T,
    pods: Vec<Pod>,
    policy: &DrainPolicy,
    wait_params: &WaitParams,
    deadline: &DrainDeadline,
    on_removed: &PodRemovedHook,
) -> Result<Vec<String>, Vec<PodRemovalError>> {
    let params = policy.delete_params();
    let mut removed = Vec::new();
    let mut errors = Vec::new();
    let mut submitted = Vec::with_capacity(pods.len());

    for pod in pods {
        match delete_pod(client, &pod, &params, deadline).await {
            Ok(true) => submitted.push(pod),
            Ok(false) => {
                on_removed(&pod, false);
                removed.push(pod_key(&pod));
            }
            Err(err) => errors.push(err),
        }
    }

    let waited = wait_for_deletion(client, submitted, wait_params, deadline, |pod| {
        on_removed(pod, false);
        removed.push(pod_key(pod));
    })
    .await;

    if let Err(source) = waited {
        // Every Pod still pending fails with the same cause.
        let source = Arc::new(source);
        errors.extend(
            source
                .pending()
                .iter()
                .map(|pod| PodRemovalError::WaitForDeletion {
                    pod: pod.clone(),
                    source: source.clone(),
                }),
        );
    }

    if errors.is_empty() {
        Ok(removed)
    } else {
        Err(errors)
    }
}

/// Deletes a single Pod. Returns `Ok(false)` if the Pod was already gone.
async fn delete_pod<T: ClusterClient>(
    client: &T,
    pod: &Pod,
    params: &DeleteParams,
    deadline: &DrainDeadline,
) -> Result<bool, PodRemovalError> {
    deadline.check().map_err(|source| PodRemovalError::Aborted {
        pod: pod_key(pod),
        source,
    })?;

    match client
        .delete_pod(&pod_namespace(pod), &pod.name_any(), params)
        .await
    {
        Ok(()) => {
            event!(Level::INFO, "Deleted Pod '{}'", pod_key(pod));
            Ok(true)
        }
        Err(err) if is_not_found(&err) => Ok(false),
        Err(source) => Err(PodRemovalError::Delete {
            pod: pod_key(pod),
            source,
        }),
    }
}

fn partition_outcomes(
    outcomes: Vec<Result<Option<String>, PodRemovalError>>,
) -> Result<Vec<String>, Vec<PodRemovalError>> {
    let mut removed = Vec::new();
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(Some(key)) => removed.push(key),
            Ok(None) => {}
            Err(err) => errors.push(err),
        }
    }
    if errors.is_empty() {
        Ok(removed)
    } else {
        Err(errors)
    }
}
