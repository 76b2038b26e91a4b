//! Polls the cluster until submitted Pods are gone.
//!
//! A Pod is gone once the API reports it as not found, or once a Pod with the same name but a
//! different UID has taken its place (the controller recreated it elsewhere).
use crate::cluster::{is_not_found, pod_key, pod_namespace, ClusterClient};
use crate::constants::DELETION_CHECK_INTERVAL;
use crate::deadline::DrainDeadline;
use crate::filters::is_stuck_terminating;
use crate::policy::DrainPolicy;

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{event, instrument, Level};

use self::error::WaitError;

/// Polling configuration for a single wait.
#[derive(Clone, Debug, PartialEq)]
pub struct WaitParams {
    pub interval: Duration,
    /// Bounds this wait only, independently of the drain's global deadline. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Pods terminating for longer than this are no longer waited on.
    pub skip_wait_for_delete_timeout: Option<chrono::Duration>,
}

impl WaitParams {
    pub fn from_policy(policy: &DrainPolicy) -> Self {
        WaitParams {
            interval: DELETION_CHECK_INTERVAL,
            timeout: policy.timeout(),
            skip_wait_for_delete_timeout: policy.skip_wait_for_delete_timeout(),
        }
    }
}

/// Waits until every Pod in `pods` is gone, calling `on_done` once for each Pod as it disappears.
///
/// The first check happens immediately. Pods that are stuck terminating are dropped from the wait
/// without calling `on_done`. Fails if a Pod cannot be fetched, if `params.timeout` elapses, or if
/// the drain's deadline expires while any Pod is still pending.
#[instrument(skip(client, pods, params, deadline, on_done), fields(pods = pods.len()), err)]
pub async fn wait_for_deletion<T, F>(
    client: &T,
    pods: Vec<Pod>,
    params: &WaitParams,
    deadline: &DrainDeadline,
    mut on_done: F,
) -> Result<(), WaitError>
where
    T: ClusterClient,
    F: FnMut(&Pod),
{
    let mut pending = pods;
    let mut ticks = interval(params.interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let wait_timeout = async {
        match params.timeout {
            Some(timeout) => sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(wait_timeout);

    while !pending.is_empty() {
        tokio::select! {
            biased;
            abort = deadline.expired() => {
                return Err(WaitError::Aborted { source: abort, pending: keys(&pending) });
            }
            _ = &mut wait_timeout => {
                return Err(WaitError::WaitTimeout {
                    timeout: params.timeout.unwrap_or_default(),
                    pending: keys(&pending),
                });
            }
            _ = ticks.tick() => {}
        }

        // Pods resolved by an interrupted poll are already out of `pending`.
        let polled = deadline
            .run(poll_pending(
                client,
                &mut pending,
                params.skip_wait_for_delete_timeout,
                &mut on_done,
            ))
            .await;
        match polled {
            Ok(result) => result?,
            Err(abort) => {
                return Err(WaitError::Aborted {
                    source: abort,
                    pending: keys(&pending),
                })
            }
        }

        if !pending.is_empty() {
            event!(
                Level::DEBUG,
                pending = pending.len(),
                "Pods not yet deleted. Waiting {:.2}s.",
                params.interval.as_secs_f64()
            );
        }
    }
    Ok(())
}

/// Checks each pending Pod once, removing every Pod that no longer has to be waited on.
async fn poll_pending<T, F>(
    client: &T,
    pending: &mut Vec<Pod>,
    skip_threshold: Option<chrono::Duration>,
    on_done: &mut F,
) -> Result<(), WaitError>
where
    T: ClusterClient,
    F: FnMut(&Pod),
{
    let now = Utc::now();
    let mut index = 0;

    while index < pending.len() {
        let pod = &pending[index];
        let resolved = match client.get_pod(&pod_namespace(pod), &pod.name_any()).await {
            Err(err) if is_not_found(&err) => {
                event!(Level::INFO, "Pod '{}' deleted.", pod_key(pod));
                on_done(pod);
                true
            }
            Ok(current) if current.metadata.uid != pod.metadata.uid => {
                event!(Level::INFO, "Pod '{}' was replaced.", pod_key(pod));
                on_done(pod);
                true
            }
            Ok(current) if is_stuck_terminating(&current, skip_threshold, now) => {
                event!(
                    Level::WARN,
                    "Pod '{}' has been terminating longer than the skip threshold, no longer waiting on it.",
                    pod_key(pod)
                );
                true
            }
            Ok(_) => false,
            Err(source) => {
                return Err(WaitError::GetPod {
                    pod: pod_key(pod),
                    source,
                    pending: keys(pending.as_slice()),
                });
            }
        };

        if resolved {
            pending.remove(index);
        } else {
            index += 1;
        }
    }
    Ok(())
}

fn keys(pods: &[Pod]) -> Vec<String> {
    pods.iter().map(pod_key).collect()
}

pub mod error {
    use crate::deadline::Abort;
    use snafu::Snafu;
    use tokio::time::Duration;

    /// Every variant lists the Pods that were still pending when the wait stopped.
    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum WaitError {
        #[snafu(display("Could not determine if Pod '{}' has been deleted: '{}'", pod, source))]
        GetPod {
            pod: String,
            source: kube::Error,
            pending: Vec<String>,
        },

        #[snafu(display(
            "Pods were not deleted in the time allocated ({:.2}s): {}",
            timeout.as_secs_f64(),
            pending.join(", ")
        ))]
        WaitTimeout {
            timeout: Duration,
            pending: Vec<String>,
        },

        #[snafu(display("Stopped waiting for Pods to be deleted, {}: {}", source, pending.join(", ")))]
        Aborted {
            source: Abort,
            pending: Vec<String>,
        },
    }

    impl WaitError {
        pub fn pending(&self) -> &[String] {
            match self {
                Self::GetPod { pending, .. }
                | Self::WaitTimeout { pending, .. }
                | Self::Aborted { pending, .. } => pending,
            }
        }
    }
}
