//! Builders for the Kubernetes objects used throughout the unit tests.
use crate::cluster::{ClusterClient, MockClusterClient};
use crate::constants::{DAEMON_SET_KIND, MIRROR_POD_ANNOTATION, NODE_READY_CONDITION};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, Node, NodeCondition, NodeSpec, NodeStatus, Pod, PodSpec, PodStatus,
    Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    APIGroupList, APIResourceList, DeleteOptions, ObjectMeta, OwnerReference, Time,
};
use kube::api::{DeleteParams, ListParams};
use kube::core::ErrorResponse;
use maplit::btreemap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

pub(crate) fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    })
}

pub(crate) fn not_found() -> kube::Error {
    api_error(404, "NotFound", "not found")
}

pub(crate) fn too_many_requests() -> kube::Error {
    api_error(
        429,
        "TooManyRequests",
        "Cannot evict pod as it would violate the pod's disruption budget.",
    )
}

pub(crate) fn node(name: &str, unschedulable: Option<bool>, ready: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(format!("{}-uid", name)),
            labels: Some(btreemap! {
                "kubernetes.io/hostname".to_string() => name.to_string(),
            }),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            unschedulable,
            ..Default::default()
        }),
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: NODE_READY_CONDITION.to_string(),
                status: ready.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// A bare Pod: no owner, no volumes, running.
pub(crate) fn pod(name: &str, namespace: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("{}-uid", name)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some("node-1".to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

pub(crate) fn owned_by(mut pod: Pod, kind: &str, owner: &str) -> Pod {
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: owner.to_string(),
        uid: format!("{}-uid", owner),
        controller: Some(true),
        ..Default::default()
    }]);
    pod
}

pub(crate) fn replicated_pod(name: &str, namespace: &str) -> Pod {
    owned_by(pod(name, namespace), "ReplicaSet", "web-5d8f9")
}

pub(crate) fn daemon_set_pod(name: &str, namespace: &str) -> Pod {
    owned_by(pod(name, namespace), DAEMON_SET_KIND, "node-exporter")
}

pub(crate) fn mirror_pod(name: &str, namespace: &str) -> Pod {
    let mut pod = pod(name, namespace);
    pod.metadata.annotations = Some(btreemap! {
        MIRROR_POD_ANNOTATION.to_string() => "6f2a0c".to_string(),
    });
    pod
}

pub(crate) fn with_empty_dir(mut pod: Pod) -> Pod {
    if let Some(spec) = pod.spec.as_mut() {
        spec.volumes = Some(vec![Volume {
            name: "scratch".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }]);
    }
    pod
}

pub(crate) fn with_phase(mut pod: Pod, phase: &str) -> Pod {
    if let Some(status) = pod.status.as_mut() {
        status.phase = Some(phase.to_string());
    }
    pod
}

pub(crate) fn terminating_since(mut pod: Pod, since: DateTime<Utc>) -> Pod {
    pod.metadata.deletion_timestamp = Some(Time(since));
    pod
}

/// The same Pod recreated by its controller under a new UID.
pub(crate) fn recreated(pod: &Pod) -> Pod {
    let mut pod = pod.clone();
    pod.metadata.uid = Some("recreated-uid".to_string());
    pod
}

/// A `ClusterClient` whose `get_pod` for one Pod name takes `delay` before answering.
/// Every call is answered by the wrapped mock.
#[derive(Clone)]
pub(crate) struct SlowGetPodClient {
    inner: Arc<MockClusterClient>,
    slow_pod: String,
    delay: Duration,
}

impl SlowGetPodClient {
    pub(crate) fn new(inner: MockClusterClient, slow_pod: &str, delay: Duration) -> Self {
        SlowGetPodClient {
            inner: Arc::new(inner),
            slow_pod: slow_pod.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl ClusterClient for SlowGetPodClient {
    async fn get_node(&self, name: &str) -> kube::Result<Node> {
        self.inner.get_node(name).await
    }

    async fn list_nodes(&self, params: &ListParams) -> kube::Result<Vec<Node>> {
        self.inner.list_nodes(params).await
    }

    async fn patch_node(&self, name: &str, patch: &json_patch::Patch) -> kube::Result<Node> {
        self.inner.patch_node(name, patch).await
    }

    async fn replace_node(&self, name: &str, node: &Node) -> kube::Result<Node> {
        self.inner.replace_node(name, node).await
    }

    async fn list_pods(&self, params: &ListParams) -> kube::Result<Vec<Pod>> {
        self.inner.list_pods(params).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> kube::Result<Pod> {
        if name == self.slow_pod {
            sleep(self.delay).await;
        }
        self.inner.get_pod(namespace, name).await
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        params: &DeleteParams,
    ) -> kube::Result<()> {
        self.inner.delete_pod(namespace, name, params).await
    }

    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> kube::Result<()> {
        self.inner.evict_pod(namespace, name, options).await
    }

    async fn list_api_groups(&self) -> kube::Result<APIGroupList> {
        self.inner.list_api_groups().await
    }

    async fn list_core_api_resources(&self, version: &str) -> kube::Result<APIResourceList> {
        self.inner.list_core_api_resources(version).await
    }
}
