//! The subset of the Kubernetes API consumed while draining a Node.
use async_trait::async_trait;
use http::StatusCode;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::Eviction;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    APIGroupList, APIResourceList, DeleteOptions, ObjectMeta,
};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::instrument;

#[cfg(any(test, feature = "mockall"))]
use mockall::{mock, predicate::*};

#[async_trait]
/// A trait providing the cluster API capabilities needed to drain a Node. This is provided as a trait
/// in order to allow mocks to be used for testing purposes.
///
/// Implementations must be safe to share between concurrently running Pod removals.
pub trait ClusterClient: Clone + Sized + Send + Sync {
    /// Fetch a Node by name.
    async fn get_node(&self, name: &str) -> kube::Result<Node>;
    /// List Nodes matching the given parameters.
    async fn list_nodes(&self, params: &ListParams) -> kube::Result<Vec<Node>>;
    /// Apply an RFC 6902 patch to a Node.
    async fn patch_node(&self, name: &str, patch: &json_patch::Patch) -> kube::Result<Node>;
    /// Overwrite a Node with the given object.
    async fn replace_node(&self, name: &str, node: &Node) -> kube::Result<Node>;
    /// List Pods across all namespaces matching the given parameters.
    async fn list_pods(&self, params: &ListParams) -> kube::Result<Vec<Pod>>;
    async fn get_pod(&self, namespace: &str, name: &str) -> kube::Result<Pod>;
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        params: &DeleteParams,
    ) -> kube::Result<()>;
    /// Create an Eviction for the given Pod, carrying `options` as its delete options.
    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> kube::Result<()>;
    /// List the API groups served by the cluster.
    async fn list_api_groups(&self) -> kube::Result<APIGroupList>;
    /// List the resources served by the core API group at the given version.
    async fn list_core_api_resources(&self, version: &str) -> kube::Result<APIResourceList>;
}

#[cfg(any(test, feature = "mockall"))]
mock! {
    /// A Mock ClusterClient for use in tests.
    pub ClusterClient {}
    #[async_trait]
    impl ClusterClient for ClusterClient {
        async fn get_node(&self, name: &str) -> kube::Result<Node>;
        async fn list_nodes(&self, params: &ListParams) -> kube::Result<Vec<Node>>;
        async fn patch_node(&self, name: &str, patch: &json_patch::Patch) -> kube::Result<Node>;
        async fn replace_node(&self, name: &str, node: &Node) -> kube::Result<Node>;
        async fn list_pods(&self, params: &ListParams) -> kube::Result<Vec<Pod>>;
        async fn get_pod(&self, namespace: &str, name: &str) -> kube::Result<Pod>;
        async fn delete_pod(
            &self,
            namespace: &str,
            name: &str,
            params: &DeleteParams,
        ) -> kube::Result<()>;
        async fn evict_pod(
            &self,
            namespace: &str,
            name: &str,
            options: &DeleteOptions,
        ) -> kube::Result<()>;
        async fn list_api_groups(&self) -> kube::Result<APIGroupList>;
        async fn list_core_api_resources(&self, version: &str) -> kube::Result<APIResourceList>;
    }

    impl Clone for ClusterClient {
        fn clone(&self) -> Self;
    }
}

#[async_trait]
impl<T> ClusterClient for Arc<T>
where
    T: ClusterClient,
{
    async fn get_node(&self, name: &str) -> kube::Result<Node> {
        (**self).get_node(name).await
    }

    async fn list_nodes(&self, params: &ListParams) -> kube::Result<Vec<Node>> {
        (**self).list_nodes(params).await
    }

    async fn patch_node(&self, name: &str, patch: &json_patch::Patch) -> kube::Result<Node> {
        (**self).patch_node(name, patch).await
    }

    async fn replace_node(&self, name: &str, node: &Node) -> kube::Result<Node> {
        (**self).replace_node(name, node).await
    }

    async fn list_pods(&self, params: &ListParams) -> kube::Result<Vec<Pod>> {
        (**self).list_pods(params).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> kube::Result<Pod> {
        (**self).get_pod(namespace, name).await
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        params: &DeleteParams,
    ) -> kube::Result<()> {
        (**self).delete_pod(namespace, name, params).await
    }

    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> kube::Result<()> {
        (**self).evict_pod(namespace, name, options).await
    }

    async fn list_api_groups(&self) -> kube::Result<APIGroupList> {
        (**self).list_api_groups().await
    }

    async fn list_core_api_resources(&self, version: &str) -> kube::Result<APIResourceList> {
        (**self).list_core_api_resources(version).await
    }
}

#[derive(Clone)]
/// Concrete implementation of the `ClusterClient` trait. This implementation will almost
/// certainly be used in any case that isn't a unit test.
pub struct K8SClusterClient {
    k8s_client: kube::Client,
}

impl K8SClusterClient {
    pub fn new(k8s_client: kube::Client) -> Self {
        K8SClusterClient { k8s_client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.k8s_client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.k8s_client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for K8SClusterClient {
    #[instrument(skip(self), err)]
    async fn get_node(&self, name: &str) -> kube::Result<Node> {
        self.nodes().get(name).await
    }

    #[instrument(skip(self), err)]
    async fn list_nodes(&self, params: &ListParams) -> kube::Result<Vec<Node>> {
        Ok(self.nodes().list(params).await?.items)
    }

    #[instrument(skip(self), err)]
    async fn patch_node(&self, name: &str, patch: &json_patch::Patch) -> kube::Result<Node> {
        self.nodes()
            .patch(
                name,
                &PatchParams::default(),
                &Patch::Json::<()>(patch.clone()),
            )
            .await
    }

    #[instrument(skip(self, node), err)]
    async fn replace_node(&self, name: &str, node: &Node) -> kube::Result<Node> {
        self.nodes()
            .replace(name, &PostParams::default(), node)
            .await
    }

    #[instrument(skip(self), err)]
    async fn list_pods(&self, params: &ListParams) -> kube::Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::all(self.k8s_client.clone());
        Ok(pods.list(params).await?.items)
    }

    #[instrument(skip(self), err)]
    async fn get_pod(&self, namespace: &str, name: &str) -> kube::Result<Pod> {
        self.pods(namespace).get(name).await
    }

    #[instrument(skip(self, params), err)]
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        params: &DeleteParams,
    ) -> kube::Result<()> {
        self.pods(namespace).delete(name, params).await?;
        Ok(())
    }

    #[instrument(skip(self, options), err)]
    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> kube::Result<()> {
        // `Api::evict` writes its delete options under a key the API server ignores, so the
        // Eviction object is posted to the subresource directly.
        let body = serde_json::to_vec(&eviction(namespace, name, options))
            .map_err(kube::Error::SerdeError)?;
        self.pods(namespace)
            .create_subresource::<kube::core::response::Status>(
                "eviction",
                name,
                &PostParams::default(),
                body,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_api_groups(&self) -> kube::Result<APIGroupList> {
        self.k8s_client.list_api_groups().await
    }

    #[instrument(skip(self), err)]
    async fn list_core_api_resources(&self, version: &str) -> kube::Result<APIResourceList> {
        self.k8s_client.list_core_api_resources(version).await
    }
}

/// The `policy/v1` Eviction created for a Pod.
pub fn eviction(namespace: &str, name: &str, options: &DeleteOptions) -> Eviction {
    Eviction {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        delete_options: Some(options.clone()),
    }
}

/// Returns the HTTP status code carried by a Kubernetes API error response, if any.
pub fn api_status(error: &kube::Error) -> Option<StatusCode> {
    match error {
        kube::Error::Api(response) => StatusCode::from_u16(response.code).ok(),
        _ => None,
    }
}

pub fn is_not_found(error: &kube::Error) -> bool {
    api_status(error) == Some(StatusCode::NOT_FOUND)
}

pub fn is_too_many_requests(error: &kube::Error) -> bool {
    api_status(error) == Some(StatusCode::TOO_MANY_REQUESTS)
}

/// An eviction in a namespace that is being deleted is refused with 403 until the namespace is gone.
pub fn is_namespace_terminating(error: &kube::Error) -> bool {
    match error {
        kube::Error::Api(response) => {
            response.code == StatusCode::FORBIDDEN.as_u16()
                && response
                    .message
                    .contains(crate::constants::NAMESPACE_TERMINATING_MESSAGE)
        }
        _ => false,
    }
}

/// A `namespace/name` rendering of a Pod, used to identify Pods in logs and errors.
pub fn pod_key(pod: &Pod) -> String {
    format!("{}/{}", pod_namespace(pod), pod.name_any())
}

/// Pods without an explicit namespace live in `default`.
pub fn pod_namespace(pod: &Pod) -> String {
    pod.namespace().unwrap_or_else(|| "default".to_string())
}
