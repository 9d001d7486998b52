//! Kubernetes API server implementations of the client traits

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use kube::api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{self, ApiResource, Scope};
use kube::{Api, Client, ResourceExt};
use tokio::sync::RwLock;
use tracing::debug;

use super::{ClusterClient, ControlPlaneApi, Propagation, label_selector};
use crate::controller::error::{Error, Result};
use crate::crd::{ControlPlane, ControlPlaneStatus, ResourceKey};

/// Field manager recorded on writes
pub const FIELD_MANAGER: &str = "mesh-operator";

/// Resolved API resource for a kind; `None` when the server does not serve it
type Resolved = Option<(ApiResource, Scope)>;

/// Dynamic object access backed by the API server
pub struct KubeClusterClient {
    client: Client,
    discovered: RwLock<HashMap<String, Resolved>>,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovered: RwLock::new(HashMap::new()),
        }
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<Resolved> {
        let cache_key = format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind);
        if let Some(resolved) = self.discovered.read().await.get(&cache_key) {
            return Ok(resolved.clone());
        }

        let resolved = match discovery::pinned_kind(&self.client, gvk).await {
            Ok((resource, capabilities)) => Some((resource, capabilities.scope)),
            Err(e) if is_unserved(&e) => {
                debug!(kind = %cache_key, "Kind is not served by the cluster");
                None
            }
            Err(e) => return Err(e.into()),
        };
        self.discovered
            .write()
            .await
            .insert(cache_key, resolved.clone());
        Ok(resolved)
    }

    async fn api_for(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>> {
        let (resource, scope) = self.resolve(gvk).await?.ok_or_else(|| {
            Error::NotFound(format!("kind {}/{} {} is not served", gvk.group, gvk.version, gvk.kind))
        })?;
        Ok(scoped_api(self.client.clone(), &resource, &scope, namespace))
    }
}

fn scoped_api(
    client: Client,
    resource: &ApiResource,
    scope: &Scope,
    namespace: Option<&str>,
) -> Api<DynamicObject> {
    match (scope, namespace) {
        (Scope::Namespaced, Some(ns)) => Api::namespaced_with(client, ns, resource),
        _ => Api::all_with(client, resource),
    }
}

fn is_unserved(error: &kube::Error) -> bool {
    match error {
        kube::Error::Api(api_err) => api_err.code == 404,
        kube::Error::Discovery(_) => true,
        _ => false,
    }
}

fn object_gvk(object: &DynamicObject) -> Result<GroupVersionKind> {
    Ok(ResourceKey::from_object(object)?.gvk())
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(&self, key: &ResourceKey) -> Result<Option<DynamicObject>> {
        let api = self.api_for(&key.gvk(), key.namespace_opt()).await?;
        Ok(api.get_opt(key.name()).await?)
    }

    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let api = self
            .api_for(&object_gvk(object)?, object.metadata.namespace.as_deref())
            .await?;
        Ok(api.create(&post_params(), object).await?)
    }

    async fn update(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let api = self
            .api_for(&object_gvk(object)?, object.metadata.namespace.as_deref())
            .await?;
        Ok(api.replace(&object.name_any(), &post_params(), object).await?)
    }

    async fn delete(&self, key: &ResourceKey, propagation: Propagation) -> Result<()> {
        let api = self.api_for(&key.gvk(), key.namespace_opt()).await?;
        let params = match propagation {
            Propagation::Foreground => DeleteParams::foreground(),
            Propagation::Background => DeleteParams::background(),
        };
        api.delete(key.name(), &params).await?;
        Ok(())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        let Some((resource, scope)) = self.resolve(gvk).await? else {
            return Ok(Vec::new());
        };
        let api = scoped_api(self.client.clone(), &resource, &scope, namespace);
        let params = ListParams::default().labels(&label_selector(labels));
        Ok(api.list(&params).await?.items)
    }
}

/// ControlPlane access backed by the API server
#[derive(Clone)]
pub struct KubeControlPlaneApi {
    client: Client,
}

impl KubeControlPlaneApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ControlPlane> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ControlPlaneApi for KubeControlPlaneApi {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ControlPlane>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn set_finalizers(&self, instance: &ControlPlane, finalizers: Vec<String>) -> Result<()> {
        let namespace = instance.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        // resourceVersion turns the merge patch into a conditional write
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": instance.resource_version(),
            }
        });
        self.api(&namespace)
            .patch(&instance.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn update_status(&self, instance: &ControlPlane, status: &ControlPlaneStatus) -> Result<()> {
        let namespace = instance.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let patch = serde_json::json!({ "status": status });
        self.api(&namespace)
            .patch_status(&instance.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
