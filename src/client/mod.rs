//! Cluster access used by the reconciler
//!
//! The reconciler only talks to the cluster through these traits, so the
//! passes can run against the live API server or an in-memory store.

mod live;

pub use live::{KubeClusterClient, KubeControlPlaneApi};

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;

use crate::controller::error::Result;
use crate::crd::{ControlPlane, ControlPlaneStatus, ResourceKey};

/// How dependents are handled when an object is deleted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Propagation {
    /// Dependents are removed before the object disappears
    Foreground,
    /// The object disappears immediately; the garbage collector removes dependents
    Background,
}

/// Generic object access
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Current state of an object, `None` if it does not exist
    async fn get(&self, key: &ResourceKey) -> Result<Option<DynamicObject>>;

    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an object; the object's resourceVersion is the concurrency token
    async fn update(&self, object: &DynamicObject) -> Result<DynamicObject>;

    /// Delete an object. A missing object is reported as a not-found error.
    async fn delete(&self, key: &ResourceKey, propagation: Propagation) -> Result<()>;

    /// Objects of one kind whose labels contain every entry of `labels`.
    ///
    /// `namespace` of `None` lists across all namespaces (or cluster-scoped
    /// objects). Kinds the server does not serve yield an empty list.
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>>;
}

/// Access to the ControlPlane instances themselves
#[async_trait]
pub trait ControlPlaneApi: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ControlPlane>>;

    /// Replace the finalizer list, guarded by the instance's resourceVersion
    async fn set_finalizers(&self, instance: &ControlPlane, finalizers: Vec<String>) -> Result<()>;

    async fn update_status(&self, instance: &ControlPlane, status: &ControlPlaneStatus)
    -> Result<()>;
}

/// Render a label map as a selector string (`k1=v1,k2=v2`)
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
