//! Extension points around object and component processing
//!
//! `patch_object` failures stop that object's reconciliation for the cycle.
//! The post-processing hooks are best effort: the caller logs their errors.

use async_trait::async_trait;
use kube::api::DynamicObject;

use crate::controller::error::Result;
use crate::crd::{ComponentStatus, ControlPlane, ResourceKey};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";

#[async_trait]
pub trait ObjectHooks: Send + Sync {
    /// Mutate a desired object before it is applied
    async fn patch_object(&self, _instance: &ControlPlane, _object: &mut DynamicObject) -> Result<()> {
        Ok(())
    }

    /// Called after an object was created
    async fn on_object_created(&self, _instance: &ControlPlane, _object: &DynamicObject) -> Result<()> {
        Ok(())
    }

    /// Called after an object was deleted or found already gone
    async fn on_object_deleted(&self, _instance: &ControlPlane, _key: &ResourceKey) -> Result<()> {
        Ok(())
    }

    /// Called after a component's manifests were processed
    async fn on_component_reconciled(
        &self,
        _instance: &ControlPlane,
        _status: &ComponentStatus,
    ) -> Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl ObjectHooks for NoopHooks {}

/// Stamps the standard `app.kubernetes.io` ownership labels
#[derive(Clone, Debug)]
pub struct StandardLabels {
    pub manager: String,
}

impl Default for StandardLabels {
    fn default() -> Self {
        Self {
            manager: "mesh-operator".to_string(),
        }
    }
}

#[async_trait]
impl ObjectHooks for StandardLabels {
    async fn patch_object(&self, instance: &ControlPlane, object: &mut DynamicObject) -> Result<()> {
        let part_of = instance.metadata.name.clone().unwrap_or_default();
        let labels = object.metadata.labels.get_or_insert_with(Default::default);
        labels.insert(MANAGED_BY_LABEL.to_string(), self.manager.clone());
        labels.entry(PART_OF_LABEL.to_string()).or_insert(part_of);
        Ok(())
    }
}
