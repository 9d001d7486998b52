//! Component reconciliation pass
//!
//! Applies every object rendered for one component, then deletes the
//! objects the component had last cycle but no longer renders, newest
//! first.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::client::Propagation;
use crate::controller::error::{Error, Result};
use crate::controller::instance::InstanceReconciler;
use crate::controller::status::{
    needs_deletion, update_delete_status, update_reconcile_status, update_uninstall_status,
};
use crate::crd::{ComponentStatus, ResourceKey, ResourceStatus};
use crate::health::ObjectOperation;
use crate::manifest::{Document, Manifest, Renderings, split_documents};

impl InstanceReconciler<'_> {
    /// Reconcile one component by name.
    ///
    /// Returns `None` when the renderer produced nothing for the component;
    /// it is left as it was.
    pub(crate) async fn process_component(
        &self,
        name: &str,
        renderings: &Renderings,
        old: Option<&ComponentStatus>,
    ) -> Option<(ComponentStatus, Result<()>)> {
        let Some(manifests) = renderings.get(name) else {
            info!(component = name, "No renderings for component, skipping");
            return None;
        };
        let fresh;
        let old = match old {
            Some(old) => old,
            None => {
                fresh = ComponentStatus::new(name);
                &fresh
            }
        };
        info!(component = name, manifests = manifests.len(), "Reconciling component");
        Some(self.process_manifests(manifests, old).await)
    }

    /// Apply `manifests` and delete what `old` tracked but they no longer
    /// contain. An empty manifest list decommissions the component.
    pub(crate) async fn process_manifests(
        &self,
        manifests: &[Manifest],
        old: &ComponentStatus,
    ) -> (ComponentStatus, Result<()>) {
        let mut new = ComponentStatus {
            name: old.name.clone(),
            status: old.status.clone(),
            resources: Vec::new(),
        };
        let mut processed = HashSet::new();
        let mut errors = Vec::new();

        match self
            .apply_manifests(manifests, &mut processed, old, &mut new, &mut errors)
            .await
        {
            Ok(()) => errors.extend(self.delete_stale(old, &processed, &mut new).await),
            Err(e) => {
                warn!(component = %old.name, error = %e, "Aborting component pass");
                // keep tracking what this pass never reached
                for entry in &old.resources {
                    if new.resource(&entry.resource).is_none() {
                        new.resources.push(entry.clone());
                    }
                }
                errors.push(e);
            }
        }

        let result = Error::aggregate(errors);
        if manifests.is_empty() {
            update_uninstall_status(&mut new.status, result.as_ref().err());
        } else {
            new.status.observed_generation = self.generation;
            update_reconcile_status(&mut new.status, result.as_ref().err());
        }

        if let Err(e) = self.ctx.hooks.on_component_reconciled(self.instance, &new).await {
            warn!(component = %new.name, error = %e, "Post-component hook failed");
        }
        (new, result)
    }

    /// Process every object of every manifest, collecting per-object errors.
    ///
    /// Returns an error only when the pass must stop.
    async fn apply_manifests(
        &self,
        manifests: &[Manifest],
        processed: &mut HashSet<ResourceKey>,
        old: &ComponentStatus,
        new: &mut ComponentStatus,
        errors: &mut Vec<Error>,
    ) -> Result<()> {
        for manifest in manifests {
            if !manifest.is_yaml() {
                debug!(manifest = %manifest.name, "Skipping non-YAML manifest");
                continue;
            }
            for raw in split_documents(&manifest.content) {
                let document = match Document::parse(raw) {
                    Ok(Some(document)) => document,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(manifest = %manifest.name, error = %e, "Failed to decode document");
                        errors.push(e);
                        continue;
                    }
                };
                for entry in document.into_entries()? {
                    let result = match entry {
                        Ok(object) => self.process_object(object, processed, Some(old), new).await,
                        Err(e) => Err(e),
                    };
                    match result {
                        Err(e) if e.aborts_pass() => return Err(e),
                        Err(e) => errors.push(e),
                        Ok(()) => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Delete objects tracked by `old` that were not processed this cycle.
    ///
    /// Walks `old` newest first. Each attempt leaves a deletion record in
    /// `new`; entries already recorded as not installed are dropped.
    async fn delete_stale(
        &self,
        old: &ComponentStatus,
        processed: &HashSet<ResourceKey>,
        new: &mut ComponentStatus,
    ) -> Vec<Error> {
        let mut errors = Vec::new();
        let mut records = Vec::new();

        for entry in old.resources.iter().rev() {
            let key = &entry.resource;
            if processed.contains(key) {
                continue;
            }
            if !needs_deletion(&entry.status) {
                debug!(resource = %key, "Object not installed, dropping status");
                continue;
            }

            let result = self.delete_object(key).await;
            let mut record = ResourceStatus {
                resource: key.clone(),
                status: entry.status.clone(),
            };
            record.status.observed_generation = 0;
            update_delete_status(&mut record.status, result.as_ref().err());
            records.push(record);
            if let Err(e) = result {
                warn!(resource = %key, error = %e, "Failed to delete object");
                errors.push(e);
            }
        }

        // records keep creation order
        new.resources.extend(records.into_iter().rev());
        errors
    }

    async fn delete_object(&self, key: &ResourceKey) -> Result<()> {
        match self.ctx.cluster.delete(key, Propagation::Foreground).await {
            Ok(()) => {
                self.ctx.record_operation(ObjectOperation::Delete);
                info!(resource = %key, "Deleted object");
            }
            Err(e) if e.is_not_found() => {
                debug!(resource = %key, "Object already deleted");
            }
            Err(e) => return Err(e),
        }
        if let Err(e) = self.ctx.hooks.on_object_deleted(self.instance, key).await {
            warn!(resource = %key, error = %e, "Post-delete hook failed");
        }
        Ok(())
    }
}
