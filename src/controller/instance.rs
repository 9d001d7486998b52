//! Reconciliation of one finalized ControlPlane
//!
//! An `InstanceReconciler` is built per reconcile request. It drives the
//! component passes in order, prunes stale objects once every component
//! succeeded, and persists the resulting status tree.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::{error, info, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::object::OWNER_LABEL;
use crate::controller::status::{
    update_initialized_status, update_reconcile_status, update_uninstall_status,
};
use crate::crd::{ControlPlane, ControlPlaneStatus, ResourceKey};
use crate::manifest::{RenderRequest, component_order};

pub struct InstanceReconciler<'a> {
    pub(crate) ctx: &'a Context,
    pub(crate) instance: &'a ControlPlane,
    pub(crate) namespace: String,
    pub(crate) owner_key: ResourceKey,
    /// Owner identity as stamped on managed objects
    pub(crate) owner_label: String,
    pub(crate) generation: i64,
    pub(crate) owner_refs: Vec<OwnerReference>,
}

impl<'a> InstanceReconciler<'a> {
    pub fn new(ctx: &'a Context, instance: &'a ControlPlane) -> Result<Self> {
        let namespace = instance
            .namespace()
            .ok_or(Error::MissingObjectKey("namespace"))?;
        let name = instance
            .metadata
            .name
            .clone()
            .ok_or(Error::MissingObjectKey("name"))?;
        let owner_key = ResourceKey::new(
            namespace.clone(),
            name,
            ControlPlane::api_version(&()),
            ControlPlane::kind(&()),
        )?;
        let owner_label = owner_key.to_label_value()?;

        Ok(Self {
            ctx,
            instance,
            namespace,
            owner_key,
            owner_label,
            generation: instance.metadata.generation.unwrap_or_default(),
            owner_refs: instance.controller_owner_ref(&()).into_iter().collect(),
        })
    }

    pub fn owner_key(&self) -> &ResourceKey {
        &self.owner_key
    }

    /// Selector matching every object owned by this instance
    pub fn owner_selector(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(OWNER_LABEL.to_string(), self.owner_label.clone())])
    }

    /// Run every component pass, prune, and persist status
    pub async fn reconcile(&self) -> Result<()> {
        let previous = self.instance.status.clone().unwrap_or_default();
        let mut status = ControlPlaneStatus {
            status: previous.status.clone(),
            components: Vec::new(),
        };

        let request = RenderRequest {
            name: self.owner_key.name(),
            namespace: &self.namespace,
            version: &self.instance.spec.version,
            values: self.instance.spec.values.as_ref(),
        };
        let renderings = match self.ctx.renderer.render(&request) {
            Ok(renderings) => {
                update_initialized_status(&mut status.status, None);
                renderings
            }
            Err(e) => {
                error!(error = %e, "Failed to render manifests");
                update_initialized_status(&mut status.status, Some(&e));
                update_reconcile_status(&mut status.status, Some(&e));
                status.components = previous.components;
                return self.persist(&status, Err(e)).await;
            }
        };

        let mut errors = Vec::new();
        let names = renderings
            .keys()
            .chain(previous.components.iter().map(|c| &c.name));
        for name in component_order(names) {
            let old = previous.component(name);
            let Some((component, result)) = self.process_component(name, &renderings, old).await
            else {
                status.components.extend(old.cloned());
                continue;
            };
            if let Err(e) = result {
                warn!(component = name, error = %e, "Component reconciliation failed");
                errors.push(e);
            }
            status.components.push(component);
        }

        if errors.is_empty() {
            if let Err(e) = self.prune(Some(self.generation)).await {
                warn!(error = %e, "Pruning stale resources failed");
                errors.push(e);
            }
        } else {
            info!("Skipping prune until every component reconciles");
        }

        status.status.observed_generation = self.generation;
        let result = Error::aggregate(errors);
        update_reconcile_status(&mut status.status, result.as_ref().err());
        self.persist(&status, result).await
    }

    /// Delete everything this instance installed
    ///
    /// Runs a deletion pass per recorded component, last component first,
    /// then sweeps anything still carrying the owner label.
    pub async fn cleanup(&self) -> Result<()> {
        let previous = self.instance.status.clone().unwrap_or_default();
        let mut status = ControlPlaneStatus {
            status: previous.status.clone(),
            components: Vec::new(),
        };

        let mut errors = Vec::new();
        for old in previous.components.iter().rev() {
            info!(component = %old.name, "Uninstalling component");
            let (component, result) = self.process_manifests(&[], old).await;
            if let Err(e) = result {
                errors.push(e);
            }
            status.components.insert(0, component);
        }
        if let Err(e) = self.prune(None).await {
            errors.push(e);
        }

        let result = Error::aggregate(errors);
        update_uninstall_status(&mut status.status, result.as_ref().err());
        self.persist(&status, result).await
    }

    /// Write status and fold a write failure into the outcome
    async fn persist(&self, status: &ControlPlaneStatus, result: Result<()>) -> Result<()> {
        match self.ctx.control_planes.update_status(self.instance, status).await {
            Ok(()) => result,
            Err(e) => {
                warn!(error = %e, "Failed to update ControlPlane status");
                let mut errors = result.err().into_iter().collect::<Vec<_>>();
                errors.push(e);
                Error::aggregate(errors)
            }
        }
    }
}
