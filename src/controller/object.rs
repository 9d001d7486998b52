//! Reconciliation of one desired object against the cluster

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::controller::error::Result;
use crate::controller::instance::InstanceReconciler;
use crate::controller::status::update_reconcile_status;
use crate::crd::{ComponentStatus, ConditionType, ResourceKey, ResourceStatus, StatusType};
use crate::health::ObjectOperation;

/// Owner identity of a managed object
pub const OWNER_LABEL: &str = "mesh.operator.io/owner";
/// Owner generation a managed object was last reconciled at
pub const GENERATION_LABEL: &str = "mesh.operator.io/owner-generation";

/// Fields never compared when an object has no `spec`
const UNCOMPARED_FIELDS: &[&str] = &["status", "kind", "apiVersion", "metadata"];

/// Whether a live object differs from the desired one.
///
/// Only `spec` is compared when the desired object has one. Otherwise each
/// top-level field the desired object sets, other than status and the
/// type/metadata fields, is compared; fields only the live object carries
/// are ignored and a missing field equals `null`.
pub fn should_update(desired: &DynamicObject, live: &DynamicObject) -> bool {
    if let Some(spec) = desired.data.get("spec") {
        return live.data.get("spec").unwrap_or(&Value::Null) != spec;
    }

    desired
        .data
        .as_object()
        .into_iter()
        .flatten()
        .filter(|(name, _)| !UNCOMPARED_FIELDS.contains(&name.as_str()))
        .any(|(name, value)| live.data.get(name).unwrap_or(&Value::Null) != value)
}

impl InstanceReconciler<'_> {
    fn provenance_labels(&self) -> [(String, String); 2] {
        [
            (OWNER_LABEL.to_string(), self.owner_label.clone()),
            (GENERATION_LABEL.to_string(), self.generation.to_string()),
        ]
    }

    /// Live object lacks current provenance labels
    fn needs_restamp(&self, live: &DynamicObject) -> bool {
        let labels = live.metadata.labels.as_ref();
        self.provenance_labels()
            .iter()
            .any(|(k, v)| labels.and_then(|l| l.get(k)) != Some(v))
    }

    fn stamp(&self, object: &mut DynamicObject) {
        object
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(self.provenance_labels());
    }

    fn adopt(&self, object: &mut DynamicObject) {
        let refs = object.metadata.owner_references.get_or_insert_with(Vec::new);
        for owner in &self.owner_refs {
            if !refs.iter().any(|r: &OwnerReference| r.uid == owner.uid) {
                refs.push(owner.clone());
            }
        }
    }

    /// Create, update or re-stamp one desired object and record its status.
    ///
    /// The object's status entry lands in `new` whatever the outcome.
    pub(crate) async fn process_object(
        &self,
        mut object: DynamicObject,
        processed: &mut HashSet<ResourceKey>,
        old: Option<&ComponentStatus>,
        new: &mut ComponentStatus,
    ) -> Result<()> {
        let key = ResourceKey::from_object(&object)?;
        // cross-namespace and cluster-scoped objects cannot be owned
        if key.namespace() == self.namespace {
            self.adopt(&mut object);
        }
        self.stamp(&mut object);

        let mut status = new
            .resource(&key)
            .or_else(|| old.and_then(|c| c.resource(&key)))
            .cloned()
            .unwrap_or_else(|| ResourceStatus::new(key.clone()));
        processed.insert(key.clone());

        let result = self.apply_object(object, &key, &mut status.status).await;
        if let Err(e) = &result {
            warn!(resource = %key, error = %e, "Failed to reconcile object");
        }
        update_reconcile_status(&mut status.status, result.as_ref().err());
        new.upsert_resource(status);
        result
    }

    async fn apply_object(
        &self,
        mut object: DynamicObject,
        key: &ResourceKey,
        status: &mut StatusType,
    ) -> Result<()> {
        self.ctx.hooks.patch_object(self.instance, &mut object).await?;

        let cluster = &self.ctx.cluster;
        match cluster.get(key).await? {
            None => {
                let created = cluster.create(&object).await?;
                self.ctx.record_operation(ObjectOperation::Create);
                info!(resource = %key, "Created object");
                status.observed_generation = 1;
                if let Err(e) = self.ctx.hooks.on_object_created(self.instance, &created).await {
                    warn!(resource = %key, error = %e, "Post-create hook failed");
                }
            }
            Some(live) if should_update(&object, &live) => {
                status.remove_condition(&ConditionType::Reconciled);
                object.metadata.resource_version = live.metadata.resource_version;
                let updated = cluster.update(&object).await?;
                self.ctx.record_operation(ObjectOperation::Update);
                info!(resource = %key, "Updated object");
                status.observed_generation = updated.metadata.generation.unwrap_or_default();
            }
            Some(mut live) if self.needs_restamp(&live) => {
                self.stamp(&mut live);
                cluster.update(&live).await?;
                self.ctx.record_operation(ObjectOperation::Restamp);
                debug!(resource = %key, generation = self.generation, "Re-stamped object");
            }
            Some(_) => {
                debug!(resource = %key, "Object is up to date");
            }
        }
        Ok(())
    }
}
