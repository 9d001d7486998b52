//! Generation pruner
//!
//! Sweeps the cluster for objects carrying this instance's owner label but
//! a stale (or missing) generation label, and deletes them. Kind order is
//! data, so the sweep order can be tested without touching a cluster.

use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use tracing::{debug, info, warn};

use crate::client::Propagation;
use crate::controller::error::{Error, Result};
use crate::controller::instance::InstanceReconciler;
use crate::controller::object::GENERATION_LABEL;
use crate::crd::ResourceKey;
use crate::health::ObjectOperation;

/// One kind swept by the pruner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PruneKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
}

impl PruneKind {
    const fn new(group: &'static str, version: &'static str, kind: &'static str) -> Self {
        Self {
            group,
            version,
            kind,
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(self.group, self.version, self.kind)
    }
}

/// Namespaced kinds, in deletion order: dependents before what they reference
pub const NAMESPACED_PRUNE_KINDS: &[PruneKind] = &[
    PruneKind::new("autoscaling", "v2", "HorizontalPodAutoscaler"),
    PruneKind::new("policy", "v1", "PodDisruptionBudget"),
    PruneKind::new("route.openshift.io", "v1", "Route"),
    PruneKind::new("apps.openshift.io", "v1", "DeploymentConfig"),
    PruneKind::new("apps", "v1", "Deployment"),
    PruneKind::new("apps", "v1", "DaemonSet"),
    PruneKind::new("apps", "v1", "StatefulSet"),
    PruneKind::new("batch", "v1", "Job"),
    PruneKind::new("networking.k8s.io", "v1", "Ingress"),
    PruneKind::new("", "v1", "Service"),
    PruneKind::new("", "v1", "Endpoints"),
    PruneKind::new("", "v1", "ConfigMap"),
    PruneKind::new("", "v1", "PersistentVolumeClaim"),
    PruneKind::new("", "v1", "Pod"),
    PruneKind::new("", "v1", "Secret"),
    PruneKind::new("", "v1", "ServiceAccount"),
    PruneKind::new("rbac.authorization.k8s.io", "v1", "RoleBinding"),
    PruneKind::new("rbac.authorization.k8s.io", "v1", "Role"),
    PruneKind::new("authentication.istio.io", "v1alpha1", "Policy"),
    PruneKind::new("config.istio.io", "v1alpha2", "adapter"),
    PruneKind::new("config.istio.io", "v1alpha2", "attributemanifest"),
    PruneKind::new("config.istio.io", "v1alpha2", "handler"),
    PruneKind::new("config.istio.io", "v1alpha2", "kubernetes"),
    PruneKind::new("config.istio.io", "v1alpha2", "logentry"),
    PruneKind::new("config.istio.io", "v1alpha2", "metric"),
    PruneKind::new("config.istio.io", "v1alpha2", "rule"),
    PruneKind::new("config.istio.io", "v1alpha2", "template"),
    PruneKind::new("networking.istio.io", "v1alpha3", "DestinationRule"),
    PruneKind::new("networking.istio.io", "v1alpha3", "EnvoyFilter"),
    PruneKind::new("networking.istio.io", "v1alpha3", "Gateway"),
    PruneKind::new("networking.istio.io", "v1alpha3", "VirtualService"),
];

/// Cluster-scoped kinds, in deletion order
pub const CLUSTER_PRUNE_KINDS: &[PruneKind] = &[
    PruneKind::new("admissionregistration.k8s.io", "v1", "MutatingWebhookConfiguration"),
    PruneKind::new("admissionregistration.k8s.io", "v1", "ValidatingWebhookConfiguration"),
    PruneKind::new("certmanager.k8s.io", "v1alpha1", "ClusterIssuer"),
    PruneKind::new("oauth.openshift.io", "v1", "OAuthClient"),
    PruneKind::new("rbac.authorization.k8s.io", "v1", "ClusterRole"),
    PruneKind::new("rbac.authorization.k8s.io", "v1", "ClusterRoleBinding"),
    PruneKind::new("authentication.istio.io", "v1alpha1", "MeshPolicy"),
];

/// Kinds listed within one scope; `namespace` is `None` for cluster scope
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sweep {
    pub namespace: Option<String>,
    pub kinds: &'static [PruneKind],
}

/// Sweeps in execution order: launcher namespace, instance namespace,
/// then cluster-scoped kinds
pub fn prune_plan(instance_namespace: &str, launcher_namespace: &str) -> Vec<Sweep> {
    let mut namespaces = vec![launcher_namespace];
    if instance_namespace != launcher_namespace {
        namespaces.push(instance_namespace);
    }
    namespaces
        .into_iter()
        .map(|ns| Sweep {
            namespace: Some(ns.to_string()),
            kinds: NAMESPACED_PRUNE_KINDS,
        })
        .chain(std::iter::once(Sweep {
            namespace: None,
            kinds: CLUSTER_PRUNE_KINDS,
        }))
        .collect()
}

/// Whether an owned object was not stamped by `generation`.
///
/// With no generation every owned object is stale.
pub fn is_stale(object: &DynamicObject, generation: Option<i64>) -> bool {
    let Some(generation) = generation else {
        return true;
    };
    let stamped = object
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(GENERATION_LABEL));
    stamped != Some(&generation.to_string())
}

fn key_of(gvk: &GroupVersionKind, object: &DynamicObject) -> Result<ResourceKey> {
    let api_version = if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    };
    ResourceKey::new(
        object.metadata.namespace.clone().unwrap_or_default(),
        object
            .metadata
            .name
            .clone()
            .ok_or(Error::MissingObjectKey("name"))?,
        api_version,
        gvk.kind.clone(),
    )
}

impl InstanceReconciler<'_> {
    /// Delete owned objects not stamped with `generation`.
    ///
    /// `None` deletes every owned object. Failures are collected and the
    /// sweep continues.
    pub(crate) async fn prune(&self, generation: Option<i64>) -> Result<()> {
        let selector = self.owner_selector();
        let mut errors = Vec::new();

        for sweep in prune_plan(&self.namespace, &self.ctx.config.launcher_namespace) {
            for kind in sweep.kinds {
                let gvk = kind.gvk();
                let objects = match self
                    .ctx
                    .cluster
                    .list(&gvk, sweep.namespace.as_deref(), &selector)
                    .await
                {
                    Ok(objects) => objects,
                    Err(e) => {
                        warn!(kind = kind.kind, error = %e, "Failed to list objects to prune");
                        errors.push(e);
                        continue;
                    }
                };

                for object in objects.iter().filter(|o| is_stale(o, generation)) {
                    if let Err(e) = self.prune_object(&gvk, object).await {
                        warn!(kind = kind.kind, error = %e, "Failed to prune object");
                        errors.push(e);
                    }
                }
            }
        }

        Error::aggregate(errors)
    }

    async fn prune_object(&self, gvk: &GroupVersionKind, object: &DynamicObject) -> Result<()> {
        let key = key_of(gvk, object)?;
        match self.ctx.cluster.delete(&key, Propagation::Background).await {
            Ok(()) => {
                self.ctx.record_operation(ObjectOperation::Prune);
                info!(resource = %key, "Pruned stale object");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(resource = %key, "Stale object already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
