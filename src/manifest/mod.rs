//! Rendered manifests and their grouping into components

mod document;
pub mod renderer;

pub use document::{Document, Field};
pub use renderer::{DirectoryRenderer, ManifestRenderer, RenderRequest, Renderings};

use std::collections::BTreeMap;

/// Kinds in the order they must be installed; unknown kinds go last
pub const INSTALL_ORDER: &[&str] = &[
    "Namespace",
    "ResourceQuota",
    "LimitRange",
    "PodSecurityPolicy",
    "PodDisruptionBudget",
    "Secret",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "ServiceAccount",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "Role",
    "RoleBinding",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "HorizontalPodAutoscaler",
    "StatefulSet",
    "Job",
    "CronJob",
    "Ingress",
    "APIService",
];

/// Components reconciled first, in this order; others follow alphabetically
pub const COMPONENT_ORDER: &[&str] = &[
    "istio",
    "istio/charts/security",
    "istio/charts/prometheus",
    "istio/charts/galley",
    "istio/charts/mixer",
    "istio/charts/pilot",
    "istio/charts/gateways",
    "istio/charts/sidecarInjectorWebhook",
    "istio/charts/grafana",
    "istio/charts/tracing",
    "istio/charts/kiali",
];

/// One rendered template file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    /// Path of the template relative to the chart root
    pub name: String,
    pub content: String,
}

impl Manifest {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Only YAML templates carry objects; notes and helpers do not
    pub fn is_yaml(&self) -> bool {
        self.name.ends_with(".yaml")
    }

    /// Kind of the first document, used for install ordering
    pub fn head_kind(&self) -> Option<String> {
        split_documents(&self.content).into_iter().find_map(|raw| {
            let document = Document::parse(raw).ok()??;
            document.get_str(&["kind"]).present().map(str::to_string)
        })
    }

    /// Component a template belongs to: the innermost `charts/<name>`
    /// subchart, or the top-level chart
    pub fn component(&self) -> String {
        let segments: Vec<&str> = self.name.split('/').collect();
        let mut end = segments.len().min(1);
        let mut i = 1;
        while i + 1 < segments.len() {
            if segments[i] == "charts" {
                end = i + 2;
                i += 2;
            } else {
                i += 1;
            }
        }
        segments[..end].join("/")
    }
}

/// Split a multi-document YAML stream on `---` separator lines.
///
/// Documents that hold only whitespace are dropped.
pub fn split_documents(content: &str) -> Vec<&str> {
    let mut documents = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed.starts_with("--- ") {
            documents.push(&content[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    documents.push(&content[start..]);
    documents
        .into_iter()
        .filter(|doc| !doc.trim().is_empty())
        .collect()
}

fn install_rank(kind: Option<&str>) -> usize {
    kind.and_then(|kind| INSTALL_ORDER.iter().position(|k| *k == kind))
        .unwrap_or(INSTALL_ORDER.len())
}

/// Stable sort by the install order of each manifest's first kind
pub fn sort_by_install_order(manifests: &mut [Manifest]) {
    manifests.sort_by_cached_key(|m| install_rank(m.head_kind().as_deref()));
}

/// Group manifests by component, each group in install order
pub fn group_by_component(manifests: Vec<Manifest>) -> Renderings {
    let mut grouped: Renderings = BTreeMap::new();
    for manifest in manifests {
        grouped.entry(manifest.component()).or_default().push(manifest);
    }
    for group in grouped.values_mut() {
        sort_by_install_order(group);
    }
    grouped
}

/// Order in which components are reconciled
pub fn component_order<'a>(names: impl IntoIterator<Item = &'a String>) -> Vec<&'a str> {
    let mut ordered: Vec<&str> = names.into_iter().map(String::as_str).collect();
    ordered.sort_by_key(|name| {
        let rank = COMPONENT_ORDER
            .iter()
            .position(|c| c == name)
            .unwrap_or(COMPONENT_ORDER.len());
        (rank, *name)
    });
    ordered.dedup();
    ordered
}
