//! Manifest rendering
//!
//! The reconciler consumes rendered manifests through `ManifestRenderer`.
//! `DirectoryRenderer` loads versioned chart templates from disk once at
//! startup and renders them by substituting release placeholders.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use walkdir::WalkDir;

use super::{Manifest, group_by_component};
use crate::controller::error::{Error, Result};

/// Rendered manifests keyed by component name
pub type Renderings = BTreeMap<String, Vec<Manifest>>;

/// Input to a render call
#[derive(Clone, Debug)]
pub struct RenderRequest<'a> {
    /// Release name (the ControlPlane name)
    pub name: &'a str,
    /// Namespace the control plane is installed into
    pub namespace: &'a str,
    /// Chart version to render
    pub version: &'a str,
    /// Free-form values from the spec
    pub values: Option<&'a serde_json::Value>,
}

/// Produces manifests grouped by component. Must be deterministic.
pub trait ManifestRenderer: Send + Sync {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Renderings>;
}

/// Template files of one chart version, in path order
#[derive(Debug, Default)]
struct ChartVersion {
    templates: Vec<Manifest>,
}

/// Renders chart templates loaded from `<root>/<version>/`
#[derive(Clone, Debug, Default)]
pub struct DirectoryRenderer {
    versions: Arc<BTreeMap<String, ChartVersion>>,
}

impl DirectoryRenderer {
    /// Load every version directory under `root`
    pub fn load(root: &Path) -> Result<Self> {
        let entries = fs::read_dir(root).map_err(|e| {
            Error::InvalidConfig(format!("cannot read chart directory {}: {e}", root.display()))
        })?;

        let mut versions = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::InvalidConfig(e.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let version = entry.file_name().to_string_lossy().to_string();
            let chart = load_version(&entry.path())?;
            debug!(version = %version, templates = chart.templates.len(), "Loaded chart version");
            versions.insert(version, chart);
        }

        info!(
            root = %root.display(),
            versions = versions.len(),
            "Loaded chart templates"
        );
        Ok(Self {
            versions: Arc::new(versions),
        })
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }
}

fn load_version(dir: &Path) -> Result<ChartVersion> {
    let mut templates = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let content = fs::read_to_string(entry.path()).map_err(|e| {
            Error::InvalidConfig(format!("cannot read {}: {e}", entry.path().display()))
        })?;
        templates.push(Manifest::new(name, content));
    }
    Ok(ChartVersion { templates })
}

fn substitute(content: &str, request: &RenderRequest<'_>) -> String {
    content
        .replace("{{ .Release.Namespace }}", request.namespace)
        .replace("{{ .Release.Name }}", request.name)
        .replace("{{ .Chart.Version }}", request.version)
}

impl ManifestRenderer for DirectoryRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Renderings> {
        let chart = self.versions.get(request.version).ok_or_else(|| {
            Error::RenderError(format!("no charts for version {:?}", request.version))
        })?;
        let rendered = chart
            .templates
            .iter()
            .map(|t| Manifest::new(t.name.clone(), substitute(&t.content, request)))
            .collect();
        Ok(group_by_component(rendered))
    }
}
