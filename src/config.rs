//! Process configuration
//!
//! Read once from the environment at startup and shared immutably.

use std::path::PathBuf;
use std::time::Duration;

use crate::controller::error::{Error, Result};

pub const ENV_CHART_DIR: &str = "MESH_OPERATOR_CHART_DIR";
pub const ENV_LAUNCHER_NAMESPACE: &str = "MESH_OPERATOR_LAUNCHER_NAMESPACE";
pub const ENV_RESYNC_SECONDS: &str = "MESH_OPERATOR_RESYNC_SECONDS";
pub const ENV_WATCH_NAMESPACE: &str = "WATCH_NAMESPACE";

pub const DEFAULT_CHART_DIR: &str = "/etc/mesh-operator/charts";
pub const DEFAULT_LAUNCHER_NAMESPACE: &str = "devex";
pub const DEFAULT_RESYNC_SECONDS: u64 = 300;

#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Root of the versioned chart directories
    pub chart_dir: PathBuf,
    /// Namespace holding launcher resources, swept separately by the pruner
    pub launcher_namespace: String,
    /// Restrict the controller to one namespace
    pub watch_namespace: Option<String>,
    /// Requeue interval after a successful reconciliation
    pub resync_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            chart_dir: PathBuf::from(DEFAULT_CHART_DIR),
            launcher_namespace: DEFAULT_LAUNCHER_NAMESPACE.to_string(),
            watch_namespace: None,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_SECONDS),
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let resync_interval = match get(ENV_RESYNC_SECONDS) {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    Error::InvalidConfig(format!("{ENV_RESYNC_SECONDS} must be a number of seconds, got {raw:?}"))
                })?;
                if secs == 0 {
                    return Err(Error::InvalidConfig(format!(
                        "{ENV_RESYNC_SECONDS} must be greater than zero"
                    )));
                }
                Duration::from_secs(secs)
            }
            None => defaults.resync_interval,
        };

        Ok(Self {
            chart_dir: get(ENV_CHART_DIR).map(PathBuf::from).unwrap_or(defaults.chart_dir),
            launcher_namespace: get(ENV_LAUNCHER_NAMESPACE).unwrap_or(defaults.launcher_namespace),
            watch_namespace: get(ENV_WATCH_NAMESPACE),
            resync_interval,
        })
    }
}
