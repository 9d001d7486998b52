use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kube::Client;

use crate::client::{ClusterClient, ControlPlaneApi, KubeClusterClient, KubeControlPlaneApi};
use crate::config::OperatorConfig;
use crate::controller::error::{Error, ErrorContext};
use crate::controller::hooks::{NoopHooks, ObjectHooks};
use crate::health::{HealthState, ObjectOperation};
use crate::manifest::ManifestRenderer;

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Access to managed objects (trait object for testability)
    pub cluster: Arc<dyn ClusterClient>,
    /// Access to the ControlPlane instances
    pub control_planes: Arc<dyn ControlPlaneApi>,
    pub renderer: Arc<dyn ManifestRenderer>,
    pub hooks: Arc<dyn ObjectHooks>,
    pub config: Arc<OperatorConfig>,
    pub health_state: Option<Arc<HealthState>>,
    /// Consecutive failures per instance, keyed by `namespace/name`
    failures: Arc<Mutex<HashMap<String, ErrorContext>>>,
}

impl Context {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        control_planes: Arc<dyn ControlPlaneApi>,
        renderer: Arc<dyn ManifestRenderer>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            cluster,
            control_planes,
            renderer,
            hooks: Arc::new(NoopHooks),
            config: Arc::new(config),
            health_state: None,
            failures: Arc::default(),
        }
    }

    /// Context backed by the API server
    pub fn from_client(
        client: Client,
        renderer: Arc<dyn ManifestRenderer>,
        config: OperatorConfig,
    ) -> Self {
        Self::new(
            Arc::new(KubeClusterClient::new(client.clone())),
            Arc::new(KubeControlPlaneApi::new(client)),
            renderer,
            config,
        )
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ObjectHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_health_state(mut self, health_state: Option<Arc<HealthState>>) -> Self {
        self.health_state = health_state;
        self
    }

    pub(crate) fn record_operation(&self, operation: ObjectOperation) {
        if let Some(state) = &self.health_state {
            state.metrics.record_operation(operation);
        }
    }

    /// Count a failure for an instance; returns the consecutive failure count
    pub fn record_failure(&self, instance: &str, error: &Error) -> u32 {
        let Ok(mut failures) = self.failures.lock() else {
            return 0;
        };
        let entry = failures.entry(instance.to_string()).or_default();
        entry.record_error(error);
        entry.consecutive_errors
    }

    pub fn reset_failures(&self, instance: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(instance);
        }
    }

    pub fn consecutive_failures(&self, instance: &str) -> u32 {
        self.failures
            .lock()
            .ok()
            .and_then(|failures| failures.get(instance).map(|f| f.consecutive_errors))
            .unwrap_or(0)
    }
}
