pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod manifest;

pub use config::OperatorConfig;
pub use controller::{
    BackoffConfig, Context, Error, FINALIZER, ReconcileOutcome, Result, error_policy, reconcile,
    reconcile_instance,
};
pub use crd::{ControlPlane, ControlPlaneSpec, ControlPlaneStatus, ResourceKey};
pub use health::{HealthState, Metrics};

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};

/// Run the ControlPlane controller until its event stream ends.
///
/// Watches a single namespace when the context's configuration names one,
/// cluster-wide otherwise.
pub async fn run_controller(client: Client, ctx: Context) {
    let namespace = ctx.config.watch_namespace.clone();
    tracing::info!(
        "Starting controller for ControlPlane resources (scope: {})",
        namespace.as_deref().unwrap_or("cluster-wide")
    );

    if let Some(state) = &ctx.health_state {
        state.set_ready(true).await;
    }

    let control_planes: Api<ControlPlane> = match namespace.as_deref() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    // Use any_semantic() for more reliable resource discovery
    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(control_planes, watcher_config)
        .run(reconcile, error_policy, Arc::new(ctx))
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Watch events can still arrive for an instance that was just deleted
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    tracing::error!("Controller stream ended unexpectedly");
}
