//! Reconciliation entry points for ControlPlane resources
//!
//! `reconcile_instance` drives the finalizer lifecycle for one instance key.
//! `reconcile` and `error_policy` adapt it to the kube-runtime controller.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::instance::InstanceReconciler;
use crate::controller::lifecycle::{LifecycleState, with_finalizer, without_finalizer};
use crate::controller::status::update_reconcile_status;
use crate::crd::ControlPlane;

/// Delay before re-checking after a finalizer change
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// What the scheduling layer should do after a reconcile request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing left to do until the instance changes
    Done,
    /// Fully reconciled; check again after the resync interval
    Synced,
    /// A finalizer changed; run again right away
    Requeue,
}

impl ReconcileOutcome {
    pub fn should_requeue(&self) -> bool {
        matches!(self, ReconcileOutcome::Requeue)
    }

    pub fn action(&self, resync_interval: Duration) -> Action {
        match self {
            ReconcileOutcome::Done => Action::await_change(),
            ReconcileOutcome::Synced => Action::requeue(resync_interval),
            ReconcileOutcome::Requeue => Action::requeue(FINALIZER_REQUEUE),
        }
    }
}

/// Reconcile the instance identified by `namespace`/`name`
pub async fn reconcile_instance(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<ReconcileOutcome> {
    let instance = ctx.control_planes.get(namespace, name).await?;
    let state = LifecycleState::of(instance.as_ref());
    debug!(state = %state, "Resolved lifecycle state");

    let Some(instance) = instance else {
        return Ok(ReconcileOutcome::Done);
    };

    match state {
        LifecycleState::Absent | LifecycleState::DeletingUnfinalized => Ok(ReconcileOutcome::Done),
        LifecycleState::Unfinalized => {
            ctx.control_planes
                .set_finalizers(&instance, with_finalizer(&instance))
                .await?;
            info!("Added finalizer");
            Ok(ReconcileOutcome::Requeue)
        }
        LifecycleState::Active => {
            let reconciler = match InstanceReconciler::new(ctx, &instance) {
                Ok(reconciler) => reconciler,
                Err(e) => {
                    record_invalid(ctx, &instance, &e).await;
                    return Err(e);
                }
            };
            reconciler.reconcile().await?;
            info!("Reconciliation completed successfully");
            Ok(ReconcileOutcome::Synced)
        }
        LifecycleState::Deleting => {
            info!("Cleaning up deleted ControlPlane");
            match InstanceReconciler::new(ctx, &instance) {
                Ok(reconciler) => {
                    if let Err(e) = reconciler.cleanup().await {
                        warn!(error = %e, "Cleanup incomplete, removing finalizer anyway");
                    }
                }
                Err(e) => warn!(error = %e, "Cannot clean up, removing finalizer anyway"),
            }

            // cleanup wrote status, so the cached resourceVersion is stale
            let Some(latest) = ctx.control_planes.get(namespace, name).await? else {
                return Ok(ReconcileOutcome::Done);
            };
            ctx.control_planes
                .set_finalizers(&latest, without_finalizer(&latest))
                .await?;
            info!("Removed finalizer");
            Ok(ReconcileOutcome::Requeue)
        }
    }
}

/// Report an instance the reconciler cannot work with
async fn record_invalid(ctx: &Context, instance: &ControlPlane, err: &Error) {
    error!(error = %err, "ControlPlane cannot be reconciled");
    let mut status = instance.status.clone().unwrap_or_default();
    update_reconcile_status(&mut status.status, Some(err));
    if let Err(e) = ctx.control_planes.update_status(instance, &status).await {
        warn!(error = %e, "Failed to update ControlPlane status");
    }
}

/// Main reconciliation function
#[instrument(skip(instance, ctx), fields(name = %instance.name_any(), namespace = instance.namespace().unwrap_or_default()))]
pub async fn reconcile(instance: Arc<ControlPlane>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = instance.namespace().unwrap_or_default();
    let name = instance.name_any();
    let start = Instant::now();

    info!("Reconciling ControlPlane");
    let result = reconcile_instance(&ctx, &namespace, &name).await;

    if let Some(state) = &ctx.health_state {
        state
            .metrics
            .record_reconcile(&namespace, &name, start.elapsed().as_secs_f64());
    }

    match result {
        Ok(outcome) => {
            ctx.reset_failures(&format!("{namespace}/{name}"));
            if let Some(state) = &ctx.health_state {
                let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
                state.last_reconcile.store(now, Ordering::Relaxed);
            }
            Ok(outcome.action(ctx.config.resync_interval))
        }
        Err(e) => {
            error!(error = %e, "Reconciliation failed");
            if let Some(state) = &ctx.health_state {
                state.metrics.record_error(&namespace, &name);
            }
            Err(e)
        }
    }
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(instance: Arc<ControlPlane>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = format!(
        "{}/{}",
        instance.namespace().unwrap_or_default(),
        instance.name_any()
    );
    let attempt = ctx.record_failure(&key, error).saturating_sub(1);
    let delay = BackoffConfig::default().delay_for_error(error, attempt);

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {}, requeuing in {:?} (attempt {})",
            key, error, delay, attempt
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} for manual intervention",
            key, error, delay
        );
    }

    Action::requeue(delay)
}
