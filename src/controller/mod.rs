pub mod component;
pub mod context;
pub mod error;
pub mod hooks;
pub mod instance;
pub mod lifecycle;
pub mod object;
pub mod pruner;
pub mod reconciler;
pub mod status;

pub use context::Context;
pub use error::{AggregateError, BackoffConfig, Error, ErrorContext, Result};
pub use hooks::{NoopHooks, ObjectHooks, StandardLabels};
pub use instance::InstanceReconciler;
pub use lifecycle::{FINALIZER, LifecycleState};
pub use object::{GENERATION_LABEL, OWNER_LABEL, should_update};
pub use pruner::{CLUSTER_PRUNE_KINDS, NAMESPACED_PRUNE_KINDS, PruneKind, Sweep, prune_plan};
pub use reconciler::{ReconcileOutcome, error_policy, reconcile, reconcile_instance};
