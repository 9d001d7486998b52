//! Finalizer lifecycle of a ControlPlane
//!
//! Every reconcile request starts by classifying the instance into one of
//! these states. Only `Active` runs the full reconciliation; the other
//! states either manage the finalizer or do nothing.

use std::fmt;

use crate::crd::ControlPlane;

/// Finalizer that guarantees cleanup runs before the instance disappears
pub const FINALIZER: &str = "mesh.operator.io/finalizer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// The instance does not exist
    Absent,
    /// The instance exists but the finalizer has not been added yet
    Unfinalized,
    /// The instance exists and is finalized; reconcile normally
    Active,
    /// Marked for deletion and our finalizer is already gone
    DeletingUnfinalized,
    /// Marked for deletion and waiting for our cleanup
    Deleting,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Absent => write!(f, "Absent"),
            LifecycleState::Unfinalized => write!(f, "Unfinalized"),
            LifecycleState::Active => write!(f, "Active"),
            LifecycleState::DeletingUnfinalized => write!(f, "DeletingUnfinalized"),
            LifecycleState::Deleting => write!(f, "Deleting"),
        }
    }
}

impl LifecycleState {
    pub fn of(instance: Option<&ControlPlane>) -> Self {
        let Some(instance) = instance else {
            return LifecycleState::Absent;
        };
        let deleting = instance.metadata.deletion_timestamp.is_some();
        match (deleting, has_finalizer(instance)) {
            (false, false) => LifecycleState::Unfinalized,
            (false, true) => LifecycleState::Active,
            (true, false) => LifecycleState::DeletingUnfinalized,
            (true, true) => LifecycleState::Deleting,
        }
    }

    /// Nothing to do in this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Absent | LifecycleState::DeletingUnfinalized
        )
    }
}

pub fn has_finalizer(instance: &ControlPlane) -> bool {
    instance
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|name| name == FINALIZER))
}

/// Finalizer list with ours appended
pub fn with_finalizer(instance: &ControlPlane) -> Vec<String> {
    let mut finalizers = instance.metadata.finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|name| name == FINALIZER) {
        finalizers.push(FINALIZER.to_string());
    }
    finalizers
}

/// Finalizer list with ours removed, others untouched
pub fn without_finalizer(instance: &ControlPlane) -> Vec<String> {
    instance
        .metadata
        .finalizers
        .iter()
        .flatten()
        .filter(|name| *name != FINALIZER)
        .cloned()
        .collect()
}
