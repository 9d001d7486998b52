//! Condition updates for reconcile, delete and uninstall outcomes
//!
//! These functions are the only writers of Installed/Reconciled conditions,
//! so every level of the status tree reports outcomes the same way.

use crate::controller::error::Error;
use crate::crd::{Condition, ConditionStatus, ConditionType, StatusType, reasons};

fn message(err: Option<&Error>) -> String {
    err.map(ToString::to_string).unwrap_or_default()
}

/// Record the outcome of creating or updating.
///
/// The first success marks the node installed; a failure before anything
/// was installed marks the install as failed.
pub fn update_reconcile_status(status: &mut StatusType, err: Option<&Error>) {
    let installed = status.get_condition(&ConditionType::Installed).status;
    match err {
        None if installed != ConditionStatus::True => {
            status.set_condition(Condition::new(
                ConditionType::Installed,
                ConditionStatus::True,
                reasons::INSTALL_SUCCESSFUL,
                "",
            ));
            status.set_condition(Condition::new(
                ConditionType::Reconciled,
                ConditionStatus::True,
                reasons::INSTALL_SUCCESSFUL,
                "",
            ));
        }
        None => {
            status.set_condition(Condition::new(
                ConditionType::Reconciled,
                ConditionStatus::True,
                reasons::RECONCILE_SUCCESSFUL,
                "",
            ));
        }
        Some(_) if installed == ConditionStatus::Unknown => {
            let message = message(err);
            status.set_condition(Condition::new(
                ConditionType::Installed,
                ConditionStatus::False,
                reasons::INSTALL_ERROR,
                &message,
            ));
            status.set_condition(Condition::new(
                ConditionType::Reconciled,
                ConditionStatus::False,
                reasons::INSTALL_ERROR,
                &message,
            ));
        }
        Some(_) => {
            status.set_condition(Condition::new(
                ConditionType::Reconciled,
                ConditionStatus::False,
                reasons::RECONCILE_ERROR,
                &message(err),
            ));
        }
    }
}

/// Record the outcome of deleting one object.
///
/// Installed goes False either way; Reconciled tells success from failure.
pub fn update_delete_status(status: &mut StatusType, err: Option<&Error>) {
    let (reconciled, reason) = match err {
        None => (ConditionStatus::True, reasons::DELETION_SUCCESSFUL),
        Some(_) => (ConditionStatus::False, reasons::DELETION_ERROR),
    };
    let message = message(err);
    status.set_condition(Condition::new(
        ConditionType::Installed,
        ConditionStatus::False,
        reason,
        &message,
    ));
    status.set_condition(Condition::new(
        ConditionType::Reconciled,
        reconciled,
        reason,
        &message,
    ));
}

/// Record the outcome of decommissioning a whole component
pub fn update_uninstall_status(status: &mut StatusType, err: Option<&Error>) {
    let reason = match err {
        None => reasons::UNINSTALL_SUCCESSFUL,
        Some(_) => reasons::UNINSTALL_ERROR,
    };
    let message = message(err);
    for type_ in [ConditionType::Installed, ConditionType::Reconciled] {
        status.set_condition(Condition::new(type_, ConditionStatus::False, reason, &message));
    }
}

/// Record whether the instance could be rendered
pub fn update_initialized_status(status: &mut StatusType, err: Option<&Error>) {
    let (value, reason) = match err {
        None => (ConditionStatus::True, reasons::RECONCILE_SUCCESSFUL),
        Some(_) => (ConditionStatus::False, reasons::RECONCILE_ERROR),
    };
    status.set_condition(Condition::new(
        ConditionType::Initialized,
        value,
        reason,
        &message(err),
    ));
}

/// Whether a stale object still has to be deleted.
///
/// Objects recorded as not installed are left alone, except for failed
/// deletions, which are retried.
pub fn needs_deletion(status: &StatusType) -> bool {
    let installed = status.get_condition(&ConditionType::Installed);
    installed.status != ConditionStatus::False || installed.reason == reasons::DELETION_ERROR
}
