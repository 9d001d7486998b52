//! Conditions and the status tree recorded on a ControlPlane
//!
//! Every level of the tree (control plane, component, resource) carries a
//! `StatusType`: an observed generation plus a list of conditions that is
//! unique by condition type.

use std::fmt;

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::resource_key::ResourceKey;

/// Condition reasons written by the controller
pub mod reasons {
    pub const INSTALL_SUCCESSFUL: &str = "InstallSuccessful";
    pub const INSTALL_ERROR: &str = "InstallError";
    pub const RECONCILE_SUCCESSFUL: &str = "ReconcileSuccessful";
    pub const RECONCILE_ERROR: &str = "ReconcileError";
    pub const DELETION_SUCCESSFUL: &str = "DeletionSuccessful";
    pub const DELETION_ERROR: &str = "DeletionError";
    pub const UNINSTALL_SUCCESSFUL: &str = "UninstallSuccessful";
    pub const UNINSTALL_ERROR: &str = "UninstallError";
    pub const UPDATE_SUCCESSFUL: &str = "UpdateSuccessful";
    pub const UPDATE_ERROR: &str = "UpdateError";
}

/// Type of a condition
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionType {
    /// The controller has accepted and rendered the instance
    Initialized,
    /// The resources have been installed
    Installed,
    /// The resources match the desired state
    Reconciled,
    /// Any other condition type; carried but not interpreted
    Other(String),
}

impl ConditionType {
    pub fn as_str(&self) -> &str {
        match self {
            ConditionType::Initialized => "Initialized",
            ConditionType::Installed => "Installed",
            ConditionType::Reconciled => "Reconciled",
            ConditionType::Other(other) => other,
        }
    }
}

impl From<String> for ConditionType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Initialized" => ConditionType::Initialized,
            "Installed" => ConditionType::Installed,
            "Reconciled" => ConditionType::Reconciled,
            _ => ConditionType::Other(value),
        }
    }
}

impl From<ConditionType> for String {
    fn from(value: ConditionType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a condition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    pub fn from_bool(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// A typed, timestamped status fact
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    #[schemars(with = "String")]
    pub type_: ConditionType,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// RFC 3339 time of the last status change
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_transition_time: String,
}

impl Condition {
    pub fn new(type_: ConditionType, status: ConditionStatus, reason: &str, message: &str) -> Self {
        Self {
            type_,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: String::new(),
        }
    }

    /// Placeholder returned for absent conditions
    pub fn unknown(type_: ConditionType) -> Self {
        Self::new(type_, ConditionStatus::Unknown, "", "")
    }
}

/// Generation and conditions of one status node
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusType {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub observed_generation: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

impl StatusType {
    pub fn new() -> Self {
        Self::default()
    }

    /// Condition of the given type, or an Unknown placeholder
    pub fn get_condition(&self, type_: &ConditionType) -> Condition {
        self.conditions
            .iter()
            .find(|c| &c.type_ == type_)
            .cloned()
            .unwrap_or_else(|| Condition::unknown(type_.clone()))
    }

    /// Upsert a condition, stamping the transition time with the current time
    pub fn set_condition(&mut self, condition: Condition) {
        self.set_condition_at(condition, &Utc::now().to_rfc3339());
    }

    /// Upsert a condition using `now` as the transition time when the status changes.
    ///
    /// An unchanged status keeps the previous transition time.
    pub fn set_condition_at(&mut self, mut condition: Condition, now: &str) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time.clone()
                } else {
                    now.to_string()
                };
                *existing = condition;
            }
            None => {
                condition.last_transition_time = now.to_string();
                self.conditions.push(condition);
            }
        }
    }

    pub fn remove_condition(&mut self, type_: &ConditionType) {
        self.conditions.retain(|c| &c.type_ != type_);
    }
}

/// Condition access on a status node that may not exist.
///
/// Reads on an absent node yield Unknown placeholders; writes are no-ops.
pub trait OptionalStatus {
    fn get_condition(&self, type_: &ConditionType) -> Condition;
}

pub trait OptionalStatusMut {
    fn set_condition(&mut self, condition: Condition);
    fn remove_condition(&mut self, type_: &ConditionType);
}

impl OptionalStatus for Option<&StatusType> {
    fn get_condition(&self, type_: &ConditionType) -> Condition {
        match self {
            Some(status) => status.get_condition(type_),
            None => Condition::unknown(type_.clone()),
        }
    }
}

impl OptionalStatusMut for Option<&mut StatusType> {
    fn set_condition(&mut self, condition: Condition) {
        if let Some(status) = self {
            status.set_condition(condition);
        }
    }

    fn remove_condition(&mut self, type_: &ConditionType) {
        if let Some(status) = self {
            status.remove_condition(type_);
        }
    }
}

/// Status of one managed object
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[schemars(with = "String")]
    pub resource: ResourceKey,

    #[serde(flatten)]
    pub status: StatusType,
}

impl ResourceStatus {
    pub fn new(resource: ResourceKey) -> Self {
        Self {
            resource,
            status: StatusType::new(),
        }
    }
}

/// Status of one logical component and the objects it manages
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Component name
    pub name: String,

    #[serde(flatten)]
    pub status: StatusType,

    /// Per-object status in creation order, unique by key
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceStatus>,
}

impl ComponentStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn resource(&self, key: &ResourceKey) -> Option<&ResourceStatus> {
        self.resources.iter().find(|r| &r.resource == key)
    }

    pub fn resource_mut(&mut self, key: &ResourceKey) -> Option<&mut ResourceStatus> {
        self.resources.iter_mut().find(|r| &r.resource == key)
    }

    /// Replace the entry with the same key in place, or append it
    pub fn upsert_resource(&mut self, status: ResourceStatus) {
        match self.resource_mut(&status.resource) {
            Some(existing) => *existing = status,
            None => self.resources.push(status),
        }
    }

    pub fn resource_keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.resources.iter().map(|r| &r.resource)
    }

    /// Entries whose key refers to the given kind
    pub fn find_resources_of_kind(&self, kind: &str) -> Vec<&ResourceStatus> {
        self.resources
            .iter()
            .filter(|r| r.resource.kind() == kind)
            .collect()
    }
}

/// Status subresource of a ControlPlane
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneStatus {
    #[serde(flatten)]
    pub status: StatusType,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentStatus>,
}

impl ControlPlaneStatus {
    pub fn component(&self, name: &str) -> Option<&ComponentStatus> {
        self.components.iter().find(|c| c.name == name)
    }
}
