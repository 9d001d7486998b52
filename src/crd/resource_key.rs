//! Canonical identity for cluster objects
//!
//! A `ResourceKey` names one object by namespace, name, apiVersion and kind.
//! It serializes as a single delimited string so it can be used as a status
//! key, and encodes into a label-safe form for provenance labels.

use std::fmt;
use std::str::FromStr;

use kube::api::DynamicObject;
use kube::core::{GroupVersionKind, ObjectMeta, TypeMeta};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::controller::error::{Error, Result};

const NAMESPACE_SEPARATOR: char = '/';
const TYPE_SEPARATOR: char = '=';
const KIND_SEPARATOR: char = ',';
const LABEL_SEPARATOR: char = '_';

/// Maximum length of a Kubernetes label value
pub const MAX_LABEL_VALUE_LEN: usize = 63;

/// Identity of one cluster object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    namespace: String,
    name: String,
    api_version: String,
    kind: String,
}

impl ResourceKey {
    /// Build a key from its parts.
    ///
    /// Namespace and name may be empty (cluster-scoped or unnamed objects),
    /// but no part may contain a separator character.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        api_version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Result<Self> {
        let key = Self {
            namespace: namespace.into(),
            name: name.into(),
            api_version: api_version.into(),
            kind: kind.into(),
        };
        key.validate()?;
        Ok(key)
    }

    /// Key of a decoded manifest or live object
    pub fn from_object(object: &DynamicObject) -> Result<Self> {
        let types = object
            .types
            .as_ref()
            .ok_or(Error::MissingObjectKey("apiVersion/kind"))?;
        Self::new(
            object.metadata.namespace.clone().unwrap_or_default(),
            object.metadata.name.clone().unwrap_or_default(),
            types.api_version.clone(),
            types.kind.clone(),
        )
    }

    fn validate(&self) -> Result<()> {
        let separators = [NAMESPACE_SEPARATOR, TYPE_SEPARATOR, KIND_SEPARATOR];
        let offending = [
            ("namespace", &self.namespace),
            ("name", &self.name),
            ("kind", &self.kind),
        ]
        .into_iter()
        .find(|(_, value)| value.contains(separators));
        if let Some((field, value)) = offending {
            return Err(Error::InvalidResourceKey(format!(
                "{field} {value:?} contains a reserved character"
            )));
        }
        // apiVersion legitimately carries one '/' between group and version
        if self.api_version.contains([TYPE_SEPARATOR, KIND_SEPARATOR])
            || self.api_version.matches(NAMESPACE_SEPARATOR).count() > 1
        {
            return Err(Error::InvalidResourceKey(format!(
                "apiVersion {:?} is malformed",
                self.api_version
            )));
        }
        if self.api_version.is_empty() || self.kind.is_empty() {
            return Err(Error::InvalidResourceKey(
                "apiVersion and kind must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Namespace as an option, `None` for cluster-scoped keys
    pub fn namespace_opt(&self) -> Option<&str> {
        (!self.namespace.is_empty()).then_some(self.namespace.as_str())
    }

    /// Group/version/kind of the referenced object
    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = match self.api_version.split_once(NAMESPACE_SEPARATOR) {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        };
        GroupVersionKind::gvk(group, version, &self.kind)
    }

    /// Skeletal object carrying only the identifying fields
    pub fn to_object(&self) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: self.api_version.clone(),
                kind: self.kind.clone(),
            }),
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: self.namespace_opt().map(str::to_string),
                ..Default::default()
            },
            data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Encode for use as a label value: `namespace_name_kind`.
    ///
    /// `_` is not valid in namespaces, object names or kinds, so the
    /// encoding is unambiguous. The apiVersion is omitted; label values
    /// cannot carry `/`.
    pub fn to_label_value(&self) -> Result<String> {
        let value = format!(
            "{}{LABEL_SEPARATOR}{}{LABEL_SEPARATOR}{}",
            self.namespace, self.name, self.kind
        );
        let valid_chars = value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        let valid_ends = value.starts_with(|c: char| c.is_ascii_alphanumeric())
            && value.ends_with(|c: char| c.is_ascii_alphanumeric());
        if value.len() > MAX_LABEL_VALUE_LEN || !valid_chars || !valid_ends {
            return Err(Error::InvalidConfig(format!(
                "owner identity {value:?} is not a valid label value"
            )));
        }
        Ok(value)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{NAMESPACE_SEPARATOR}{}{TYPE_SEPARATOR}{}{KIND_SEPARATOR}{}",
            self.namespace, self.name, self.api_version, self.kind
        )
    }
}

impl FromStr for ResourceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || Error::InvalidResourceKey(format!("malformed resource key {s:?}"));
        let (object, kind_ref) = s.split_once(TYPE_SEPARATOR).ok_or_else(malformed)?;
        let (namespace, name) = object.split_once(NAMESPACE_SEPARATOR).ok_or_else(malformed)?;
        let (api_version, kind) = kind_ref.split_once(KIND_SEPARATOR).ok_or_else(malformed)?;
        Self::new(namespace, name, api_version, kind)
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
