//! Dynamic manifest documents with typed accessors
//!
//! Rendered manifests are schema-less. `Document` wraps one decoded YAML
//! document and exposes typed lookups that keep "absent" and
//! "present with the wrong type" apart.

use kube::api::DynamicObject;
use serde_json::{Map, Value};

use crate::controller::error::{Error, Result};

/// Outcome of a typed field lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field<T> {
    Absent,
    WrongType { found: &'static str },
    Present(T),
}

impl<T> Field<T> {
    pub fn present(self) -> Option<T> {
        match self {
            Field::Present(value) => Some(value),
            _ => None,
        }
    }

    /// Convert to a result, reporting both failure modes
    pub fn require(self, path: &[&str], expected: &'static str) -> Result<T> {
        match self {
            Field::Present(value) => Ok(value),
            Field::Absent => Err(Error::MissingField(path.join("."))),
            Field::WrongType { found } => Err(Error::UnexpectedType {
                field: path.join("."),
                expected,
                found,
            }),
        }
    }

    /// Like `require`, but an absent field yields `None`
    pub fn optional(self, path: &[&str], expected: &'static str) -> Result<Option<T>> {
        match self {
            Field::Absent => Ok(None),
            other => other.require(path, expected).map(Some),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

/// One decoded manifest document
#[derive(Debug, Clone, PartialEq)]
pub struct Document(Value);

impl Document {
    /// Decode one YAML document; `None` for empty or comment-only input
    pub fn parse(raw: &str) -> Result<Option<Self>> {
        let value: Value = serde_yaml::from_str(raw)?;
        Ok(match value {
            Value::Null => None,
            value => Some(Self(value)),
        })
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    fn lookup(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.0, |current, segment| current.as_object()?.get(*segment))
    }

    fn typed<'a, T>(&'a self, path: &[&str], extract: impl Fn(&'a Value) -> Option<T>) -> Field<T> {
        match self.lookup(path) {
            None | Some(Value::Null) => Field::Absent,
            Some(value) => match extract(value) {
                Some(typed) => Field::Present(typed),
                None => Field::WrongType {
                    found: type_name(value),
                },
            },
        }
    }

    pub fn get_str(&self, path: &[&str]) -> Field<&str> {
        self.typed(path, Value::as_str)
    }

    pub fn get_bool(&self, path: &[&str]) -> Field<bool> {
        self.typed(path, Value::as_bool)
    }

    pub fn get_i64(&self, path: &[&str]) -> Field<i64> {
        self.typed(path, Value::as_i64)
    }

    pub fn get_map(&self, path: &[&str]) -> Field<&Map<String, Value>> {
        self.typed(path, Value::as_object)
    }

    pub fn get_slice(&self, path: &[&str]) -> Field<&[Value]> {
        self.typed(path, |value| value.as_array().map(Vec::as_slice))
    }

    pub fn kind(&self) -> Result<&str> {
        self.get_str(&["kind"]).require(&["kind"], "string")
    }

    pub fn api_version(&self) -> Result<&str> {
        self.get_str(&["apiVersion"]).require(&["apiVersion"], "string")
    }

    /// A list wrapper whose items are managed individually
    pub fn is_list(&self) -> bool {
        match self.kind() {
            Ok("List") => true,
            Ok(kind) => {
                kind.ends_with("List") && !matches!(self.get_slice(&["items"]), Field::Absent)
            }
            Err(_) => false,
        }
    }

    /// Decode into cluster objects, one entry per managed object.
    ///
    /// List wrappers are flattened recursively and every item decodes on
    /// its own: a missing `kind`/`apiVersion` fails only that entry. A
    /// wrongly-typed field is `Error::UnexpectedType` and fails the whole
    /// document.
    pub fn into_entries(self) -> Result<Vec<Result<DynamicObject>>> {
        let mut entries = Vec::new();
        self.collect_entries(&mut entries)?;
        Ok(entries)
    }

    /// Like `into_entries`, failing on the first bad entry
    pub fn into_objects(self) -> Result<Vec<DynamicObject>> {
        self.into_entries()?.into_iter().collect()
    }

    fn collect_entries(self, out: &mut Vec<Result<DynamicObject>>) -> Result<()> {
        if self.is_list() {
            let items = self
                .get_slice(&["items"])
                .optional(&["items"], "array")?
                .unwrap_or_default();
            for item in items {
                Document(item.clone()).collect_entries(out)?;
            }
            return Ok(());
        }
        match self.into_object() {
            Err(e) if e.aborts_pass() => Err(e),
            entry => {
                out.push(entry);
                Ok(())
            }
        }
    }

    fn into_object(self) -> Result<DynamicObject> {
        self.kind()?;
        self.api_version()?;
        self.get_map(&["metadata"]).optional(&["metadata"], "map")?;
        let mut value = self.0;
        if let Value::Object(map) = &mut value
            && map.get("metadata").is_none_or(Value::is_null)
        {
            map.insert("metadata".to_string(), Value::Object(Map::new()));
        }
        Ok(serde_json::from_value(value)?)
    }
}
