pub mod acquisition;
pub mod client;
pub mod error;
pub mod models;
pub mod openliga;
pub mod pipeline;
pub mod store;
pub mod transform;

pub use error::{ApiError, ApiResult};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Keyword arguments an entity is constructed from: field name → value.
pub type Kwargs = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Values — the data flowing through transformation chains
// ---------------------------------------------------------------------------

/// A node of a decoded source document, or something derived from one.
///
/// Raw JSON is converted into this shape once, on entry to the pipeline.
/// Chains may then produce scalars, sub-trees, parsed dates or references
/// to entities already handed to the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Entity(EntityId),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Entity(_) => "entity",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            Value::Entity(id) => Some(*id),
            _ => None,
        }
    }

    /// Look up a named member of a map value.
    pub fn member(&self, name: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(name))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => {
                Value::Map(fields.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::Entity(id)
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// The name of an entity kind ("team", "match", ...). Pipelines register one
/// transformation map per kind and stores index entities by it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Kind(Cow<'static, str>);

impl Kind {
    pub const fn new(name: &'static str) -> Self {
        Kind(Cow::Borrowed(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned identity of a persisted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A target record built from kwargs. Owned by the store once added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    kind: Kind,
    fields: Kwargs,
}

impl Entity {
    pub fn new(kind: Kind, fields: Kwargs) -> Self {
        Self { kind, fields }
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn fields(&self) -> &Kwargs {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_owned(), value.into());
    }

    /// True when every criterion is present on this entity with an equal value.
    pub fn matches(&self, criteria: &Kwargs) -> bool {
        criteria
            .iter()
            .all(|(field, expected)| self.fields.get(field) == Some(expected))
    }

    /// Append `target` to the list-valued `field` unless it is already there.
    /// Returns whether the link was added.
    pub fn link(&mut self, field: &str, target: EntityId) -> bool {
        let slot = self
            .fields
            .entry(field.to_owned())
            .or_insert_with(|| Value::List(Vec::new()));
        if slot.is_null() {
            *slot = Value::List(Vec::new());
        }
        match slot {
            Value::List(items) if !items.contains(&Value::Entity(target)) => {
                items.push(Value::Entity(target));
                true
            }
            _ => false,
        }
    }

    pub fn require(&self, field: &str) -> ApiResult<&Value> {
        self.fields
            .get(field)
            .ok_or_else(|| ApiError::Lookup(format!("{} has no field '{field}'", self.kind)))
    }

    pub fn int(&self, field: &str) -> ApiResult<i64> {
        let value = self.require(field)?;
        value.as_i64().ok_or_else(|| self.mismatch(field, "int", value))
    }

    pub fn text(&self, field: &str) -> ApiResult<&str> {
        let value = self.require(field)?;
        value.as_str().ok_or_else(|| self.mismatch(field, "text", value))
    }

    /// Like [`Entity::text`], but absent and null fields read as `None`.
    pub fn optional_text(&self, field: &str) -> ApiResult<Option<&str>> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| self.mismatch(field, "text", value)),
        }
    }

    pub fn optional_int(&self, field: &str) -> ApiResult<Option<i64>> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.mismatch(field, "int", value)),
        }
    }

    pub fn flag(&self, field: &str) -> ApiResult<bool> {
        let value = self.require(field)?;
        value.as_bool().ok_or_else(|| self.mismatch(field, "bool", value))
    }

    pub fn datetime(&self, field: &str) -> ApiResult<NaiveDateTime> {
        match self.require(field)? {
            Value::DateTime(dt) => Ok(*dt),
            other => Err(self.mismatch(field, "datetime", other)),
        }
    }

    pub fn reference(&self, field: &str) -> ApiResult<EntityId> {
        let value = self.require(field)?;
        value.as_entity().ok_or_else(|| self.mismatch(field, "entity", value))
    }

    /// Entity references held in a list-valued field. Absent means empty.
    pub fn references(&self, field: &str) -> ApiResult<Vec<EntityId>> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::List(items)) => items
                .iter()
                .map(|item| item.as_entity().ok_or_else(|| self.mismatch(field, "entity", item)))
                .collect(),
            Some(other) => Err(self.mismatch(field, "list", other)),
        }
    }

    fn mismatch(&self, field: &str, expected: &str, found: &Value) -> ApiError {
        ApiError::Coercion(format!(
            "{}.{field}: expected {expected}, found {}",
            self.kind,
            found.type_name()
        ))
    }
}
