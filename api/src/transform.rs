//! Combinators and the chains built from them.
//!
//! A [`Chain`] is one field's transformation: an ordered list of steps, each
//! receiving the previous step's output. Chains are composed with
//! [`Chain::then`], which always flattens, so `a.then(b).then(c)` and
//! `a.then(b.then(c))` hold the same three steps in the same order.
//!
//! ```ignore
//! let host_points = get("MatchResults")
//!     .then(filter(is_final_result))
//!     .then(when(non_empty, get(0).then(get("PointsTeam1"))).otherwise(constant(0)));
//! ```
use crate::pipeline::{Pipeline, Session};
use crate::{ApiError, ApiResult, Value};
use chrono::{DateTime, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A single named unit of transformation over `(pipeline, session, value)`.
///
/// Implementations capture their arguments at construction and must not
/// depend on anything but those arguments and the input they are given.
pub trait Combinator: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, pipeline: &Pipeline, session: &mut Session<'_>, value: Value)
    -> ApiResult<Value>;
}

type Func = Arc<dyn Fn(Value) -> ApiResult<Value> + Send + Sync>;
type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct Chain {
    steps: Vec<Arc<dyn Combinator>>,
}

impl Chain {
    /// A chain holding a single step.
    pub fn of(step: impl Combinator + 'static) -> Self {
        Self { steps: vec![Arc::new(step)] }
    }

    /// The empty chain; passes its input through unchanged.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Append `next`'s steps after this chain's, yielding a new flat chain.
    pub fn then(self, next: impl Into<Chain>) -> Chain {
        let mut steps = self.steps;
        steps.extend(next.into().steps);
        Chain { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn run(
        &self,
        pipeline: &Pipeline,
        session: &mut Session<'_>,
        value: Value,
    ) -> ApiResult<Value> {
        self.steps
            .iter()
            .try_fold(value, |acc, step| step.apply(pipeline, session, acc))
    }
}

impl Combinator for Chain {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn apply(
        &self,
        pipeline: &Pipeline,
        session: &mut Session<'_>,
        value: Value,
    ) -> ApiResult<Value> {
        self.run(pipeline, session, value)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chain({})", self.names().join(" | "))
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Index(usize),
    Name(String),
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_owned())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "[{i}]"),
            Key::Name(name) => write!(f, "'{name}'"),
        }
    }
}

struct Get {
    key: Key,
}

impl Combinator for Get {
    fn name(&self) -> &'static str {
        "get"
    }

    fn apply(&self, _: &Pipeline, _: &mut Session<'_>, value: Value) -> ApiResult<Value> {
        match (&self.key, value) {
            (Key::Index(i), Value::List(items)) => {
                let len = items.len();
                items
                    .into_iter()
                    .nth(*i)
                    .ok_or_else(|| ApiError::Lookup(format!("index {i} out of range for {len} items")))
            }
            (Key::Name(name), Value::Map(mut fields)) => fields
                .remove(name)
                .ok_or_else(|| ApiError::Lookup(format!("key '{name}' not found"))),
            (key, other) => Err(ApiError::Coercion(format!(
                "cannot index {} with {key}",
                other.type_name()
            ))),
        }
    }
}

/// `value[key]`. Absent keys are errors: required fields are not optional.
pub fn get(key: impl Into<Key>) -> Chain {
    Chain::of(Get { key: key.into() })
}

// ---------------------------------------------------------------------------
// Apply-function, constant, attribute
// ---------------------------------------------------------------------------

struct Custom {
    func: Func,
}

impl Combinator for Custom {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn apply(&self, _: &Pipeline, _: &mut Session<'_>, value: Value) -> ApiResult<Value> {
        (self.func)(value)
    }
}

/// Apply an arbitrary function (parsing, coercion, fan-out...).
pub fn custom<F>(func: F) -> Chain
where
    F: Fn(Value) -> ApiResult<Value> + Send + Sync + 'static,
{
    Chain::of(Custom { func: Arc::new(func) })
}

struct Constant {
    value: Value,
}

impl Combinator for Constant {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn apply(&self, _: &Pipeline, _: &mut Session<'_>, _: Value) -> ApiResult<Value> {
        Ok(self.value.clone())
    }
}

pub fn constant(value: impl Into<Value>) -> Chain {
    Chain::of(Constant { value: value.into() })
}

struct Attr {
    field: String,
}

impl Combinator for Attr {
    fn name(&self) -> &'static str {
        "attr"
    }

    fn apply(&self, _: &Pipeline, session: &mut Session<'_>, value: Value) -> ApiResult<Value> {
        match value {
            Value::Entity(id) => Ok(session.entity(id)?.require(&self.field)?.clone()),
            Value::List(_) | Value::Map(_) => Err(ApiError::Coercion(format!(
                "attribute '{}' requested on a {}",
                self.field,
                value.type_name()
            ))),
            other => Err(ApiError::Lookup(format!(
                "{} has no attribute '{}'",
                other.type_name(),
                self.field
            ))),
        }
    }
}

/// Read a field off an already materialized entity.
pub fn attr(field: &str) -> Chain {
    Chain::of(Attr { field: field.to_owned() })
}

// ---------------------------------------------------------------------------
// Sequence operations
// ---------------------------------------------------------------------------

fn expect_list(step: &str, value: Value) -> ApiResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(ApiError::Coercion(format!(
            "{step} expects a list, found {}",
            other.type_name()
        ))),
    }
}

struct Filter {
    pred: Predicate,
}

impl Combinator for Filter {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn apply(&self, _: &Pipeline, _: &mut Session<'_>, value: Value) -> ApiResult<Value> {
        let items = expect_list("filter", value)?;
        Ok(Value::List(items.into_iter().filter(|item| (self.pred)(item)).collect()))
    }
}

/// Keep the elements satisfying `pred`, in their original order.
pub fn filter<P>(pred: P) -> Chain
where
    P: Fn(&Value) -> bool + Send + Sync + 'static,
{
    Chain::of(Filter { pred: Arc::new(pred) })
}

struct Map {
    func: Func,
}

impl Combinator for Map {
    fn name(&self) -> &'static str {
        "map"
    }

    fn apply(&self, _: &Pipeline, _: &mut Session<'_>, value: Value) -> ApiResult<Value> {
        let items = expect_list("map", value)?;
        items
            .into_iter()
            .map(|item| (self.func)(item))
            .collect::<ApiResult<Vec<_>>>()
            .map(Value::List)
    }
}

/// Transform each element, preserving order and length.
pub fn map<F>(func: F) -> Chain
where
    F: Fn(Value) -> ApiResult<Value> + Send + Sync + 'static,
{
    Chain::of(Map { func: Arc::new(func) })
}

struct Gather {
    names: Vec<String>,
}

impl Combinator for Gather {
    fn name(&self) -> &'static str {
        "gather"
    }

    fn apply(&self, _: &Pipeline, _: &mut Session<'_>, value: Value) -> ApiResult<Value> {
        let Value::Map(mut fields) = value else {
            return Err(ApiError::Coercion(format!(
                "gather expects a map, found {}",
                value.type_name()
            )));
        };
        let mut gathered = BTreeMap::new();
        for name in &self.names {
            let v = fields
                .remove(name)
                .ok_or_else(|| ApiError::Lookup(format!("key '{name}' not found")))?;
            gathered.insert(name.clone(), v);
        }
        Ok(Value::Map(gathered))
    }
}

/// Project the named members out of a map into a new sub-record.
pub fn gather<I, S>(names: I) -> Chain
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Chain::of(Gather { names: names.into_iter().map(Into::into).collect() })
}

// ---------------------------------------------------------------------------
// Branching and fan-in
// ---------------------------------------------------------------------------

/// Dispatch on a predicate. Built with [`when`]; without an `otherwise`
/// branch a false predicate yields [`Value::Null`].
pub struct Conditional {
    pred: Predicate,
    then: Chain,
    otherwise: Option<Chain>,
}

impl Conditional {
    pub fn otherwise(self, chain: impl Into<Chain>) -> Self {
        Self { otherwise: Some(chain.into()), ..self }
    }
}

impl Combinator for Conditional {
    fn name(&self) -> &'static str {
        "when"
    }

    fn apply(
        &self,
        pipeline: &Pipeline,
        session: &mut Session<'_>,
        value: Value,
    ) -> ApiResult<Value> {
        if (self.pred)(&value) {
            self.then.run(pipeline, session, value)
        } else if let Some(otherwise) = &self.otherwise {
            otherwise.run(pipeline, session, value)
        } else {
            Ok(Value::Null)
        }
    }
}

impl From<Conditional> for Chain {
    fn from(conditional: Conditional) -> Self {
        Chain::of(conditional)
    }
}

pub fn when<P>(pred: P, then: impl Into<Chain>) -> Conditional
where
    P: Fn(&Value) -> bool + Send + Sync + 'static,
{
    Conditional { pred: Arc::new(pred), then: then.into(), otherwise: None }
}

struct Concat {
    branches: Vec<Chain>,
}

impl Combinator for Concat {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn apply(
        &self,
        pipeline: &Pipeline,
        session: &mut Session<'_>,
        value: Value,
    ) -> ApiResult<Value> {
        self.branches
            .iter()
            .map(|branch| branch.run(pipeline, session, value.clone()))
            .collect::<ApiResult<Vec<_>>>()
            .map(Value::List)
    }
}

/// Apply every branch to the same input and collect the results as a list.
pub fn concat(branches: impl IntoIterator<Item = Chain>) -> Chain {
    Chain::of(Concat { branches: branches.into_iter().collect() })
}

// ---------------------------------------------------------------------------
// Helpers for common custom steps and predicates
// ---------------------------------------------------------------------------

/// Parse an ISO-8601 timestamp. Offsets are normalized to UTC.
pub fn parse_datetime(value: Value) -> ApiResult<Value> {
    let Value::Text(raw) = value else {
        return Err(ApiError::Coercion(format!(
            "expected a timestamp string, found {}",
            value.type_name()
        )));
    };
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| DateTime::parse_from_rfc3339(&raw).map(|dt| dt.naive_utc()))
        .map(Value::DateTime)
        .map_err(|e| ApiError::Coercion(format!("invalid timestamp '{raw}': {e}")))
}

pub fn non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::List(items) => !items.is_empty(),
        Value::Map(fields) => !fields.is_empty(),
        Value::Text(s) => !s.is_empty(),
        _ => true,
    }
}

/// Predicate: the map has member `name` and it is not null.
pub fn has(name: &'static str) -> impl Fn(&Value) -> bool + Send + Sync + 'static {
    move |value| value.member(name).is_some_and(|v| !v.is_null())
}
