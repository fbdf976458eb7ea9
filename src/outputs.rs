//! Stack outputs and the unavailable sentinel.
//!
//! Anything read from a resource that may not have been declared travels as
//! an [`Availability`]. Readers have to branch on it; there is no way to turn
//! an unavailable value into an empty string. When such a value reaches a
//! generated artifact (an output, an env file) it is written as
//! [`UNAVAILABLE`], so downstream tooling sees an explicit marker instead of
//! a blank.

use crate::graph::{GraphError, StackBuilder};
use crate::value::{AttrRef, Value};
use std::fmt;

/// Written wherever a value could not be produced.
pub const UNAVAILABLE: &str = "__UNAVAILABLE__";

/// A value that exists only if the resource behind it was declared.
#[derive(Debug, Clone, PartialEq)]
pub enum Availability<T> {
    Available(T),
    Unavailable,
}

impl<T> Availability<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn as_ref(&self) -> Availability<&T> {
        match self {
            Self::Available(v) => Availability::Available(v),
            Self::Unavailable => Availability::Unavailable,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Availability<U> {
        match self {
            Self::Available(v) => Availability::Available(f(v)),
            Self::Unavailable => Availability::Unavailable,
        }
    }
}

impl<T> From<Option<T>> for Availability<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => Self::Available(v),
            None => Self::Unavailable,
        }
    }
}

impl Availability<Value> {
    /// Collapse into a concrete value, substituting the sentinel.
    pub fn or_sentinel(self) -> Value {
        match self {
            Self::Available(v) => v,
            Self::Unavailable => Value::from(UNAVAILABLE),
        }
    }
}

/// Rendered value of an output after synthesis.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    Available(serde_json::Value),
    Unavailable,
}

impl OutputValue {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Available(v) => v.clone(),
            Self::Unavailable => serde_json::Value::String(UNAVAILABLE.to_string()),
        }
    }
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available(serde_json::Value::String(s)) => f.write_str(s),
            Self::Available(other) => write!(f, "{other}"),
            Self::Unavailable => f.write_str(UNAVAILABLE),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedOutput {
    pub name: String,
    pub value: OutputValue,
}

/// Registers named outputs on a stack.
pub struct OutputPublisher<'a> {
    stack: &'a mut StackBuilder,
}

impl<'a> OutputPublisher<'a> {
    pub fn new(stack: &'a mut StackBuilder) -> Self {
        Self { stack }
    }

    /// Publish an arbitrary value.
    pub fn publish(&mut self, name: &str, value: Availability<Value>) -> Result<(), GraphError> {
        if !value.is_available() {
            tracing::warn!(stack = self.stack.name(), output = name, "output is unavailable");
        }
        self.stack.output(name, value)
    }

    /// Publish one attribute of a possibly-undeclared resource.
    pub fn attribute(
        &mut self,
        name: &str,
        source: Availability<AttrRef>,
    ) -> Result<(), GraphError> {
        self.publish(name, source.map(Value::from))
    }
}

/// Build `KEY=value` env-file content. Unavailable entries are written with
/// the sentinel.
pub fn env_file(entries: Vec<(&str, Availability<Value>)>) -> Value {
    let mut parts = Vec::new();
    for (key, value) in entries {
        parts.push(Value::from(format!("{key}=")));
        parts.push(value.or_sentinel());
        parts.push(Value::from("\n"));
    }
    Value::Concat(parts)
}
