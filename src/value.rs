//! Configuration values for declared resources.
//!
//! A [`Value`] is either a literal or something that is only known once the
//! graph has been validated: a reference to another node's attribute, or a
//! string built from literals and references. References are what create
//! dependency edges; the graph builder walks [`Value::refs`] on every
//! declaration.
//!
//! Rendering produces the provider's interpolation syntax. Literal strings
//! are escaped so a stray `${` in user data never turns into an expression.

use crate::graph::Handle;
use crate::resource::ResourceKind;
use std::collections::BTreeMap;

/// What an attribute reference points at.
#[derive(Debug, Clone, PartialEq)]
pub enum RefTarget {
    /// A node returned by `declare` in some stack.
    Handle(Handle),
    /// A node addressed by kind and name only. Checked against the stack at
    /// declaration time.
    Named { kind: ResourceKind, name: String },
}

/// A lazy read of one attribute of another node.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrRef {
    target: RefTarget,
    attribute: String,
}

impl AttrRef {
    pub(crate) fn to_handle(handle: Handle, attribute: &str) -> Self {
        Self {
            target: RefTarget::Handle(handle),
            attribute: attribute.to_string(),
        }
    }

    /// Reference a node by kind and name instead of by handle.
    pub fn named(kind: ResourceKind, name: &str, attribute: &str) -> Self {
        Self {
            target: RefTarget::Named {
                kind,
                name: name.to_string(),
            },
            attribute: attribute.to_string(),
        }
    }

    pub fn target(&self) -> &RefTarget {
        &self.target
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Address of the referenced node.
    pub fn target_address(&self) -> String {
        match &self.target {
            RefTarget::Handle(h) => h.address(),
            RefTarget::Named { kind, name } => kind.address(name),
        }
    }

    /// Interpolation expression, e.g. `${aws_s3_bucket.images.arn}`.
    pub fn expression(&self) -> String {
        format!("${{{}.{}}}", self.target_address(), self.attribute)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Literal(serde_json::Value),
    Ref(AttrRef),
    List(Vec<Value>),
    Map(Config),
    /// String concatenation of the rendered parts.
    Concat(Vec<Value>),
}

impl Value {
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn concat<T: Into<Value>>(parts: impl IntoIterator<Item = T>) -> Self {
        Self::Concat(parts.into_iter().map(Into::into).collect())
    }

    pub fn as_literal(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Every attribute reference reachable from this value.
    pub fn refs(&self) -> Vec<&AttrRef> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a AttrRef>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(r) => out.push(r),
            Self::List(items) | Self::Concat(items) => {
                for item in items {
                    item.collect_refs(out);
                }
            }
            Self::Map(config) => {
                for value in config.values() {
                    value.collect_refs(out);
                }
            }
        }
    }

    /// Render into the synthesized JSON form.
    pub fn render(&self) -> serde_json::Value {
        match self {
            Self::Literal(v) => escape_literal(v),
            Self::Ref(r) => serde_json::Value::String(r.expression()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Value::render).collect()),
            Self::Map(config) => config.render(),
            Self::Concat(parts) => {
                let mut s = String::new();
                for part in parts {
                    part.render_into(&mut s);
                }
                serde_json::Value::String(s)
            }
        }
    }

    fn render_into(&self, s: &mut String) {
        match self {
            Self::Literal(serde_json::Value::String(text)) => s.push_str(&escape_str(text)),
            Self::Concat(parts) => {
                for part in parts {
                    part.render_into(s);
                }
            }
            Self::Ref(r) => s.push_str(&r.expression()),
            other => s.push_str(&other.render().to_string()),
        }
    }
}

fn escape_str(text: &str) -> String {
    text.replace("${", "$${").replace("%{", "%%{")
}

fn escape_literal(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(escape_str(s)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(escape_literal).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), escape_literal(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Literal(serde_json::Value::String(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Literal(serde_json::Value::String(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Literal(serde_json::Value::Bool(b))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Literal(serde_json::Value::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Literal(serde_json::Value::from(n))
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Literal(v)
    }
}

impl From<AttrRef> for Value {
    fn from(r: AttrRef) -> Self {
        Self::Ref(r)
    }
}

impl From<Config> for Value {
    fn from(c: Config) -> Self {
        Self::Map(c)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::list(items)
    }
}

/// Key/value configuration of one node, kept sorted so synthesis is stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config(BTreeMap<String, Value>);

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.0.values()
    }

    pub fn refs(&self) -> Vec<&AttrRef> {
        self.0.values().flat_map(Value::refs).collect()
    }

    pub fn render(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.render()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_renders_as_is() {
        assert_eq!(Value::from("images").render(), json!("images"));
        assert_eq!(Value::from(true).render(), json!(true));
        assert_eq!(Value::from(30u32).render(), json!(30));
    }

    #[test]
    fn named_ref_expression() {
        let r = AttrRef::named(ResourceKind::Bucket, "images", "arn");
        assert_eq!(r.expression(), "${aws_s3_bucket.images.arn}");
        assert_eq!(Value::from(r).render(), json!("${aws_s3_bucket.images.arn}"));
    }

    #[test]
    fn concat_interleaves_refs() {
        let r = AttrRef::named(ResourceKind::Bucket, "webapp", "bucket");
        let v = Value::concat([Value::from("S3_BUCKET_FRONTEND="), Value::from(r)]);
        assert_eq!(v.render(), json!("S3_BUCKET_FRONTEND=${aws_s3_bucket.webapp.bucket}"));
    }

    #[test]
    fn literal_interpolation_is_escaped() {
        assert_eq!(Value::from("cost ${x}").render(), json!("cost $${x}"));
        let v = Value::concat([Value::from("%{if}"), Value::from(3u32)]);
        assert_eq!(v.render(), json!("%%{if}3"));
    }

    #[test]
    fn refs_found_in_nested_values() {
        let config = Config::new()
            .set("name", "resize")
            .set(
                "dead_letter_config",
                Config::new().set(
                    "target_arn",
                    AttrRef::named(ResourceKind::Topic, "failed", "arn"),
                ),
            )
            .set(
                "events",
                Value::list([Value::from(AttrRef::named(
                    ResourceKind::Bucket,
                    "images",
                    "id",
                ))]),
            );
        let addresses: Vec<String> = config.refs().iter().map(|r| r.target_address()).collect();
        assert_eq!(addresses, vec!["aws_sns_topic.failed", "aws_s3_bucket.images"]);
    }

    #[test]
    fn config_renders_sorted_object() {
        let config = Config::new().set("b", 2u32).set("a", "x");
        assert_eq!(config.render().to_string(), r#"{"a":"x","b":2}"#);
    }
}
