//! Parameter store binding.
//!
//! Generated identifiers (bucket names, mostly) are published under fixed,
//! well-known paths so consumers can find them without knowing how they
//! were generated. A path such as `/localstack-thumbnail-app/buckets/images`
//! is published once per run and may be resolved any number of times.
//!
//! Ordering is encoded in the graph, not in call order: a resolve declares a
//! parameter lookup whose `name` references the published parameter, so the
//! lookup always sorts after the publish. Resolving a path that was never
//! published is an error.

use crate::graph::{GraphError, Handle, StackBuilder};
use crate::resource::ResourceKind;
use crate::value::{AttrRef, Config, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("Invalid parameter path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("Parameter {0} is published twice")]
    AlreadyPublished(String),
    #[error("Parameter {0} is resolved but never published")]
    Unpublished(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// An absolute, slash-separated parameter path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParameterPath(String);

impl ParameterPath {
    pub fn new(path: &str) -> Result<Self, ParameterError> {
        let invalid = |reason| ParameterError::InvalidPath {
            path: path.to_string(),
            reason,
        };
        let Some(rest) = path.strip_prefix('/') else {
            return Err(invalid("must start with '/'"));
        };
        if rest.is_empty() || rest.split('/').any(str::is_empty) {
            return Err(invalid("empty segment"));
        }
        if !rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
        {
            return Err(invalid("only letters, digits, '-', '_', '.' and '/' are allowed"));
        }
        Ok(Self(path.to_string()))
    }

    /// `/<namespace>/buckets/<role>`
    pub fn bucket(namespace: &str, role: &str) -> Result<Self, ParameterError> {
        Self::new(&format!("/{namespace}/buckets/{role}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Graph node name derived from the path.
    pub fn node_name(&self) -> String {
        self.0
            .trim_start_matches('/')
            .replace(['/', '.'], "-")
    }
}

impl fmt::Display for ParameterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Published and resolved parameters of one stack.
#[derive(Debug, Default)]
pub struct ParameterBindings {
    published: BTreeMap<ParameterPath, Handle>,
    lookups: BTreeMap<ParameterPath, Handle>,
}

impl ParameterBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a string parameter holding `value` at `path`.
    pub fn publish(
        &mut self,
        stack: &mut StackBuilder,
        path: &ParameterPath,
        value: impl Into<Value>,
    ) -> Result<Handle, ParameterError> {
        if self.published.contains_key(path) {
            return Err(ParameterError::AlreadyPublished(path.to_string()));
        }
        let handle = stack.declare(
            ResourceKind::Parameter,
            &path.node_name(),
            Config::new()
                .set("name", path.as_str())
                .set("type", "String")
                .set("value", value),
        )?;
        tracing::debug!(path = %path, "parameter published");
        self.published.insert(path.clone(), handle.clone());
        Ok(handle)
    }

    /// Read the value at `path`. The returned reference depends on the
    /// publish through an explicit graph edge.
    pub fn resolve(
        &mut self,
        stack: &mut StackBuilder,
        path: &ParameterPath,
    ) -> Result<AttrRef, ParameterError> {
        if let Some(lookup) = self.lookups.get(path) {
            return Ok(lookup.attr("value"));
        }
        let published = self
            .published
            .get(path)
            .ok_or_else(|| ParameterError::Unpublished(path.to_string()))?;
        let lookup = stack.declare(
            ResourceKind::ParameterLookup,
            &path.node_name(),
            Config::new().set("name", published.attr("name")),
        )?;
        self.lookups.insert(path.clone(), lookup.clone());
        Ok(lookup.attr("value"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_path_shape() {
        let p = ParameterPath::bucket("localstack-thumbnail-app", "images").unwrap();
        assert_eq!(p.as_str(), "/localstack-thumbnail-app/buckets/images");
        assert_eq!(p.node_name(), "localstack-thumbnail-app-buckets-images");
    }

    #[test]
    fn invalid_paths_rejected() {
        for bad in ["relative/path", "/", "/double//slash", "/trailing/", "/sp ace"] {
            assert!(
                matches!(
                    ParameterPath::new(bad),
                    Err(ParameterError::InvalidPath { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn resolve_orders_after_publish() {
        let mut stack = StackBuilder::new("s");
        let mut bindings = ParameterBindings::new();
        let bucket = stack
            .declare(
                ResourceKind::Bucket,
                "images",
                Config::new().set("bucket", "app-images"),
            )
            .unwrap();
        let path = ParameterPath::bucket("app", "images").unwrap();
        bindings
            .publish(&mut stack, &path, bucket.attr("bucket"))
            .unwrap();
        let value = bindings.resolve(&mut stack, &path).unwrap();
        assert_eq!(
            value.expression(),
            "${data.aws_ssm_parameter.app-buckets-images.value}"
        );

        let synth = stack.synth().unwrap();
        let publish = synth
            .position("aws_ssm_parameter.app-buckets-images")
            .unwrap();
        let lookup = synth
            .position("data.aws_ssm_parameter.app-buckets-images")
            .unwrap();
        assert!(publish < lookup);
        assert!(synth.position("aws_s3_bucket.images").unwrap() < publish);
        assert_eq!(
            synth
                .resource("data.aws_ssm_parameter.app-buckets-images")
                .unwrap()
                .depends_on,
            vec!["aws_ssm_parameter.app-buckets-images"]
        );
    }

    #[test]
    fn resolve_unpublished_fails() {
        let mut stack = StackBuilder::new("s");
        let mut bindings = ParameterBindings::new();
        let path = ParameterPath::bucket("app", "resized").unwrap();
        assert_eq!(
            bindings.resolve(&mut stack, &path).unwrap_err(),
            ParameterError::Unpublished("/app/buckets/resized".into())
        );
        assert!(stack.is_empty());
    }

    #[test]
    fn publish_twice_fails() {
        let mut stack = StackBuilder::new("s");
        let mut bindings = ParameterBindings::new();
        let path = ParameterPath::new("/app/key").unwrap();
        bindings.publish(&mut stack, &path, "a").unwrap();
        assert!(matches!(
            bindings.publish(&mut stack, &path, "b"),
            Err(ParameterError::AlreadyPublished(_))
        ));
    }

    #[test]
    fn repeated_resolve_reuses_lookup() {
        let mut stack = StackBuilder::new("s");
        let mut bindings = ParameterBindings::new();
        let path = ParameterPath::new("/app/key").unwrap();
        bindings.publish(&mut stack, &path, "a").unwrap();
        let first = bindings.resolve(&mut stack, &path).unwrap();
        let second = bindings.resolve(&mut stack, &path).unwrap();
        assert_eq!(first, second);
        assert_eq!(stack.len(), 2);
    }
}
