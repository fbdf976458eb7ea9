//! Typed resource kinds.
//!
//! Every node in a stack has one of these kinds. The kind fixes the provider
//! type name used in the synthesized configuration and whether the node is a
//! managed resource or a read-only data source.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ResourceKind {
    Bucket,
    /// Static website hosting attached to a bucket.
    Website,
    BucketPolicy,
    BucketPublicAccess,
    /// Object-created notifications from a bucket to a function.
    EventSource,
    Parameter,
    /// Data-source read of a published parameter.
    ParameterLookup,
    Topic,
    Subscription,
    Function,
    FunctionUrl,
    FunctionPermission,
    /// Asynchronous invocation settings (retries, event age, on-failure destination).
    EventInvokeConfig,
    /// A file written on the machine applying the stack.
    LocalFile,
}

/// Which top-level block a node is synthesized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    Resource,
    Data,
}

impl ResourceKind {
    /// Provider type name, e.g. `aws_s3_bucket`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bucket => "aws_s3_bucket",
            Self::Website => "aws_s3_bucket_website_configuration",
            Self::BucketPolicy => "aws_s3_bucket_policy",
            Self::BucketPublicAccess => "aws_s3_bucket_public_access_block",
            Self::EventSource => "aws_s3_bucket_notification",
            Self::Parameter | Self::ParameterLookup => "aws_ssm_parameter",
            Self::Topic => "aws_sns_topic",
            Self::Subscription => "aws_sns_topic_subscription",
            Self::Function => "aws_lambda_function",
            Self::FunctionUrl => "aws_lambda_function_url",
            Self::FunctionPermission => "aws_lambda_permission",
            Self::EventInvokeConfig => "aws_lambda_function_event_invoke_config",
            Self::LocalFile => "local_file",
        }
    }

    pub fn block(&self) -> Block {
        match self {
            Self::ParameterLookup => Block::Data,
            _ => Block::Resource,
        }
    }

    /// Provider that owns this kind.
    pub fn provider(&self) -> &'static str {
        match self {
            Self::LocalFile => "local",
            _ => "aws",
        }
    }

    /// Fully qualified address of a node of this kind, e.g.
    /// `aws_s3_bucket.images` or `data.aws_ssm_parameter.images`.
    pub fn address(&self, name: &str) -> String {
        match self.block() {
            Block::Resource => format!("{}.{}", self.type_name(), name),
            Block::Data => format!("data.{}.{}", self.type_name(), name),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Check a node name against the identifier rules of the synthesized
/// configuration: a letter or underscore, then letters, digits, `_` or `-`.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
