//! The thumbnail application's two stacks.
//!
//! ## Backend
//!
//! ```text
//! images bucket ─┬─▶ /<project>/buckets/images  (parameter)
//!                └─▶ resize function ◀── upload trigger
//! resized bucket ──▶ /<project>/buckets/resized (parameter)
//! failed-resize-topic ──▶ email subscription
//!        ▲
//!        └── resize dead letter + invoke config on-failure destination
//! list, presign ──▶ function URL ──▶ <NAME>_url output
//! ```
//!
//! ## Frontend
//!
//! An optional `webapp` bucket serving a static website, an env file for
//! the website build, and the website URL. When the bucket is not declared
//! the env file and the URL carry the unavailable sentinel.
//!
//! Stacks are self-contained: nothing in the frontend references a backend
//! node. Bucket names cross over only as generated strings.

use crate::bundle::{Asset, AssetSet};
use crate::config::{AppConfig, ProviderConfig};
use crate::graph::{GraphError, Handle, StackBuilder};
use crate::outputs::{Availability, OutputPublisher, env_file};
use crate::parameters::{ParameterBindings, ParameterError, ParameterPath};
use crate::resource::ResourceKind;
use crate::routing::{
    OBJECT_CREATED, RoutingError, dead_letter_config, failure_channel, invoke_config,
    upload_trigger,
};
use crate::value::{AttrRef, Config, Value};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Name of the failure notification topic.
pub const FAILURE_TOPIC: &str = "failed-resize-topic";

/// Env file written into the website directory.
pub const ENV_FILE: &str = ".env.local";

/// Bucket roles of the backend, in declaration order.
pub const BACKEND_BUCKETS: [&str; 2] = ["images", "resized"];

const WEBSITE_BUCKET: &str = "webapp";

#[derive(Error, Debug)]
pub enum StackError {
    #[error("No bundled asset for function '{0}'")]
    MissingAsset(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

/// Buckets declared by a stack, by role.
#[derive(Debug, Clone, Default)]
pub struct BucketRegistry {
    buckets: BTreeMap<String, (String, Handle)>,
}

impl BucketRegistry {
    fn insert(&mut self, role: &str, name: String, handle: Handle) {
        self.buckets.insert(role.to_string(), (name, handle));
    }

    pub fn handle(&self, role: &str) -> Option<&Handle> {
        self.buckets.get(role).map(|(_, h)| h)
    }

    /// Generated bucket name for a role.
    pub fn name(&self, role: &str) -> Option<&str> {
        self.buckets.get(role).map(|(n, _)| n.as_str())
    }

    /// All generated bucket names, ordered by role.
    pub fn names(&self) -> Vec<&str> {
        self.buckets.values().map(|(n, _)| n.as_str()).collect()
    }
}

pub struct BackendStack {
    pub stack: StackBuilder,
    pub buckets: BucketRegistry,
    pub functions: BTreeMap<String, Handle>,
}

pub struct FrontendStack {
    pub stack: StackBuilder,
    pub website_bucket: Availability<Handle>,
}

/// `aws` provider block. With an endpoint configured, every service used
/// here is routed to it and credential checks are skipped.
pub fn aws_provider(provider: &ProviderConfig) -> Config {
    let mut config = Config::new().set("region", provider.region.as_str());
    if let Some(endpoint) = &provider.endpoint {
        let mut endpoints = Config::new();
        for service in ["iam", "lambda", "s3", "sns", "ssm", "sts"] {
            endpoints.insert(service, endpoint.as_str());
        }
        config = config
            .set("access_key", "test")
            .set("secret_key", "test")
            .set("s3_use_path_style", true)
            .set("skip_credentials_validation", true)
            .set("skip_metadata_api_check", true)
            .set("skip_requesting_account_id", true)
            .set("endpoints", vec![endpoints]);
    }
    config
}

fn function_config(config: &AppConfig, asset: &Asset) -> Config {
    let functions = &config.functions;
    Config::new()
        .set("function_name", asset.name.as_str())
        .set("role", functions.role.as_str())
        .set("runtime", functions.runtime.as_str())
        .set("handler", functions.handler.as_str())
        .set("filename", asset.archive_path.display().to_string())
        .set("source_code_hash", asset.hash.as_str())
        .set("architectures", vec![config.bundle.target.architecture()])
        .set("timeout", functions.timeout)
        .set("memory_size", functions.memory)
        .set(
            "environment",
            Config::new().set("variables", Config::new().set("STAGE", config.stage.as_str())),
        )
}

fn require<'a>(assets: &'a AssetSet, name: &str) -> Result<&'a Asset, StackError> {
    assets
        .get(name)
        .ok_or_else(|| StackError::MissingAsset(name.to_string()))
}

/// Declare the backend stack.
pub fn build_backend(config: &AppConfig, assets: &AssetSet) -> Result<BackendStack, StackError> {
    let mut stack = StackBuilder::new(&config.backend_stack);
    stack.provider("aws", "hashicorp/aws", aws_provider(&config.provider));

    let mut buckets = BucketRegistry::default();
    let mut bindings = ParameterBindings::new();
    let mut paths = Vec::new();
    for role in BACKEND_BUCKETS {
        let name = config.buckets.name(role);
        let bucket = stack.declare(
            ResourceKind::Bucket,
            role,
            Config::new()
                .set("bucket", name.as_str())
                .set("force_destroy", true),
        )?;
        let path = ParameterPath::bucket(&config.project, role)?;
        bindings.publish(&mut stack, &path, bucket.attr("bucket"))?;
        buckets.insert(role, name, bucket);
        paths.push(path);
    }

    let channel = failure_channel(&mut stack, FAILURE_TOPIC, &config.failure.email)?;
    let policy = config.failure.retry_policy()?;

    let mut functions = BTreeMap::new();
    let resize_name = &config.functions.resize;
    let resize = stack.declare(
        ResourceKind::Function,
        resize_name,
        function_config(config, require(assets, resize_name)?)
            .set("dead_letter_config", dead_letter_config(&channel)),
    )?;
    invoke_config(&mut stack, &resize, &channel, &policy)?;
    if let Some(images) = buckets.handle("images") {
        upload_trigger(&mut stack, images, &resize, &[OBJECT_CREATED])?;
    }
    functions.insert(resize_name.clone(), resize);

    let mut url_outputs = Vec::new();
    for name in &config.functions.auxiliary {
        let function = stack.declare(
            ResourceKind::Function,
            name,
            function_config(config, require(assets, name)?),
        )?;
        let url = stack.declare(
            ResourceKind::FunctionUrl,
            name,
            Config::new()
                .set("function_name", function.attr("function_name"))
                .set("authorization_type", "NONE"),
        )?;
        url_outputs.push((format!("{}_url", name.to_uppercase()), url.attr("function_url")));
        functions.insert(name.clone(), function);
    }

    let mut lookups = Vec::new();
    for (label, path) in ["SOURCE_BUCKET", "TARGET_BUCKET"].into_iter().zip(&paths) {
        lookups.push((label, bindings.resolve(&mut stack, path)?));
    }

    let mut publisher = OutputPublisher::new(&mut stack);
    for (name, url) in url_outputs {
        publisher.attribute(&name, Availability::Available(url))?;
    }
    for (label, value) in lookups {
        publisher.attribute(label, Availability::Available(value))?;
    }

    tracing::debug!(
        stack = %config.backend_stack,
        buckets = ?buckets.names(),
        functions = functions.len(),
        "backend declared"
    );
    Ok(BackendStack {
        stack,
        buckets,
        functions,
    })
}

/// Public-read policy document for `bucket`.
fn public_read_policy(bucket: &Handle) -> Value {
    Value::concat([
        Value::from(
            r#"{"Version":"2012-10-17","Statement":[{"Sid":"PublicReadGetObject","Effect":"Allow","Principal":"*","Action":"s3:GetObject","Resource":""#,
        ),
        Value::from(bucket.arn()),
        Value::from(r#"/*"}]}"#),
    ])
}

/// Declare the frontend stack. `root` is the project root the env file path
/// is resolved against.
pub fn build_frontend(config: &AppConfig, root: &Path) -> Result<FrontendStack, StackError> {
    let mut stack = StackBuilder::new(&config.frontend_stack);
    stack.provider("aws", "hashicorp/aws", aws_provider(&config.provider));
    stack.provider("local", "hashicorp/local", Config::new());

    let website_bucket = if config.website.enabled {
        Availability::Available(declare_website(&mut stack, config)?)
    } else {
        tracing::warn!(stack = %config.frontend_stack, "website bucket disabled");
        Availability::Unavailable
    };
    let bucket_name: Availability<AttrRef> = website_bucket.as_ref().map(|b| b.attr("bucket"));

    let env_path = config.website_path(root).join(ENV_FILE);
    stack.declare(
        ResourceKind::LocalFile,
        "env",
        Config::new()
            .set("filename", env_path.display().to_string())
            .set(
                "content",
                env_file(vec![(
                    "S3_BUCKET_FRONTEND",
                    bucket_name.clone().map(Value::from),
                )]),
            ),
    )?;

    let mut publisher = OutputPublisher::new(&mut stack);
    publisher.attribute("webapp_bucket", bucket_name.clone())?;
    publisher.publish(
        "localstack_url",
        bucket_name.map(|name| {
            Value::concat([
                Value::from("http://"),
                Value::from(name),
                Value::from(".s3-website.localhost.localstack.cloud:4566"),
            ])
        }),
    )?;

    Ok(FrontendStack {
        stack,
        website_bucket,
    })
}

fn declare_website(stack: &mut StackBuilder, config: &AppConfig) -> Result<Handle, StackError> {
    let bucket = stack.declare(
        ResourceKind::Bucket,
        WEBSITE_BUCKET,
        Config::new()
            .set("bucket", config.buckets.name(WEBSITE_BUCKET))
            .set("force_destroy", true),
    )?;
    stack.declare(
        ResourceKind::Website,
        WEBSITE_BUCKET,
        Config::new().set("bucket", bucket.id()).set(
            "index_document",
            Config::new().set("suffix", config.website.index_document.as_str()),
        ),
    )?;
    let access = stack.declare(
        ResourceKind::BucketPublicAccess,
        WEBSITE_BUCKET,
        Config::new()
            .set("bucket", bucket.id())
            .set("block_public_acls", false)
            .set("block_public_policy", false)
            .set("ignore_public_acls", false)
            .set("restrict_public_buckets", false),
    )?;
    let policy = stack.declare(
        ResourceKind::BucketPolicy,
        WEBSITE_BUCKET,
        Config::new()
            .set("bucket", bucket.id())
            .set("policy", public_read_policy(&bucket)),
    )?;
    // the provider rejects a public policy while the block is still on
    stack.depends_on(&policy, &access)?;
    Ok(bucket)
}
