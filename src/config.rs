//! Project configuration module.
//!
//! Handles loading, validating, and merging `stack.toml`. Stock defaults
//! describe the LocalStack thumbnail app; a `stack.toml` in the project root
//! overrides just the keys it names.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! project = "localstack-thumbnail-app"  # Parameter namespace
//! stage = "local"                       # STAGE env var of every function
//! lambda_dir = "lambdas"                # One subdirectory per function
//! website_dir = "website"               # Receives .env.local
//! out_dir = "cdktf.out"                 # Synthesized stacks and archives
//! backend_stack = "iac-assignment-backend"
//! frontend_stack = "iac-assignment-frontend"
//!
//! [provider]
//! region = "us-east-1"
//! endpoint = "http://localhost:4566"    # Omit for real AWS endpoints
//!
//! [buckets]
//! prefix = "localstack-thumbnails"      # <prefix>-images, <prefix>-resized, ...
//!
//! [functions]
//! role = "arn:aws:iam::000000000000:role/lambda-role"
//! runtime = "python3.9"
//! handler = "handler.handler"
//! timeout = 30                          # Seconds, 1-900
//! memory = 256                          # MB, 128-10240
//! resize = "resize"                     # Function triggered by uploads
//! auxiliary = ["list", "presign"]       # Functions exposed through URLs
//!
//! [failure]
//! email = "alerts@example.com"
//! maximum_retry_attempts = 0            # 0-2
//! maximum_event_age = 3600              # Seconds, 60-21600
//!
//! [bundle]
//! target = "linux-x86_64"               # or "linux-arm64"
//! vendor_dir = "libs"
//! stale = ["PIL", "Pillow*", "*.dist-info"]
//! python_version = "3.9"
//! build_image = "public.ecr.aws/sam/build-python3.9"
//! exclude = ["__pycache__", "*.pyc", ".DS_Store"]
//!
//! [website]
//! enabled = true
//! index_document = "index.html"
//!
//! [processing]
//! max_processes = 4                     # Max parallel bundles (omit for auto)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::bundle::BundleSettings;
use crate::routing::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file name looked up in the project root.
pub const CONFIG_FILE: &str = "stack.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Failed to serialize stock config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Project configuration loaded from `stack.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub project: String,
    pub stage: String,
    pub lambda_dir: String,
    pub website_dir: String,
    pub out_dir: String,
    pub backend_stack: String,
    pub frontend_stack: String,
    pub provider: ProviderConfig,
    pub buckets: BucketsConfig,
    pub functions: FunctionsConfig,
    pub failure: FailureConfig,
    pub bundle: BundleSettings,
    pub website: WebsiteConfig,
    pub processing: ProcessingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project: "localstack-thumbnail-app".to_string(),
            stage: "local".to_string(),
            lambda_dir: "lambdas".to_string(),
            website_dir: "website".to_string(),
            out_dir: "cdktf.out".to_string(),
            backend_stack: "iac-assignment-backend".to_string(),
            frontend_stack: "iac-assignment-frontend".to_string(),
            provider: ProviderConfig::default(),
            buckets: BucketsConfig::default(),
            functions: FunctionsConfig::default(),
            failure: FailureConfig::default(),
            bundle: BundleSettings::default(),
            website: WebsiteConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        for (key, value) in [
            ("project", &self.project),
            ("stage", &self.stage),
            ("backend_stack", &self.backend_stack),
            ("frontend_stack", &self.frontend_stack),
            ("buckets.prefix", &self.buckets.prefix),
            ("functions.resize", &self.functions.resize),
        ] {
            if value.trim().is_empty() {
                return invalid(format!("{key} must not be empty"));
            }
        }
        if self.backend_stack == self.frontend_stack {
            return invalid("backend_stack and frontend_stack must differ".into());
        }

        let mut names = BTreeSet::new();
        for name in self.functions.names() {
            if name.is_empty() || !name.chars().all(is_name_char) {
                return invalid(format!(
                    "function name '{name}' may only contain letters, digits, '-' and '_'"
                ));
            }
            if !names.insert(name) {
                return invalid(format!("function name '{name}' is listed twice"));
            }
        }
        if !(1..=900).contains(&self.functions.timeout) {
            return invalid("functions.timeout must be 1-900 seconds".into());
        }
        if !(128..=10240).contains(&self.functions.memory) {
            return invalid("functions.memory must be 128-10240 MB".into());
        }

        if !self.failure.email.contains('@') {
            return invalid(format!(
                "failure.email '{}' is not an email address",
                self.failure.email
            ));
        }
        if let Err(e) = self.failure.retry_policy() {
            return invalid(format!("failure: {e}"));
        }

        if self.bundle.vendor_dir.is_empty() || !self.bundle.vendor_dir.chars().all(is_name_char)
        {
            return invalid("bundle.vendor_dir must be a plain directory name".into());
        }
        for pattern in self.bundle.stale.iter().chain(&self.bundle.exclude) {
            if pattern.is_empty()
                || !pattern
                    .chars()
                    .all(|c| is_name_char(c) || matches!(c, '.' | '*'))
            {
                return invalid(format!(
                    "bundle pattern '{pattern}' may only contain letters, digits, '-', '_', '.' and '*'"
                ));
            }
            if pattern.chars().all(|c| matches!(c, '.' | '*')) {
                return invalid(format!(
                    "bundle pattern '{pattern}' would match the whole function directory"
                ));
            }
        }
        if let Err(e) = crate::bundle::exclude_set(&self.bundle.exclude) {
            return invalid(format!("bundle.exclude: {e}"));
        }
        Ok(())
    }

    pub fn lambda_path(&self, root: &Path) -> PathBuf {
        root.join(&self.lambda_dir)
    }

    pub fn website_path(&self, root: &Path) -> PathBuf {
        root.join(&self.website_dir)
    }

    pub fn out_path(&self, root: &Path) -> PathBuf {
        root.join(&self.out_dir)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Cloud provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub region: String,
    /// Single endpoint all services are routed to (LocalStack). When absent,
    /// the provider talks to the real service endpoints.
    pub endpoint: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: Some("http://localhost:4566".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BucketsConfig {
    /// Every bucket is named `<prefix>-<role>`.
    pub prefix: String,
}

impl Default for BucketsConfig {
    fn default() -> Self {
        Self {
            prefix: "localstack-thumbnails".to_string(),
        }
    }
}

impl BucketsConfig {
    pub fn name(&self, role: &str) -> String {
        format!("{}-{role}", self.prefix)
    }
}

/// Settings shared by every function.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FunctionsConfig {
    pub role: String,
    pub runtime: String,
    pub handler: String,
    /// Seconds.
    pub timeout: u32,
    /// Megabytes.
    pub memory: u32,
    /// The upload-triggered function.
    pub resize: String,
    /// Functions exposed through unauthenticated URLs.
    pub auxiliary: Vec<String>,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            role: "arn:aws:iam::000000000000:role/lambda-role".to_string(),
            runtime: "python3.9".to_string(),
            handler: "handler.handler".to_string(),
            timeout: 30,
            memory: 256,
            resize: "resize".to_string(),
            auxiliary: vec!["list".to_string(), "presign".to_string()],
        }
    }
}

impl FunctionsConfig {
    /// Resize first, then auxiliary functions in config order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.resize.as_str()).chain(self.auxiliary.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FailureConfig {
    /// Subscriber of the failure topic.
    pub email: String,
    pub maximum_retry_attempts: u32,
    /// Seconds.
    pub maximum_event_age: u32,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            email: "alerts@example.com".to_string(),
            maximum_retry_attempts: 0,
            maximum_event_age: 3600,
        }
    }
}

impl FailureConfig {
    pub fn retry_policy(&self) -> Result<RetryPolicy, crate::routing::RoutingError> {
        RetryPolicy::new(self.maximum_retry_attempts, self.maximum_event_age)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebsiteConfig {
    /// Declare the website bucket. When false, every value read from it is
    /// unavailable.
    pub enabled: bool,
    pub index_document: String,
}

impl Default for WebsiteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            index_document: "index.html".to_string(),
        }
    }
}

/// Parallel bundling settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of functions bundled at once.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Stock defaults as a `toml::Value::Table`, the base layer for merging.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(AppConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value. `Ok(None)` if it doesn't exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<AppConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: AppConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a `stack.toml` path, merged over stock defaults.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let overlay = load_raw_config(path)?;
    if overlay.is_none() {
        tracing::debug!(path = %path.display(), "no config file, using stock defaults");
    }
    resolve_config(stock_defaults_value()?, overlay)
}

/// Returns a fully-commented stock `stack.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Thumbstack Configuration
# ========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.

# Namespace of the published parameters (/<project>/buckets/<role>).
project = "localstack-thumbnail-app"

# Passed to every function as the STAGE environment variable.
stage = "local"

# One subdirectory per function, each with a handler module and an
# optional requirements.txt.
lambda_dir = "lambdas"

# The frontend env file is written to <website_dir>/.env.local.
website_dir = "website"

# Synthesized stacks, manifest and function archives.
out_dir = "cdktf.out"

backend_stack = "iac-assignment-backend"
frontend_stack = "iac-assignment-frontend"

# ---------------------------------------------------------------------------
# Provider
# ---------------------------------------------------------------------------
[provider]
region = "us-east-1"

# Route every service to one endpoint (LocalStack).
# Comment out to use the real service endpoints.
endpoint = "http://localhost:4566"

# ---------------------------------------------------------------------------
# Buckets
# ---------------------------------------------------------------------------
[buckets]
# Buckets are named <prefix>-images, <prefix>-resized and <prefix>-webapp.
prefix = "localstack-thumbnails"

# ---------------------------------------------------------------------------
# Functions
# ---------------------------------------------------------------------------
[functions]
role = "arn:aws:iam::000000000000:role/lambda-role"
runtime = "python3.9"
handler = "handler.handler"

# Seconds (1-900).
timeout = 30

# Megabytes (128-10240).
memory = 256

# Function invoked for every object created in the images bucket.
resize = "resize"

# Functions exposed through unauthenticated function URLs.
# Each gets an output named <NAME>_url.
auxiliary = ["list", "presign"]

# ---------------------------------------------------------------------------
# Failure notification
# ---------------------------------------------------------------------------
[failure]
# Receives a message for every resize invocation that finally fails.
email = "alerts@example.com"

# Retries after the first failed attempt (0-2).
maximum_retry_attempts = 0

# Seconds an event may wait for processing before it is dropped (60-21600).
maximum_event_age = 3600

# ---------------------------------------------------------------------------
# Bundling
# ---------------------------------------------------------------------------
[bundle]
# Platform the functions run on: "linux-x86_64" or "linux-arm64".
target = "linux-x86_64"

# Packages are installed here, then moved into the function root.
vendor_dir = "libs"

# Removed from the function root before installing.
stale = ["PIL", "Pillow*", "*.dist-info"]

python_version = "3.9"

# Build container used on macOS hosts.
build_image = "public.ecr.aws/sam/build-python3.9"

# Left out of every archive. Globs match a file name or a path relative
# to the function directory.
exclude = ["__pycache__", "*.pyc", ".DS_Store"]

# ---------------------------------------------------------------------------
# Website
# ---------------------------------------------------------------------------
[website]
# When false, no website bucket is declared and every value read from it
# is written as __UNAVAILABLE__.
enabled = true
index_document = "index.html"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum functions bundled in parallel.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
