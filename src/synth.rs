//! The synthesis pipeline: bundle → declare → synthesize → write.
//!
//! ```text
//! lambdas/<fn>/ ──bundle──▶ assets/<fn>/<hash>/archive.zip
//!                                 │ hash
//!                                 ▼
//!                 backend + frontend StackBuilders ──synth──▶ ordered stacks
//!                                                                  │
//!                    stacks/<name>/cdk.tf.json, manifest.json ◀────┘
//! ```
//!
//! Bundling completes for every function before any resource is declared.
//! A bundling failure, a dangling reference or a cycle aborts the run
//! before anything under `stacks/` is written, so a failed run never leaves
//! a partially updated stack file behind.
//!
//! Progress is reported through an optional channel of [`PipelineEvent`]s;
//! the CLI prints them as they arrive.

use crate::bundle::{Asset, AssetBundler, AssetSet, BundleError, BundlePolicy, CommandRunner, REQUIREMENTS};
use crate::cache::{AssetManifest, AssetStatus, ChangeStats};
use crate::config::AppConfig;
use crate::graph::{GraphError, SynthesizedStack};
use crate::outputs::OutputValue;
use crate::platform::HostOs;
use crate::stacks::{StackError, build_backend, build_frontend};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;

/// File name of each synthesized stack.
pub const STACK_FILE: &str = "cdk.tf.json";

/// Top-level manifest listing every stack.
pub const CLOUD_MANIFEST: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum SynthError {
    #[error("Bundling failed: {0}")]
    Bundle(#[from] BundleError),
    #[error("Stack declaration failed: {0}")]
    Stack(#[from] StackError),
    #[error("Synthesis failed: {0}")]
    Graph(#[from] GraphError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Progress reported while the pipeline runs.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    AssetBundled {
        index: usize,
        name: String,
        hash: String,
        status: AssetStatus,
        /// Dependencies were installed before archiving.
        installed: bool,
    },
    StackSynthesized {
        name: String,
        order: Vec<String>,
        outputs: Vec<(String, OutputValue)>,
    },
    StackWritten {
        name: String,
        path: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct SynthOptions {
    /// Project root; config paths are resolved against it.
    pub root: PathBuf,
    /// Compare archive hashes against the previous run.
    pub use_cache: bool,
    /// Write stack files and manifests. `false` is a dry run (`plan`).
    pub write: bool,
}

#[derive(Debug)]
pub struct SynthResult {
    pub out_dir: PathBuf,
    pub assets: AssetSet,
    pub changes: ChangeStats,
    /// Generated backend bucket names.
    pub buckets: Vec<String>,
    pub backend: SynthesizedStack,
    pub frontend: SynthesizedStack,
}

impl SynthResult {
    pub fn stacks(&self) -> [&SynthesizedStack; 2] {
        [&self.backend, &self.frontend]
    }
}

/// Detect the build host, failing on hosts the bundler cannot drive.
pub fn detect_host() -> Result<HostOs, SynthError> {
    HostOs::detect().map_err(|os| SynthError::Bundle(BundleError::UnsupportedHost(os)))
}

fn emit(events: &Option<Sender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = events {
        tx.send(event).ok();
    }
}

/// Run the whole pipeline.
pub fn run<R: CommandRunner>(
    config: &AppConfig,
    options: &SynthOptions,
    host: HostOs,
    runner: &R,
    policy: &BundlePolicy,
    events: Option<Sender<PipelineEvent>>,
) -> Result<SynthResult, SynthError> {
    let root = fs::canonicalize(&options.root)?;
    let out_dir = config.out_path(&root);
    let lambda_dir = config.lambda_path(&root);

    // Stage 1: bundle
    tracing::info!(host = %host, target = %config.bundle.target, "bundling functions");
    let dirs: Vec<PathBuf> = config
        .functions
        .names()
        .map(|name| lambda_dir.join(name))
        .collect();
    let bundler = AssetBundler::new(runner, policy, host, &config.bundle, &out_dir.join("assets"))?;
    let bundled = bundler.bundle_all(&dirs)?;

    let mut manifest = if options.use_cache {
        AssetManifest::load(&out_dir)
    } else {
        AssetManifest::empty()
    };
    let mut changes = ChangeStats::default();
    for (i, asset) in bundled.iter().enumerate() {
        let status = manifest.status(&asset.name, &asset.hash);
        changes.count(status);
        emit(
            &events,
            PipelineEvent::AssetBundled {
                index: i + 1,
                name: asset.name.clone(),
                hash: asset.hash.clone(),
                status,
                installed: asset.source_dir.join(REQUIREMENTS).is_file(),
            },
        );
        manifest.record(&asset.name, &asset.hash, relative_archive(asset, &out_dir));
    }
    let assets: AssetSet = bundled.into_iter().collect();
    manifest.retain(|name| assets.get(name).is_some());
    tracing::info!(changes = %changes, "bundling complete");

    // Stage 2: declare and synthesize
    let backend = build_backend(config, &assets)?;
    let buckets = backend
        .buckets
        .names()
        .into_iter()
        .map(String::from)
        .collect();
    let frontend = build_frontend(config, &root)?;
    let backend = backend.stack.synth()?;
    let frontend = frontend.stack.synth()?;
    for stack in [&backend, &frontend] {
        emit(
            &events,
            PipelineEvent::StackSynthesized {
                name: stack.name.clone(),
                order: stack.order().into_iter().map(String::from).collect(),
                outputs: stack
                    .outputs
                    .iter()
                    .map(|o| (o.name.clone(), o.value.clone()))
                    .collect(),
            },
        );
    }

    // Stage 3: write
    if options.write {
        for stack in [&backend, &frontend] {
            let path = write_stack(&out_dir, stack)?;
            emit(
                &events,
                PipelineEvent::StackWritten {
                    name: stack.name.clone(),
                    path,
                },
            );
        }
        let cloud = cloud_manifest(&[&backend, &frontend]);
        fs::write(
            out_dir.join(CLOUD_MANIFEST),
            serde_json::to_string_pretty(&cloud)?,
        )?;
        manifest.save(&out_dir)?;
        tracing::info!(out_dir = %out_dir.display(), "stacks written");
    } else {
        tracing::info!("dry run, nothing written");
    }

    Ok(SynthResult {
        out_dir,
        assets,
        changes,
        buckets,
        backend,
        frontend,
    })
}

fn relative_archive(asset: &Asset, out_dir: &Path) -> String {
    asset
        .archive_path
        .strip_prefix(out_dir)
        .unwrap_or(&asset.archive_path)
        .display()
        .to_string()
}

/// Directory of a stack inside the output directory, relative to it.
pub fn stack_dir(name: &str) -> PathBuf {
    Path::new("stacks").join(name)
}

/// Write `stacks/<name>/cdk.tf.json` and return its path.
pub fn write_stack(out_dir: &Path, stack: &SynthesizedStack) -> Result<PathBuf, SynthError> {
    let dir = out_dir.join(stack_dir(&stack.name));
    fs::create_dir_all(&dir)?;
    let path = dir.join(STACK_FILE);
    fs::write(&path, serde_json::to_string_pretty(&stack.to_json())?)?;
    Ok(path)
}

/// Manifest naming every stack, where it was written and its creation order.
pub fn cloud_manifest(stacks: &[&SynthesizedStack]) -> serde_json::Value {
    let mut entries = serde_json::Map::new();
    for stack in stacks {
        let dir = stack_dir(&stack.name);
        entries.insert(
            stack.name.clone(),
            json!({
                "name": stack.name,
                "workingDirectory": dir.display().to_string(),
                "synthesizedStackPath": dir.join(STACK_FILE).display().to_string(),
                "order": stack.order(),
                "outputs": stack
                    .outputs
                    .iter()
                    .map(|o| (o.name.clone(), o.value.to_json()))
                    .collect::<serde_json::Map<_, _>>(),
            }),
        );
    }
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "stacks": entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::tests::MockRunner;
    use crate::outputs::UNAVAILABLE;
    use crate::test_helpers::{setup_project, write_requirements};
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn options(root: &Path, write: bool) -> SynthOptions {
        SynthOptions {
            root: root.to_path_buf(),
            use_cache: true,
            write,
        }
    }

    #[test]
    fn synth_writes_stacks_and_manifests() {
        let tmp = TempDir::new().unwrap();
        setup_project(tmp.path());
        let config = AppConfig::default();
        let runner = MockRunner::new();

        let result = run(
            &config,
            &options(tmp.path(), true),
            HostOs::Linux,
            &runner,
            &BundlePolicy::standard(),
            None,
        )
        .unwrap();

        let out = &result.out_dir;
        assert!(out.join("stacks/iac-assignment-backend/cdk.tf.json").exists());
        assert!(out.join("stacks/iac-assignment-frontend/cdk.tf.json").exists());
        assert!(out.join(CLOUD_MANIFEST).exists());
        assert!(crate::cache::manifest_path(out).exists());
        assert_eq!(result.assets.len(), 3);
        for asset in result.assets.iter() {
            assert!(asset.archive_path.starts_with(out.join("assets")));
            assert!(asset.archive_path.exists());
        }
        // no requirements.txt anywhere: nothing to install
        assert!(runner.recorded().is_empty());
    }

    #[test]
    fn plan_writes_no_stack_files() {
        let tmp = TempDir::new().unwrap();
        setup_project(tmp.path());
        let result = run(
            &AppConfig::default(),
            &options(tmp.path(), false),
            HostOs::Linux,
            &MockRunner::new(),
            &BundlePolicy::standard(),
            None,
        )
        .unwrap();
        assert!(!result.out_dir.join("stacks").exists());
        assert!(!result.out_dir.join(CLOUD_MANIFEST).exists());
        assert!(result.backend.position("aws_lambda_function.resize").is_some());
    }

    #[test]
    fn bundling_failure_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        setup_project(tmp.path());
        write_requirements(tmp.path(), "resize", "Pillow==10.4.0\n");
        let runner = MockRunner::failing_on("pip install");

        let err = run(
            &AppConfig::default(),
            &options(tmp.path(), true),
            HostOs::Linux,
            &runner,
            &BundlePolicy::standard(),
            None,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            SynthError::Bundle(BundleError::CommandFailed { .. })
        ));
        assert!(!tmp.path().join("cdktf.out/stacks").exists());
    }

    #[test]
    fn missing_policy_aborts_before_commands() {
        let tmp = TempDir::new().unwrap();
        setup_project(tmp.path());
        write_requirements(tmp.path(), "resize", "Pillow\n");
        let runner = MockRunner::new();
        let err = run(
            &AppConfig::default(),
            &options(tmp.path(), true),
            HostOs::MacOs,
            &runner,
            &BundlePolicy::empty(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SynthError::Bundle(BundleError::NoPolicy { .. })));
        assert!(runner.recorded().is_empty());
    }

    #[test]
    fn requirements_trigger_install_steps() {
        let tmp = TempDir::new().unwrap();
        setup_project(tmp.path());
        write_requirements(tmp.path(), "resize", "Pillow\n");
        let runner = MockRunner::new();
        run(
            &AppConfig::default(),
            &options(tmp.path(), false),
            HostOs::MacOs,
            &runner,
            &BundlePolicy::standard(),
            None,
        )
        .unwrap();
        let commands = runner.recorded();
        assert_eq!(commands.len(), 3);
        assert!(commands[1].starts_with("docker run"));
    }

    #[test]
    fn second_run_reports_unchanged() {
        let tmp = TempDir::new().unwrap();
        setup_project(tmp.path());
        let config = AppConfig::default();
        let policy = BundlePolicy::standard();
        let runner = MockRunner::new();

        let first = run(&config, &options(tmp.path(), true), HostOs::Linux, &runner, &policy, None)
            .unwrap();
        assert_eq!(first.changes.new, 3);

        std::fs::write(
            tmp.path().join("lambdas/list/handler.py"),
            "def handler(event, context):\n    return []\n",
        )
        .unwrap();
        let second = run(&config, &options(tmp.path(), true), HostOs::Linux, &runner, &policy, None)
            .unwrap();
        assert_eq!(second.changes.unchanged, 2);
        assert_eq!(second.changes.changed, 1);

        let fresh = run(
            &config,
            &SynthOptions {
                use_cache: false,
                ..options(tmp.path(), false)
            },
            HostOs::Linux,
            &runner,
            &policy,
            None,
        )
        .unwrap();
        assert_eq!(fresh.changes.new, 3);
    }

    #[test]
    fn events_report_each_stage() {
        let tmp = TempDir::new().unwrap();
        setup_project(tmp.path());
        let (tx, rx) = mpsc::channel();
        run(
            &AppConfig::default(),
            &options(tmp.path(), true),
            HostOs::Linux,
            &MockRunner::new(),
            &BundlePolicy::standard(),
            Some(tx),
        )
        .unwrap();
        let events: Vec<PipelineEvent> = rx.into_iter().collect();
        let bundled = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::AssetBundled { .. }))
            .count();
        let written = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::StackWritten { .. }))
            .count();
        assert_eq!(bundled, 3);
        assert_eq!(written, 2);
    }

    #[test]
    fn cloud_manifest_lists_stack_order_and_outputs() {
        let tmp = TempDir::new().unwrap();
        setup_project(tmp.path());
        let mut config = AppConfig::default();
        config.website.enabled = false;
        let result = run(
            &config,
            &options(tmp.path(), true),
            HostOs::Linux,
            &MockRunner::new(),
            &BundlePolicy::standard(),
            None,
        )
        .unwrap();
        let text = std::fs::read_to_string(result.out_dir.join(CLOUD_MANIFEST)).unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&text).unwrap();
        let frontend = &manifest["stacks"]["iac-assignment-frontend"];
        assert_eq!(
            frontend["synthesizedStackPath"],
            json!("stacks/iac-assignment-frontend/cdk.tf.json")
        );
        assert_eq!(frontend["outputs"]["localstack_url"], json!(UNAVAILABLE));
        let backend_order = manifest["stacks"]["iac-assignment-backend"]["order"]
            .as_array()
            .unwrap();
        assert_eq!(backend_order.len(), result.backend.resources.len());
    }
}
