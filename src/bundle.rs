//! Deployment asset bundling.
//!
//! Turns a function's source directory into a content-addressed archive the
//! function resource can point at. Bundling runs before any resource is
//! declared, because the archive hash is part of the function's config.
//!
//! ## Steps
//!
//! 1. Look up the command sequence for `(host, target)` in the
//!    [`BundlePolicy`]. A host with no entry fails here, before anything runs.
//! 2. If the directory has a `requirements.txt`, run the sequence in the
//!    function directory: clean stale output, install third-party packages
//!    into a vendor subdirectory for the target platform, flatten the vendor
//!    directory into the function root. The first non-zero exit stops the
//!    sequence and fails the run with the captured output.
//! 3. Zip the directory deterministically and hash the archive bytes. The
//!    hash is the function's change-detection key.
//!
//! ## Policy table
//!
//! | Host  | Install strategy |
//! |-------|------------------|
//! | linux | `pip --platform <manylinux tag>`: only wheels built for the target are accepted |
//! | macos | `docker run --platform <target>` in a build image matching the function runtime |
//!
//! New host/target pairs are added as table entries
//! ([`BundlePolicy::insert`]); the bundler never branches on the host itself.
//!
//! ## Reproducibility
//!
//! Entries are written in sorted path order with a fixed timestamp and fixed
//! permissions, so the archive (and its hash) depends only on file names and
//! contents. The same directory yields the same hash on any host.

use crate::cache::hash_bytes;
use crate::platform::{HostOs, TargetPlatform};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Dependency manifest that switches the install steps on.
pub const REQUIREMENTS: &str = "requirements.txt";

/// File name of every archive inside its hash directory.
pub const ARCHIVE_NAME: &str = "archive.zip";

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Unsupported build host '{0}'")]
    UnsupportedHost(String),
    #[error("No bundling policy for host {host} targeting {target}")]
    NoPolicy { host: HostOs, target: TargetPlatform },
    #[error("Function directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),
    #[error(
        "Command failed in {path} ({exit}): {command}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}",
        path = .dir.display()
    )]
    CommandFailed {
        dir: PathBuf,
        command: String,
        exit: String,
        stdout: String,
        stderr: String,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Invalid exclude pattern: {0}")]
    Pattern(#[from] globset::Error),
}

/// Bundling settings from `[bundle]` in `stack.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BundleSettings {
    /// Platform the functions run on.
    pub target: TargetPlatform,
    /// Vendor subdirectory packages are installed into before flattening.
    pub vendor_dir: String,
    /// Globs removed from the function root before installing.
    pub stale: Vec<String>,
    /// Python version passed to `pip --python-version`.
    pub python_version: String,
    /// Build image for containerized installs.
    pub build_image: String,
    /// Globs left out of the archive, matched against each entry's name and
    /// its path relative to the function directory.
    pub exclude: Vec<String>,
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            target: TargetPlatform::default(),
            vendor_dir: "libs".to_string(),
            stale: vec!["PIL".into(), "Pillow*".into(), "*.dist-info".into()],
            python_version: "3.9".to_string(),
            build_image: "public.ecr.aws/sam/build-python3.9".to_string(),
            exclude: vec!["__pycache__".into(), "*.pyc".into(), ".DS_Store".into()],
        }
    }
}

// =============================================================================
// Command execution
// =============================================================================

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs one shell command synchronously in a working directory.
pub trait CommandRunner: Sync {
    fn run(&self, command: &str, cwd: &Path) -> io::Result<CommandOutput>;
}

/// Production runner: `sh -c <command>` with stdout/stderr captured.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, cwd: &Path) -> io::Result<CommandOutput> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .output()?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// =============================================================================
// Policy table
// =============================================================================

const CLEAN: &str = "rm -rf {vendor} {stale} && mkdir -p {vendor}";
const FLATTEN: &str = "cp -R {vendor}/. . && rm -rf {vendor}";
const PIP_FOR_PLATFORM: &str = "pip install -qq --root-user-action=ignore -r requirements.txt -t {vendor} \
     --platform {wheel_tag} --python-version {python} --no-deps";
const PIP_IN_CONTAINER: &str = "docker run --rm --platform {container_platform} -v \"$PWD\":/var/task {image} \
     /bin/sh -c \"pip install -qq --root-user-action=ignore -r requirements.txt -t {vendor}\"";

/// Ordered command templates keyed by `(host, target)`.
#[derive(Debug, Clone, Default)]
pub struct BundlePolicy {
    table: BTreeMap<(HostOs, TargetPlatform), Vec<String>>,
}

impl BundlePolicy {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Linux hosts install target-tagged wheels directly; macOS hosts
    /// install inside a Linux build container.
    pub fn standard() -> Self {
        let mut policy = Self::empty();
        for target in [TargetPlatform::LinuxX86_64, TargetPlatform::LinuxArm64] {
            policy.insert(
                HostOs::Linux,
                target,
                [CLEAN, PIP_FOR_PLATFORM, FLATTEN].map(String::from).to_vec(),
            );
            policy.insert(
                HostOs::MacOs,
                target,
                [CLEAN, PIP_IN_CONTAINER, FLATTEN].map(String::from).to_vec(),
            );
        }
        policy
    }

    pub fn insert(&mut self, host: HostOs, target: TargetPlatform, steps: Vec<String>) {
        self.table.insert((host, target), steps);
    }

    pub fn steps(&self, host: HostOs, target: TargetPlatform) -> Result<&[String], BundleError> {
        self.table
            .get(&(host, target))
            .map(Vec::as_slice)
            .ok_or(BundleError::NoPolicy { host, target })
    }
}

/// Fill the placeholders of a command template.
pub fn render_command(template: &str, settings: &BundleSettings) -> String {
    template
        .replace("{vendor}", &settings.vendor_dir)
        .replace("{stale}", &settings.stale.join(" "))
        .replace("{wheel_tag}", settings.target.wheel_tag())
        .replace("{container_platform}", settings.target.container_platform())
        .replace("{python}", &settings.python_version)
        .replace("{image}", &settings.build_image)
}

// =============================================================================
// Bundler
// =============================================================================

/// A content-addressed deployment archive for one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    /// Function name (the source directory's name).
    pub name: String,
    pub source_dir: PathBuf,
    pub archive_path: PathBuf,
    /// SHA-256 of the archive bytes, hex encoded.
    pub hash: String,
}

/// Bundled assets keyed by function name.
#[derive(Debug, Clone, Default)]
pub struct AssetSet(BTreeMap<String, Asset>);

impl AssetSet {
    pub fn get(&self, name: &str) -> Option<&Asset> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Asset> for AssetSet {
    fn from_iter<I: IntoIterator<Item = Asset>>(iter: I) -> Self {
        Self(iter.into_iter().map(|a| (a.name.clone(), a)).collect())
    }
}

pub struct AssetBundler<'a, R: CommandRunner> {
    runner: &'a R,
    policy: &'a BundlePolicy,
    host: HostOs,
    settings: &'a BundleSettings,
    exclude: GlobSet,
    asset_dir: PathBuf,
}

impl<'a, R: CommandRunner> AssetBundler<'a, R> {
    pub fn new(
        runner: &'a R,
        policy: &'a BundlePolicy,
        host: HostOs,
        settings: &'a BundleSettings,
        asset_dir: &Path,
    ) -> Result<Self, BundleError> {
        Ok(Self {
            runner,
            policy,
            host,
            settings,
            exclude: exclude_set(&settings.exclude)?,
            asset_dir: asset_dir.to_path_buf(),
        })
    }

    /// Bundle one function directory into an archive under the asset dir.
    pub fn bundle(&self, function_dir: &Path) -> Result<Asset, BundleError> {
        let steps = self.policy.steps(self.host, self.settings.target)?;
        if !function_dir.is_dir() {
            return Err(BundleError::MissingDirectory(function_dir.to_path_buf()));
        }
        let name = function_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BundleError::MissingDirectory(function_dir.to_path_buf()))?;

        if function_dir.join(REQUIREMENTS).is_file() {
            tracing::info!(
                function = %name,
                host = %self.host,
                target = %self.settings.target,
                "installing dependencies"
            );
            for step in steps {
                self.run_step(&render_command(step, self.settings), function_dir)?;
            }
        }

        let bytes = archive_directory(function_dir, &self.exclude)?;
        let hash = hash_bytes(&bytes);
        let archive_dir = self.asset_dir.join(&name).join(&hash);
        let archive_path = archive_dir.join(ARCHIVE_NAME);
        if !archive_path.exists() {
            fs::create_dir_all(&archive_dir)?;
            fs::write(&archive_path, &bytes)?;
        }
        tracing::info!(function = %name, hash = %short_hash(&hash), "bundled");

        Ok(Asset {
            name,
            source_dir: function_dir.to_path_buf(),
            archive_path,
            hash,
        })
    }

    /// Bundle independent function directories in parallel. Any failure
    /// fails the whole batch.
    pub fn bundle_all(&self, function_dirs: &[PathBuf]) -> Result<Vec<Asset>, BundleError> {
        function_dirs
            .par_iter()
            .map(|dir| self.bundle(dir))
            .collect()
    }

    fn run_step(&self, command: &str, cwd: &Path) -> Result<(), BundleError> {
        tracing::debug!(dir = %cwd.display(), %command, "running");
        let output = self.runner.run(command, cwd)?;
        if output.success() {
            return Ok(());
        }
        tracing::error!(
            dir = %cwd.display(),
            %command,
            code = ?output.code,
            stdout = %output.stdout,
            stderr = %output.stderr,
            "bundling command failed"
        );
        Err(BundleError::CommandFailed {
            dir: cwd.to_path_buf(),
            command: command.to_string(),
            exit: match output.code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            },
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// First 8 hex characters, for display.
pub fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(8)]
}

/// Compile archive exclude patterns.
pub fn exclude_set(patterns: &[String]) -> Result<GlobSet, BundleError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Zip `dir` with sorted entries, fixed timestamps and fixed permissions.
pub fn archive_directory(dir: &Path, exclude: &GlobSet) -> Result<Vec<u8>, BundleError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_excluded(e, dir, exclude));

    for entry in walker {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if entry.file_type().is_dir() {
            writer.add_directory(format!("{name}/"), entry_options(0o755))?;
        } else {
            writer.start_file(name, entry_options(0o644))?;
            writer.write_all(&fs::read(entry.path())?)?;
        }
    }

    Ok(writer.finish()?.into_inner())
}

fn entry_options(mode: u32) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(mode)
}

fn is_excluded(entry: &walkdir::DirEntry, root: &Path, exclude: &GlobSet) -> bool {
    exclude.is_match(entry.file_name())
        || entry
            .path()
            .strip_prefix(root)
            .is_ok_and(|relative| exclude.is_match(relative))
}
