//! Asset manifest for change detection between runs.
//!
//! Every function archive is content-addressed: its SHA-256 is both the
//! directory it is written to and the `source_code_hash` the function
//! resource carries. This module remembers the hash each function had on the
//! previous run so the pipeline can report which functions actually changed.
//!
//! ## Storage
//!
//! The manifest is a JSON file at `<out_dir>/.asset-manifest.json`, next to
//! the synthesized stacks. A missing, unparsable or wrong-version manifest is
//! treated as empty: every function then reports as new. Nothing is skipped
//! because of the manifest; it only feeds the summary.
//!
//! ## Bypassing
//!
//! `--no-cache` loads an empty manifest, so every function reports as new.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

const MANIFEST_FILENAME: &str = ".asset-manifest.json";

/// Bump to discard manifests written by an incompatible format.
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetEntry {
    pub hash: String,
    /// Archive path relative to the output directory.
    pub archive: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetManifest {
    pub version: u32,
    pub entries: BTreeMap<String, AssetEntry>,
}

/// How a function's archive compares to the previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
    New,
    Unchanged,
    Changed,
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
        })
    }
}

impl AssetManifest {
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: BTreeMap::new(),
        }
    }

    /// Load from the output directory; empty on any read or parse problem.
    pub fn load(out_dir: &Path) -> Self {
        let content = match std::fs::read_to_string(manifest_path(out_dir)) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        let manifest: Self = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(_) => return Self::empty(),
        };
        if manifest.version != MANIFEST_VERSION {
            return Self::empty();
        }
        manifest
    }

    pub fn save(&self, out_dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(out_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(manifest_path(out_dir), json)
    }

    pub fn status(&self, name: &str, hash: &str) -> AssetStatus {
        match self.entries.get(name) {
            None => AssetStatus::New,
            Some(entry) if entry.hash == hash => AssetStatus::Unchanged,
            Some(_) => AssetStatus::Changed,
        }
    }

    /// Record the current hash of a function, replacing any previous entry.
    pub fn record(&mut self, name: &str, hash: &str, archive: String) {
        self.entries.insert(
            name.to_string(),
            AssetEntry {
                hash: hash.to_string(),
                archive,
            },
        );
    }

    /// Drop entries for functions that no longer exist.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.entries.retain(|name, _| keep(name));
    }
}

/// SHA-256 of a byte slice as a hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Per-run tally of asset statuses.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeStats {
    pub new: u32,
    pub unchanged: u32,
    pub changed: u32,
}

impl ChangeStats {
    pub fn count(&mut self, status: AssetStatus) {
        match status {
            AssetStatus::New => self.new += 1,
            AssetStatus::Unchanged => self.unchanged += 1,
            AssetStatus::Changed => self.changed += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.new + self.unchanged + self.changed
    }
}

impl fmt::Display for ChangeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unchanged == 0 && self.changed == 0 {
            return write!(f, "{} new", self.new);
        }
        write!(
            f,
            "{} unchanged, {} changed, {} new ({} total)",
            self.unchanged,
            self.changed,
            self.new,
            self.total()
        )
    }
}

pub fn manifest_path(out_dir: &Path) -> PathBuf {
    out_dir.join(MANIFEST_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // =========================================================================
    // Status
    // =========================================================================

    #[test]
    fn unknown_function_is_new() {
        let m = AssetManifest::empty();
        assert_eq!(m.status("resize", "abc"), AssetStatus::New);
    }

    #[test]
    fn same_hash_is_unchanged() {
        let mut m = AssetManifest::empty();
        m.record("resize", "abc", "assets/resize/abc/archive.zip".into());
        assert_eq!(m.status("resize", "abc"), AssetStatus::Unchanged);
        assert_eq!(m.status("resize", "def"), AssetStatus::Changed);
    }

    #[test]
    fn record_replaces_previous_hash() {
        let mut m = AssetManifest::empty();
        m.record("list", "old", "a".into());
        m.record("list", "new", "b".into());
        assert_eq!(m.entries.len(), 1);
        assert_eq!(m.entries["list"].hash, "new");
    }

    #[test]
    fn retain_drops_removed_functions() {
        let mut m = AssetManifest::empty();
        m.record("list", "h1", "a".into());
        m.record("gone", "h2", "b".into());
        m.retain(|name| name == "list");
        assert!(m.entries.contains_key("list"));
        assert!(!m.entries.contains_key("gone"));
    }

    // =========================================================================
    // Save / load
    // =========================================================================

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let mut m = AssetManifest::empty();
        m.record("presign", "h", "assets/presign/h/archive.zip".into());
        m.save(tmp.path()).unwrap();
        assert_eq!(AssetManifest::load(tmp.path()), m);
    }

    #[test]
    fn save_creates_out_dir() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("cdktf.out");
        AssetManifest::empty().save(&out).unwrap();
        assert!(manifest_path(&out).exists());
    }

    #[test]
    fn load_missing_or_corrupt_returns_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(AssetManifest::load(tmp.path()).entries.is_empty());
        fs::write(manifest_path(tmp.path()), "not json").unwrap();
        assert!(AssetManifest::load(tmp.path()).entries.is_empty());
    }

    #[test]
    fn load_wrong_version_returns_empty() {
        let tmp = TempDir::new().unwrap();
        let json = format!(
            r#"{{"version": {}, "entries": {{"a": {{"hash":"h","archive":"x"}}}}}}"#,
            MANIFEST_VERSION + 1
        );
        fs::write(manifest_path(tmp.path()), json).unwrap();
        assert!(AssetManifest::load(tmp.path()).entries.is_empty());
    }

    // =========================================================================
    // Hashing
    // =========================================================================

    #[test]
    fn hash_is_hex_sha256() {
        let h = hash_bytes(b"hello world");
        assert_eq!(h.len(), 64);
        assert!(h.starts_with("b94d27b9"));
    }

    #[test]
    fn hash_changes_with_content() {
        assert_ne!(hash_bytes(b"version 1"), hash_bytes(b"version 2"));
    }

    // =========================================================================
    // ChangeStats
    // =========================================================================

    #[test]
    fn stats_display_first_run() {
        let mut s = ChangeStats::default();
        s.count(AssetStatus::New);
        s.count(AssetStatus::New);
        assert_eq!(s.to_string(), "2 new");
    }

    #[test]
    fn stats_display_mixed() {
        let mut s = ChangeStats::default();
        s.count(AssetStatus::Unchanged);
        s.count(AssetStatus::Unchanged);
        s.count(AssetStatus::Changed);
        assert_eq!(s.to_string(), "2 unchanged, 1 changed, 0 new (3 total)");
    }
}
