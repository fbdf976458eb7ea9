//! Shared test utilities for the thumbstack test suite.
//!
//! Builds a throwaway project that looks like the thumbnail app: one
//! directory per function under `lambdas/` and a `website/` directory.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! setup_project(tmp.path());
//! write_requirements(tmp.path(), "resize", "Pillow\n");
//! ```

use std::fs;
use std::path::Path;

/// Functions of the stock config, in declaration order.
pub const FUNCTIONS: [&str; 3] = ["resize", "list", "presign"];

// =========================================================================
// Fixture setup
// =========================================================================

/// Create `lambdas/<fn>/handler.py` for every stock function and an empty
/// `website/` directory under `root`. No function has a requirements file.
pub fn setup_project(root: &Path) {
    for name in FUNCTIONS {
        let dir = root.join("lambdas").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("handler.py"),
            format!("def handler(event, context):\n    return \"{name}\"\n"),
        )
        .unwrap();
    }
    fs::create_dir_all(root.join("website")).unwrap();
}

/// Give `function` a `requirements.txt`, which switches on the install steps.
pub fn write_requirements(root: &Path, function: &str, content: &str) {
    fs::write(
        root.join("lambdas").join(function).join("requirements.txt"),
        content,
    )
    .unwrap();
}
