//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the webchat production sources:
//! - No sleep() calls outside reconnect backoff
//! - No blocking I/O inside async functions
//!
//! The helpers below are shared by the test files under `tests/`. They work on
//! plain source lines; nothing is parsed.

use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["webchat/core/src", "webchat/cli/src"];

/// Workspace root (two levels above this package)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// All `.rs` files below a directory
#[must_use]
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect()
}

/// Code part of a line, without a trailing `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Kind of function a line declares
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnKind {
    /// `fn`
    Sync,
    /// `async fn`
    Async,
}

/// Detect a function declaration, ignoring visibility
#[must_use]
pub fn fn_kind(line: &str) -> Option<FnKind> {
    let mut line = line.trim();
    for prefix in ["pub(crate) ", "pub(super) ", "pub "] {
        if let Some(rest) = line.strip_prefix(prefix) {
            line = rest;
            break;
        }
    }

    if line.starts_with("async fn ") {
        Some(FnKind::Async)
    } else if line.starts_with("fn ") {
        Some(FnKind::Sync)
    } else {
        None
    }
}

/// Kind of the function enclosing `current_idx`, scanning backwards
#[must_use]
pub fn enclosing_fn(lines: &[&str], current_idx: usize) -> Option<(usize, FnKind)> {
    for i in (0..current_idx).rev() {
        if let Some(kind) = fn_kind(lines[i]) {
            return Some((i, kind));
        }

        // Stop at module boundaries
        let line = lines[i].trim();
        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return None;
        }
    }
    None
}

/// Check if line is inside a test function
#[must_use]
pub fn is_in_test_function(lines: &[&str], current_idx: usize) -> bool {
    let Some((fn_idx, _)) = enclosing_fn(lines, current_idx) else {
        return false;
    };

    // Scan backwards from the function to find test markers
    for i in (0..fn_idx).rev() {
        let line = lines[i].trim();

        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            return true;
        }

        // Stop at the previous item
        if fn_kind(line).is_some() || line.starts_with("mod ") || line == "}" {
            break;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_kind_ignores_visibility() {
        assert_eq!(fn_kind("pub fn load() {"), Some(FnKind::Sync));
        assert_eq!(fn_kind("    pub(crate) async fn supervise("), Some(FnKind::Async));
        assert_eq!(fn_kind("async fn main() -> Result<()> {"), Some(FnKind::Async));
        assert_eq!(fn_kind("let f = fn_kind(line);"), None);
    }

    #[test]
    fn test_test_function_detection() {
        let code = vec![
            "#[tokio::test(start_paused = true)]",
            "async fn test_backoff() {",
            "    tokio::time::sleep(Duration::from_millis(1500)).await;",
            "}",
        ];
        assert!(is_in_test_function(&code, 2));

        let code = vec![
            "pub async fn run() {",
            "    tokio::time::sleep(Duration::from_millis(10)).await;",
            "}",
        ];
        assert!(!is_in_test_function(&code, 1));
    }

    #[test]
    fn test_production_dirs_exist() {
        for dir in PRODUCTION_DIRS {
            assert!(
                workspace_root().join(dir).is_dir(),
                "missing production directory {dir}"
            );
        }
    }
}
