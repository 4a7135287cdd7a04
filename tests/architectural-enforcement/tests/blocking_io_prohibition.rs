//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Production code in the widget core and CLI MUST NOT use blocking
//! I/O inside async functions.
//! **Required**: Use `tokio::fs`, `tokio::net`, `tokio::io`, not `std::fs`, `std::net`, `std::io::stdin()`

use std::fs;
use std::path::Path;

use architectural_enforcement::{
    code_part, enclosing_fn, is_in_test_function, rust_files, workspace_root, FnKind,
    PRODUCTION_DIRS,
};

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n❌ FORBIDDEN blocking I/O:");
        eprintln!("  - std::fs::read(), std::fs::write(), std::fs::File");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - std::process::Command::output()");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await");
        eprintln!("  - tokio::net::TcpStream::connect().await");
        eprintln!("  - tokio::io::stdin() with AsyncBufReadExt");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (config loading, short terminal writes)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all blocking I/O calls in production code
fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for file in rust_files(&workspace_root().join(dir)) {
            check_file(&file, &mut violations);
        }
    }

    violations
}

/// Patterns that block the calling thread, with their category
const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("use std::fs", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("use std::net", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::io::stdout()", "Blocking stdout"),
];

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return,
    };

    let lines: Vec<&str> = content.lines().collect();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);

        let Some((_, category)) = BLOCKING_PATTERNS
            .iter()
            .find(|(pattern, _)| code.contains(pattern))
        else {
            continue;
        };

        if is_in_test_function(&lines, idx) || is_in_non_async_function(&lines, idx) {
            continue;
        }

        violations.push(format!(
            "{}:{} - {}: {}",
            path.display(),
            idx + 1,
            category,
            line.trim()
        ));
    }
}

/// Check if line is inside a non-async function (acceptable for blocking I/O)
fn is_in_non_async_function(lines: &[&str], current_idx: usize) -> bool {
    matches!(enclosing_fn(lines, current_idx), Some((_, FnKind::Sync)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_io_detection() {
        let test_code = vec![
            "pub async fn load() {",
            "    let contents = std::fs::read_to_string(\"widget.toml\")?;",
            "}",
        ];

        assert!(
            !is_in_non_async_function(&test_code, 1),
            "Should not be in non-async function"
        );
    }

    #[test]
    fn test_non_async_function_detection() {
        let test_code = vec![
            "pub fn load_config_from_path(path: Option<PathBuf>) {",
            "    let contents = std::fs::read_to_string(path)?;",
            "}",
        ];

        assert!(
            is_in_non_async_function(&test_code, 1),
            "Should detect non-async function"
        );
    }

    #[test]
    fn test_top_level_import_is_not_exempt() {
        let test_code = vec!["use std::net::TcpStream;", "", "pub struct Client;"];

        assert!(!is_in_non_async_function(&test_code, 0));
        assert!(!is_in_test_function(&test_code, 0));
    }
}
