//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the widget core and CLI MUST NOT call sleep
//! methods. Waiting happens on I/O, channels and watch values.
//! **Exceptions**: exponential backoff (reconnect logic only), test code

use std::fs;
use std::path::Path;

use architectural_enforcement::{
    code_part, is_in_test_function, rust_files, workspace_root, PRODUCTION_DIRS,
};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Exponential backoff between reconnect attempts");
        eprintln!("  - Test code (#[test] or #[tokio::test] functions)");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - Sleep to 'wait' for a socket or response (use async I/O!)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all sleep() calls in production code
fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();
    let policy = SleepPolicy {
        allow_backoff: true,
        allow_tests: true,
    };

    for dir in PRODUCTION_DIRS {
        for file in rust_files(&workspace_root().join(dir)) {
            check_file(&file, &mut violations, &policy);
        }
    }

    violations
}

struct SleepPolicy {
    allow_backoff: bool,
    allow_tests: bool,
}

fn check_file(path: &Path, violations: &mut Vec<String>, policy: &SleepPolicy) {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return,
    };

    let lines: Vec<&str> = content.lines().collect();

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;
        let code = code_part(line);

        // Check for sleep calls
        if code.contains("::sleep(") || code.contains(".sleep(") {
            // Check if it's in a test function
            if policy.allow_tests && is_in_test_function(&lines, idx) {
                continue;
            }

            // Check if it's exponential backoff
            if policy.allow_backoff && is_backoff_context(&lines, idx) {
                continue;
            }

            violations.push(format!(
                "{}:{} - {}",
                path.display(),
                line_number,
                line.trim()
            ));
        }
    }
}

/// Check if sleep is used for exponential backoff (acceptable for reconnect logic)
fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    // Look for backoff, retry, reconnect in nearby lines
    let context_range = current_idx.saturating_sub(15)..std::cmp::min(current_idx + 5, lines.len());

    let mut has_backoff_calc = false;
    let mut has_retry_context = false;

    for i in context_range {
        let line = lines[i].to_lowercase();

        // Check for exponential backoff calculation (2^n pattern, bit shift, policy call)
        if line.contains("<<")
            || line.contains("pow")
            || line.contains("* 2")
            || line.contains("delay_for_attempt(")
        {
            has_backoff_calc = true;
        }

        // Check for retry/reconnect context
        if line.contains("retry")
            || line.contains("reconnect")
            || line.contains("backoff")
            || line.contains("attempt")
        {
            has_retry_context = true;
        }
    }

    has_backoff_calc && has_retry_context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_sleep_is_not_backoff() {
        let test_code = vec![
            "async fn wait_for_socket() {",
            "    tokio::time::sleep(Duration::from_millis(10)).await;",
            "}",
        ];

        assert!(!is_in_test_function(&test_code, 1));
        assert!(!is_backoff_context(&test_code, 1));
    }

    #[test]
    fn test_backoff_detection() {
        let test_code = vec![
            "async fn reconnect() {",
            "    let delay = policy.delay_for_attempt(attempt);",
            "    tracing::info!(attempt, \"Reconnecting after backoff\");",
            "    tokio::time::sleep(delay).await;",
            "}",
        ];

        assert!(
            is_backoff_context(&test_code, 3),
            "Should detect exponential backoff pattern"
        );
    }
}
