//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Production code MUST NOT block the runtime.
//! - No `reqwest::blocking`, no `std::net`
//! - No `std::fs` or stdin/stdout handles inside `async fn`
//!   (use `tokio::fs`, or do it in a plain fn before/after awaiting)
//! - No OS threads; concurrency is tokio tasks only
//! - No `.unwrap()`; errors propagate with `?`

use architectural_enforcement::{is_in_async_function, production_sources};

fn report(kind: &str, violations: &[String]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n{kind} found in production code:\n");
    for violation in violations {
        eprintln!("  {violation}");
    }
    panic!("\nFound {} {kind} violation(s).", violations.len());
}

/// Test that production code does not use blocking I/O in async context
#[test]
fn test_no_blocking_io_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (position, (line_number, code)) in file.lines.iter().enumerate() {
            if code.contains("reqwest::blocking") {
                violations.push(file.describe(*line_number, code));
            }
            if code.contains("std::net::") || code.contains("use std::net") {
                violations.push(file.describe(*line_number, code));
            }
            let blocking_call = code.contains("std::fs::")
                || code.contains("std::io::stdin()")
                || code.contains("std::io::stdout()");
            if blocking_call && is_in_async_function(&file.lines, position) {
                violations.push(file.describe(*line_number, code));
            }
        }
    }

    report("Blocking I/O", &violations);
}

/// Test that production code spawns no OS threads
#[test]
fn test_no_threads_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (line_number, code) in &file.lines {
            if code.contains("thread::spawn") || code.contains("std::thread") {
                violations.push(file.describe(*line_number, code));
            }
        }
    }

    report("Thread", &violations);
}

/// Test that production code does not unwrap
#[test]
fn test_no_unwrap_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (line_number, code) in &file.lines {
            if code.contains(".unwrap()") {
                violations.push(file.describe(*line_number, code));
            }
        }
    }

    report("unwrap()", &violations);
}
