//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep methods. Waiting happens on
//! I/O or on the reconciliation timer (`tokio::time::interval`), never on a
//! fixed delay.
//! **Exceptions**: test code (after `#[cfg(test)]`, or under `tests/`).

use architectural_enforcement::production_sources;

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (line_number, code) in &file.lines {
            if code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
            {
                violations.push(file.describe(*line_number, code));
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::time::interval for periodic work, and await I/O otherwise.");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

/// The periodic timer must skip missed ticks instead of bursting
#[test]
fn test_timer_skips_missed_ticks() {
    let files = production_sources();
    let timers: Vec<_> = files
        .iter()
        .filter(|f| f.lines.iter().any(|(_, c)| c.contains("tokio::time::interval(")))
        .collect();

    assert!(!timers.is_empty(), "expected a periodic timer in production code");
    for file in timers {
        assert!(
            file.lines
                .iter()
                .any(|(_, c)| c.contains("MissedTickBehavior::Skip")),
            "{} creates an interval without MissedTickBehavior::Skip",
            file.path.display()
        );
    }
}
