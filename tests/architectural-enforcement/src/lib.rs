//! Architectural Enforcement Integration Tests
//!
//! Source scans that keep production code inside the concurrency model:
//! - No sleep() calls (the only timer is `tokio::time::interval`)
//! - No blocking I/O inside async functions
//! - No threads; everything runs as tokio tasks
//! - No `.unwrap()` outside tests
//!
//! Only the production part of each file is scanned: everything from the
//! first top-level `#[cfg(test)]` onwards is treated as test code.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["pixelbox/core/src", "pixelbox/cli/src"];

/// The production part of one source file
#[derive(Debug)]
pub struct SourceFile {
    /// Path to the file
    pub path: PathBuf,
    /// Code lines with comments stripped, numbered from 1
    pub lines: Vec<(usize, String)>,
}

impl SourceFile {
    /// Read `path` and keep only its production code
    pub fn load(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        Some(Self {
            path: path.to_path_buf(),
            lines: production_lines(&content),
        })
    }

    /// `path:line - code` for a violation report
    pub fn describe(&self, line_number: usize, code: &str) -> String {
        format!("{}:{} - {}", self.path.display(), line_number, code.trim())
    }
}

/// Workspace root, found from this crate's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Every production `.rs` file under [`PRODUCTION_DIRS`]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    PRODUCTION_DIRS
        .iter()
        .map(|dir| root.join(dir))
        .filter(|dir| dir.exists())
        .flat_map(|dir| walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter_map(|entry| SourceFile::load(entry.path()))
        .collect()
}

/// Lines before the first top-level `#[cfg(test)]`, with `//` comments removed
pub fn production_lines(content: &str) -> Vec<(usize, String)> {
    content
        .lines()
        .take_while(|line| !line.starts_with("#[cfg(test)]"))
        .enumerate()
        .map(|(idx, line)| (idx + 1, strip_comment(line).to_string()))
        .filter(|(_, code)| !code.trim().is_empty())
        .collect()
}

/// Drop a trailing `//` comment, ignoring `//` inside string literals
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut prev = '\0';
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' if prev != '\\' => in_string = !in_string,
            '/' if !in_string && prev == '/' => return &line[..idx - 1],
            _ => {}
        }
        prev = ch;
    }
    line
}

/// Whether the code at `position` (an index into `lines`) sits in an `async fn`
pub fn is_in_async_function(lines: &[(usize, String)], position: usize) -> bool {
    for (_, code) in lines[..=position].iter().rev() {
        let code = code.trim();
        if code.contains("async fn ") {
            return true;
        }
        if code.contains("fn ") {
            return false;
        }
        if code.starts_with("impl ") || code.starts_with("mod ") {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(code: &[&str]) -> Vec<(usize, String)> {
        production_lines(&code.join("\n"))
    }

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let code = lines(&["fn a() {}", "", "#[cfg(test)]", "mod tests {", "fn b() {}", "}"]);
        assert_eq!(code, vec![(1, "fn a() {}".to_string())]);
    }

    #[test]
    fn test_comments_are_stripped() {
        assert_eq!(strip_comment("let x = 1; // sleep(1)"), "let x = 1; ");
        assert_eq!(strip_comment("/// docs"), "");
        assert_eq!(
            strip_comment(r#"let url = "http://device/";"#),
            r#"let url = "http://device/";"#
        );
    }

    #[test]
    fn test_async_function_detection() {
        let code = lines(&["async fn run() {", "    read();", "}", "fn plain() {", "    read();", "}"]);
        assert!(is_in_async_function(&code, 1));
        assert!(!is_in_async_function(&code, 4));
    }

    #[test]
    fn test_workspace_root_holds_sources() {
        assert!(workspace_root().join("pixelbox/core/src/lib.rs").exists());
        assert!(!production_sources().is_empty());
    }
}
