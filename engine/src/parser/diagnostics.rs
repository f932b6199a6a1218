//! Failure messages derived from tool stderr.

use memtriage_core::{STDERR_EXCERPT_LIMIT, truncate_chars};

/// Diagnostics the memory-analysis framework prints for well-known failure
/// modes, checked in order.
pub const KNOWN_DIAGNOSTICS: [&str; 5] = [
    "Unable to validate the plugin requirements",
    "No such file or directory",
    "Unable to determine symbol table",
    "Unsatisfied requirement plugins",
    "No valid profile found",
];

/// Message used when stderr is empty.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Message used when stderr holds only whitespace.
pub const EXECUTION_FAILED: &str = "Execution failed";

/// Builds a short failure message from a plugin run's stderr.
///
/// A known diagnostic anywhere in stderr returns the whole stderr; otherwise
/// the first non-blank line. Both are truncated to 500 characters.
///
/// # Examples
///
/// ```
/// use memtriage_engine::parser::extract_error_message;
///
/// assert_eq!(extract_error_message(""), "Unknown error");
/// assert_eq!(extract_error_message("  \n\t\n"), "Execution failed");
/// assert_eq!(extract_error_message("\n  first line  \nsecond"), "first line");
///
/// let stderr = "Volatility 3 Framework\nUnable to determine symbol table for kernel\n";
/// assert_eq!(extract_error_message(stderr), stderr);
/// ```
pub fn extract_error_message(stderr: &str) -> String {
    if stderr.is_empty() {
        return UNKNOWN_ERROR.to_string();
    }

    if KNOWN_DIAGNOSTICS.iter().any(|pattern| stderr.contains(pattern)) {
        return truncate_chars(stderr, STDERR_EXCERPT_LIMIT);
    }

    stderr
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map_or_else(
            || EXECUTION_FAILED.to_string(),
            |line| truncate_chars(line, STDERR_EXCERPT_LIMIT),
        )
}

/// Builds a failure message from an analyzer run's stderr.
///
/// Analyzers report their whole stderr, truncated; empty stderr falls back
/// to the same messages as [`extract_error_message`].
pub fn analyzer_error_message(stderr: &str) -> String {
    if stderr.is_empty() {
        UNKNOWN_ERROR.to_string()
    } else if stderr.trim().is_empty() {
        EXECUTION_FAILED.to_string()
    } else {
        truncate_chars(stderr, STDERR_EXCERPT_LIMIT)
    }
}
