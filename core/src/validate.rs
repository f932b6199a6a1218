//! Result invariant checks.
//!
//! Catches results whose fields disagree with their status before they are
//! handed to the persistence layer.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use memtriage_core::*;
//!
//! let ok = SingleExecutionResult::started("windows.pslist")
//!     .succeeded(0, ParsedOutput::Rows(vec![]), Duration::from_secs(1));
//! assert!(validate_result(&ok, None).is_empty());
//!
//! // Failed without a message
//! let mut bad = SingleExecutionResult::started("windows.pslist")
//!     .failed(1, "boom", None, Duration::ZERO);
//! bad.error_message = None;
//! assert!(!validate_result(&bad, None).is_empty());
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::{
    AnalysisBundle, BranchOutcome, CombinedResult, ExecutionStatus, STDERR_EXCERPT_LIMIT,
    SingleExecutionResult,
};

/// Invariant violations found on a result or bundle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResultViolation {
    #[error("result has an empty tool name")]
    EmptyToolName,
    /// Returned results must carry a terminal status.
    #[error("{tool}: status {status} is not terminal")]
    NonTerminalStatus {
        tool: String,
        status: ExecutionStatus,
    },
    #[error("{tool}: terminal result has no completion time")]
    MissingCompletion { tool: String },
    #[error("{tool}: completed before it started")]
    CompletedBeforeStart { tool: String },
    #[error("{tool}: negative execution time {seconds}")]
    NegativeElapsed { tool: String, seconds: f64 },
    #[error("{tool}: success without parsed output")]
    SuccessWithoutOutput { tool: String },
    #[error("{tool}: success carries an error message")]
    SuccessWithError { tool: String },
    #[error("{tool}: failure without an error message")]
    FailedWithoutError { tool: String },
    #[error("{tool}: timeout carries parsed output")]
    TimeoutWithOutput { tool: String },
    /// Timed-out runs report exactly the configured limit.
    #[error("{tool}: timeout elapsed {actual}s does not match limit {expected}s")]
    TimeoutElapsedMismatch {
        tool: String,
        expected: f64,
        actual: f64,
    },
    #[error("{tool}: record_count {actual} does not match parsed output length {expected}")]
    RecordCountMismatch {
        tool: String,
        expected: usize,
        actual: usize,
    },
    #[error("{tool}: stderr excerpt exceeds {STDERR_EXCERPT_LIMIT} characters")]
    StderrExcerptTooLong { tool: String },
    #[error("bundle format version cannot be empty")]
    EmptyFormatVersion,
    #[error("plugin map key {key} does not match result tool name {tool}")]
    PluginKeyMismatch { key: String, tool: String },
    #[error("profile confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

/// Validates one execution result.
///
/// When `configured_timeout` is given, a `Timeout` result must report
/// exactly that limit as its execution time. Every violation is returned,
/// not only the first.
pub fn validate_result(
    result: &SingleExecutionResult,
    configured_timeout: Option<Duration>,
) -> Vec<ResultViolation> {
    let mut violations = Vec::new();
    let tool = || result.tool_name.clone();

    if result.tool_name.trim().is_empty() {
        violations.push(ResultViolation::EmptyToolName);
    }

    if !result.status.is_terminal() {
        violations.push(ResultViolation::NonTerminalStatus {
            tool: tool(),
            status: result.status,
        });
        return violations;
    }

    match result.completed_at {
        None => violations.push(ResultViolation::MissingCompletion { tool: tool() }),
        Some(completed) if completed < result.started_at => {
            violations.push(ResultViolation::CompletedBeforeStart { tool: tool() });
        }
        Some(_) => {}
    }

    if result.execution_time_seconds < 0.0 || result.execution_time_seconds.is_nan() {
        violations.push(ResultViolation::NegativeElapsed {
            tool: tool(),
            seconds: result.execution_time_seconds,
        });
    }

    let expected_count = result.parsed_output.as_ref().map_or(0, |p| p.len());
    if result.record_count != expected_count {
        violations.push(ResultViolation::RecordCountMismatch {
            tool: tool(),
            expected: expected_count,
            actual: result.record_count,
        });
    }

    if let Some(excerpt) = &result.stderr_excerpt {
        if excerpt.chars().count() > STDERR_EXCERPT_LIMIT {
            violations.push(ResultViolation::StderrExcerptTooLong { tool: tool() });
        }
    }

    match result.status {
        ExecutionStatus::Success => {
            if result.parsed_output.is_none() {
                violations.push(ResultViolation::SuccessWithoutOutput { tool: tool() });
            }
            if result.error_message.is_some() {
                violations.push(ResultViolation::SuccessWithError { tool: tool() });
            }
        }
        ExecutionStatus::Failed => {
            if result.error_message.is_none() {
                violations.push(ResultViolation::FailedWithoutError { tool: tool() });
            }
        }
        ExecutionStatus::Timeout => {
            if result.parsed_output.is_some() {
                violations.push(ResultViolation::TimeoutWithOutput { tool: tool() });
            }
            if let Some(limit) = configured_timeout {
                let expected = limit.as_secs_f64();
                if (result.execution_time_seconds - expected).abs() > f64::EPSILON {
                    violations.push(ResultViolation::TimeoutElapsedMismatch {
                        tool: tool(),
                        expected,
                        actual: result.execution_time_seconds,
                    });
                }
            }
        }
        ExecutionStatus::Pending | ExecutionStatus::Running => {}
    }

    violations
}

/// Validates a bundle and every result it contains.
///
/// Plugin results are checked against `plugin_timeout` when given.
pub fn validate_bundle(
    bundle: &AnalysisBundle,
    plugin_timeout: Option<Duration>,
) -> Vec<ResultViolation> {
    let mut violations = Vec::new();

    if bundle.format_version.trim().is_empty() {
        violations.push(ResultViolation::EmptyFormatVersion);
    }

    if let Some(profile) = &bundle.profile {
        if !(0.0..=1.0).contains(&profile.confidence) {
            violations.push(ResultViolation::ConfidenceOutOfRange(profile.confidence));
        }
    }

    for (key, result) in &bundle.plugins {
        if key != &result.tool_name {
            violations.push(ResultViolation::PluginKeyMismatch {
                key: key.clone(),
                tool: result.tool_name.clone(),
            });
        }
        violations.extend(validate_result(result, plugin_timeout));
    }

    for artifact in &bundle.artifacts {
        violations.extend(validate_combined(artifact));
    }

    violations
}

fn validate_combined(combined: &CombinedResult) -> Vec<ResultViolation> {
    [&combined.signature_scan, &combined.metadata]
        .into_iter()
        .flatten()
        .filter_map(BranchOutcome::result)
        .flat_map(|result| validate_result(result, None))
        .collect()
}
