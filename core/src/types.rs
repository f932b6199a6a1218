//! Result type definitions for external tool runs.
//!
//! Every invocation of an external analysis tool ends in one
//! [`SingleExecutionResult`]. The types serialize with [`serde`] so callers
//! can persist them as JSON without any translation layer.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of characters kept from captured stderr and from
/// stderr-derived error messages.
pub const STDERR_EXCERPT_LIMIT: usize = 500;

/// Exit code reported when a process never launched or was killed.
pub const NOT_EXITED_CODE: i32 = -1;

/// Lifecycle status of one execution.
///
/// `Pending` and `Running` are transient; a returned result always carries
/// exactly one of the terminal states.
///
/// # Examples
///
/// ```
/// use memtriage_core::ExecutionStatus;
///
/// assert!(!ExecutionStatus::Running.is_terminal());
/// assert!(ExecutionStatus::Timeout.is_terminal());
/// assert_eq!(ExecutionStatus::Success.to_string(), "success");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
}

impl ExecutionStatus {
    /// Returns `true` for `Success`, `Failed` and `Timeout`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// One embedded-signature hit reported by the signature scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureFinding {
    /// Decimal byte offset into the scanned file.
    pub offset: u64,
    /// Offset exactly as the scanner printed it (e.g. `0x29`).
    pub offset_hex: String,
    pub description: String,
}

/// Grouped tag metadata produced by the metadata extractor.
///
/// Tags are keyed by group (`File`, `EXIF`, `PE`, ...) and then by short tag
/// name. `file_type` is lifted out of the tags when the extractor reported
/// one.
///
/// # Examples
///
/// ```
/// use memtriage_core::MetadataRecord;
///
/// let mut record = MetadataRecord::default();
/// record.insert("File", "FileType", serde_json::json!("PNG"));
/// record.insert("PNG", "ImageWidth", serde_json::json!(1920));
///
/// assert_eq!(record.tag_count(), 2);
/// assert_eq!(record.get("File", "FileType"), Some(&serde_json::json!("PNG")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub groups: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

impl MetadataRecord {
    /// Inserts one tag value, creating its group on demand.
    pub fn insert(&mut self, group: impl Into<String>, tag: impl Into<String>, value: Value) {
        self.groups
            .entry(group.into())
            .or_default()
            .insert(tag.into(), value);
    }

    pub fn get(&self, group: &str, tag: &str) -> Option<&Value> {
        self.groups.get(group).and_then(|tags| tags.get(tag))
    }

    /// Total number of tags across all groups.
    pub fn tag_count(&self) -> usize {
        self.groups.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tag_count() == 0
    }
}

/// Structured records decoded from one tool run.
///
/// The variant records which decoder produced the data. Record ordering is
/// the order in which the tool emitted them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "records", rename_all = "snake_case")]
pub enum ParsedOutput {
    /// One JSON value per decoded JSONL line (analysis framework plugins).
    Rows(Vec<Value>),
    /// Signature table rows in scanner emission order.
    Signatures(Vec<SignatureFinding>),
    /// First element of the metadata extractor's output array.
    Metadata(MetadataRecord),
}

impl ParsedOutput {
    /// Number of records; for metadata this is the number of tags.
    pub fn len(&self) -> usize {
        match self {
            Self::Rows(rows) => rows.len(),
            Self::Signatures(findings) => findings.len(),
            Self::Metadata(record) => record.tag_count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of running one external tool against one input.
///
/// Construct results with [`SingleExecutionResult::started`] and finish them
/// with exactly one of [`succeeded`](Self::succeeded),
/// [`failed`](Self::failed) or [`timed_out`](Self::timed_out). The finishing
/// methods keep `record_count`, `exit_code` and the timing fields consistent
/// with the chosen status.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use memtriage_core::{ExecutionStatus, ParsedOutput, SingleExecutionResult};
///
/// let result = SingleExecutionResult::started("windows.pslist")
///     .succeeded(0, ParsedOutput::Rows(vec![serde_json::json!({"PID": 4})]), Duration::from_millis(1500));
/// assert_eq!(result.status, ExecutionStatus::Success);
/// assert_eq!(result.record_count, 1);
///
/// let timed_out = SingleExecutionResult::started("windows.malfind")
///     .timed_out(Duration::from_secs(3600));
/// assert_eq!(timed_out.execution_time_seconds, 3600.0);
/// assert_eq!(timed_out.exit_code, -1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleExecutionResult {
    /// Plugin name for the analysis framework, tool name for analyzers.
    pub tool_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_seconds: f64,
    pub status: ExecutionStatus,
    pub exit_code: i32,
    pub parsed_output: Option<ParsedOutput>,
    pub record_count: usize,
    pub raw_output_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub stderr_excerpt: Option<String>,
    /// Files carved out of the input by the signature scanner.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extracted_files: Vec<PathBuf>,
}

impl SingleExecutionResult {
    /// Creates a `Running` result stamped with the current time.
    pub fn started(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            started_at: Utc::now(),
            completed_at: None,
            execution_time_seconds: 0.0,
            status: ExecutionStatus::Running,
            exit_code: NOT_EXITED_CODE,
            parsed_output: None,
            record_count: 0,
            raw_output_path: None,
            error_message: None,
            stderr_excerpt: None,
            extracted_files: Vec::new(),
        }
    }

    /// Result for a tool switched off by configuration. No process ran.
    pub fn disabled(tool_name: impl Into<String>, tool_label: &str) -> Self {
        let mut result = Self::started(tool_name);
        result.completed_at = Some(result.started_at);
        result.status = ExecutionStatus::Failed;
        result.error_message = Some(format!("{tool_label} is disabled"));
        result
    }

    /// Finishes the run as `Success`.
    pub fn succeeded(mut self, exit_code: i32, parsed: ParsedOutput, elapsed: Duration) -> Self {
        self.finish(ExecutionStatus::Success, elapsed);
        self.exit_code = exit_code;
        self.record_count = parsed.len();
        self.parsed_output = Some(parsed);
        self.error_message = None;
        self
    }

    /// Finishes the run as `Failed`.
    ///
    /// Partially decoded output is kept when available; a tool that exits
    /// non-zero after writing half its rows still yields those rows.
    pub fn failed(
        mut self,
        exit_code: i32,
        message: impl Into<String>,
        parsed: Option<ParsedOutput>,
        elapsed: Duration,
    ) -> Self {
        self.finish(ExecutionStatus::Failed, elapsed);
        self.exit_code = exit_code;
        self.record_count = parsed.as_ref().map_or(0, ParsedOutput::len);
        self.parsed_output = parsed;
        self.error_message = Some(message.into());
        self
    }

    /// Finishes the run as `Timeout`. Elapsed time is pinned to `limit`.
    pub fn timed_out(mut self, limit: Duration) -> Self {
        self.finish(ExecutionStatus::Timeout, limit);
        self.exit_code = NOT_EXITED_CODE;
        self.parsed_output = None;
        self.record_count = 0;
        self.raw_output_path = None;
        self.error_message = Some(format!(
            "Execution timed out after {}s",
            limit.as_secs_f64()
        ));
        self
    }

    /// Stores a bounded excerpt of stderr; empty stderr leaves it unset.
    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr_excerpt = if stderr.is_empty() {
            None
        } else {
            Some(truncate_chars(stderr, STDERR_EXCERPT_LIMIT))
        };
        self
    }

    pub fn with_raw_output(mut self, path: Option<PathBuf>) -> Self {
        self.raw_output_path = path;
        self
    }

    pub fn with_extracted_files(mut self, files: Vec<PathBuf>) -> Self {
        self.extracted_files = files;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Decoded JSONL rows, when this result came from a plugin run.
    pub fn rows(&self) -> Option<&[Value]> {
        match &self.parsed_output {
            Some(ParsedOutput::Rows(rows)) => Some(rows),
            _ => None,
        }
    }

    pub fn signatures(&self) -> Option<&[SignatureFinding]> {
        match &self.parsed_output {
            Some(ParsedOutput::Signatures(findings)) => Some(findings),
            _ => None,
        }
    }

    pub fn metadata(&self) -> Option<&MetadataRecord> {
        match &self.parsed_output {
            Some(ParsedOutput::Metadata(record)) => Some(record),
            _ => None,
        }
    }

    fn finish(&mut self, status: ExecutionStatus, elapsed: Duration) {
        self.status = status;
        self.execution_time_seconds = elapsed.as_secs_f64();
        self.completed_at = Some(Utc::now());
    }
}

/// Coarse operating-system family of a memory image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsCategory {
    Windows,
    Linux,
    #[serde(rename = "macOS")]
    MacOs,
    Unknown,
}

impl fmt::Display for OsCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Windows => write!(f, "Windows"),
            Self::Linux => write!(f, "Linux"),
            Self::MacOs => write!(f, "macOS"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How a profile detection result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Classified from banner-plugin output.
    Banners,
    /// The banner invocation itself failed.
    Fallback,
}

/// Confidence assigned when banner output names a known OS family.
pub const KNOWN_OS_CONFIDENCE: f64 = 0.8;

/// Confidence assigned when banner output names no known OS family.
pub const UNKNOWN_OS_CONFIDENCE: f64 = 0.3;

/// Profile name recorded by detection; the framework picks symbols itself.
pub const AUTO_PROFILE: &str = "auto";

fn auto_profile() -> String {
    AUTO_PROFILE.to_string()
}

/// OS fingerprint of one memory image.
///
/// # Examples
///
/// ```
/// use memtriage_core::{DetectionMethod, OsCategory, ProfileDetectionResult};
///
/// let known = ProfileDetectionResult::from_banners(OsCategory::Linux);
/// assert_eq!(known.confidence, 0.8);
///
/// let fallback = ProfileDetectionResult::fallback("spawn failed");
/// assert_eq!(fallback.os_category, OsCategory::Unknown);
/// assert_eq!(fallback.method, DetectionMethod::Fallback);
/// assert_eq!(fallback.confidence, 0.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDetectionResult {
    /// Always [`AUTO_PROFILE`].
    #[serde(default = "auto_profile")]
    pub profile: String,
    pub os_category: OsCategory,
    pub confidence: f64,
    pub method: DetectionMethod,
    /// Why the banner invocation failed, for `Fallback` results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProfileDetectionResult {
    pub fn from_banners(os_category: OsCategory) -> Self {
        let confidence = if os_category == OsCategory::Unknown {
            UNKNOWN_OS_CONFIDENCE
        } else {
            KNOWN_OS_CONFIDENCE
        };
        Self {
            profile: auto_profile(),
            os_category,
            confidence,
            method: DetectionMethod::Banners,
            error: None,
        }
    }

    pub fn fallback(error: impl Into<String>) -> Self {
        Self {
            profile: auto_profile(),
            os_category: OsCategory::Unknown,
            confidence: 0.0,
            method: DetectionMethod::Fallback,
            error: Some(error.into()),
        }
    }
}

/// One post-processing branch: either its result or the error it raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BranchOutcome {
    Completed(SingleExecutionResult),
    Errored { error: String },
}

impl BranchOutcome {
    pub fn result(&self) -> Option<&SingleExecutionResult> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Errored { .. } => None,
        }
    }
}

/// Merged post-processing output for one artifact.
///
/// A branch that was not requested is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedResult {
    pub file_path: PathBuf,
    /// Zero when the artifact does not exist.
    pub file_size_bytes: u64,
    /// Hex SHA-256 digest of the artifact contents, when readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Stamped when processing starts, before either analyzer runs.
    pub processed_at: DateTime<Utc>,
    pub signature_scan: Option<BranchOutcome>,
    pub metadata: Option<BranchOutcome>,
}

/// Truncates `text` to at most `limit` characters on a char boundary.
///
/// # Examples
///
/// ```
/// use memtriage_core::truncate_chars;
///
/// assert_eq!(truncate_chars("abcdef", 3), "abc");
/// assert_eq!(truncate_chars("héllo", 2), "hé");
/// assert_eq!(truncate_chars("ok", 10), "ok");
/// ```
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_serde_snake_case() {
        for (status, expected) in [
            (ExecutionStatus::Pending, "pending"),
            (ExecutionStatus::Running, "running"),
            (ExecutionStatus::Success, "success"),
            (ExecutionStatus::Failed, "failed"),
            (ExecutionStatus::Timeout, "timeout"),
        ] {
            assert_eq!(status.to_string(), expected);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{expected}\""));
        }
    }

    #[test]
    fn test_disabled_result_has_zero_elapsed_and_message() {
        let result = SingleExecutionResult::disabled("binwalk", "Binwalk");
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.execution_time_seconds, 0.0);
        assert_eq!(result.error_message.as_deref(), Some("Binwalk is disabled"));
        assert_eq!(result.completed_at, Some(result.started_at));
        assert!(result.parsed_output.is_none());
    }

    #[test]
    fn test_failed_keeps_partial_output() {
        let parsed = ParsedOutput::Rows(vec![json!({"a": 1}), json!({"a": 2})]);
        let result = SingleExecutionResult::started("windows.netscan").failed(
            1,
            "boom",
            Some(parsed),
            Duration::from_secs(2),
        );
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.record_count, 2);
        assert_eq!(result.exit_code, 1);
    }

    #[test]
    fn test_timed_out_discards_output_and_raw_path() {
        let result = SingleExecutionResult::started("windows.malfind")
            .with_raw_output(Some(PathBuf::from("/tmp/windows_malfind.json")))
            .timed_out(Duration::from_millis(250));
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(result.execution_time_seconds, 0.25);
        assert!(result.raw_output_path.is_none());
        assert_eq!(
            result.error_message.as_deref(),
            Some("Execution timed out after 0.25s")
        );
    }

    #[test]
    fn test_with_stderr_truncates_to_limit() {
        let long = "x".repeat(STDERR_EXCERPT_LIMIT + 50);
        let result = SingleExecutionResult::started("t").with_stderr(&long);
        assert_eq!(
            result.stderr_excerpt.unwrap().chars().count(),
            STDERR_EXCERPT_LIMIT
        );

        let empty = SingleExecutionResult::started("t").with_stderr("");
        assert!(empty.stderr_excerpt.is_none());
    }

    #[test]
    fn test_parsed_output_serializes_with_kind_tag() {
        let parsed = ParsedOutput::Signatures(vec![SignatureFinding {
            offset: 41,
            offset_hex: "0x29".into(),
            description: "Zlib compressed data".into(),
        }]);
        let value = serde_json::to_value(&parsed).unwrap();
        assert_eq!(value["kind"], "signatures");
        assert_eq!(value["records"][0]["offset_hex"], "0x29");
    }

    #[test]
    fn test_os_category_macos_spelling() {
        assert_eq!(OsCategory::MacOs.to_string(), "macOS");
        assert_eq!(serde_json::to_string(&OsCategory::MacOs).unwrap(), "\"macOS\"");
    }

    #[test]
    fn test_profile_detection_records_auto_profile() {
        let value = serde_json::to_value(ProfileDetectionResult::fallback("gone")).unwrap();
        assert_eq!(value["profile"], "auto");
        assert_eq!(value["method"], "fallback");

        let legacy: ProfileDetectionResult = serde_json::from_value(json!({
            "os_category": "Windows",
            "confidence": 0.8,
            "method": "banners"
        }))
        .unwrap();
        assert_eq!(legacy.profile, AUTO_PROFILE);
        assert_eq!(legacy, ProfileDetectionResult::from_banners(OsCategory::Windows));
    }

    #[test]
    fn test_branch_outcome_untagged_error_roundtrip() {
        let outcome = BranchOutcome::Errored {
            error: "scanner panicked".into(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, r#"{"error":"scanner panicked"}"#);
        let back: BranchOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn test_extracted_files_omitted_when_empty() {
        let result = SingleExecutionResult::started("exiftool").succeeded(
            0,
            ParsedOutput::Metadata(MetadataRecord::default()),
            Duration::ZERO,
        );
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("extracted_files"));
    }
}
