//! Output formatting for results, batches and bundles.

use std::collections::BTreeMap;

use memtriage_core::{
    AnalysisBundle, BranchOutcome, CombinedResult, ProfileDetectionResult, SingleExecutionResult,
};
use serde::Serialize;

use crate::batch::ItemKey;

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum OutputFormat {
    Json,
    Yaml,
    Markdown,
    Table,
}

impl OutputFormat {
    /// File extension for reports written in this format.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Markdown => "md",
            Self::Table => "txt",
        }
    }
}

fn serialize<T: Serialize>(value: &T, format: OutputFormat) -> Option<Result<String, String>> {
    match format {
        OutputFormat::Json => Some(
            serde_json::to_string_pretty(value)
                .map_err(|e| format!("JSON serialization failed: {e}")),
        ),
        OutputFormat::Yaml => Some(
            serde_yaml::to_string(value).map_err(|e| format!("YAML serialization failed: {e}")),
        ),
        OutputFormat::Markdown | OutputFormat::Table => None,
    }
}

/// Formats one execution result.
pub fn format_result(result: &SingleExecutionResult, format: OutputFormat) -> Result<String, String> {
    if let Some(serialized) = serialize(result, format) {
        return serialized;
    }
    let mut out = String::new();
    match format {
        OutputFormat::Markdown => {
            out.push_str(&format!("# {}\n\n", result.tool_name));
            push_result_markdown(&mut out, result);
        }
        _ => out.push_str(&table_header_and_row(result.tool_name.as_str(), result)),
    }
    Ok(out)
}

/// Formats a batch result map.
pub fn format_batch<K>(results: &BTreeMap<K, SingleExecutionResult>, format: OutputFormat) -> Result<String, String>
where
    K: ItemKey + Serialize,
{
    if let Some(serialized) = serialize(results, format) {
        return serialized;
    }
    let rows: Vec<(String, &SingleExecutionResult)> =
        results.iter().map(|(key, result)| (key.label(), result)).collect();
    Ok(match format {
        OutputFormat::Markdown => batch_to_markdown(&rows),
        _ => batch_to_table(&rows),
    })
}

/// Formats a profile detection result.
pub fn format_profile(profile: &ProfileDetectionResult, format: OutputFormat) -> Result<String, String> {
    if let Some(serialized) = serialize(profile, format) {
        return serialized;
    }
    let method = format!("{:?}", profile.method).to_lowercase();
    Ok(match format {
        OutputFormat::Markdown => {
            let mut out = String::from("# Profile\n\n");
            out.push_str(&format!("- **Profile:** {}\n", profile.profile));
            out.push_str(&format!("- **OS:** {}\n", profile.os_category));
            out.push_str(&format!("- **Confidence:** {:.2}\n", profile.confidence));
            out.push_str(&format!("- **Method:** {method}\n"));
            if let Some(ref error) = profile.error {
                out.push_str(&format!("- **Error:** {error}\n"));
            }
            out
        }
        _ => format!(
            "OS: {}  Confidence: {:.2}  Method: {method}\n",
            profile.os_category, profile.confidence
        ),
    })
}

/// Formats a post-processing result.
pub fn format_combined(combined: &CombinedResult, format: OutputFormat) -> Result<String, String> {
    if let Some(serialized) = serialize(combined, format) {
        return serialized;
    }
    Ok(match format {
        OutputFormat::Markdown => combined_to_markdown(combined),
        _ => combined_to_table(combined),
    })
}

/// Formats an analysis bundle.
pub fn format_bundle(bundle: &AnalysisBundle, format: OutputFormat) -> Result<String, String> {
    if let Some(serialized) = serialize(bundle, format) {
        return serialized;
    }
    let rows: Vec<(String, &SingleExecutionResult)> = bundle
        .plugins
        .iter()
        .map(|(name, result)| (name.clone(), result))
        .collect();

    let mut out = String::new();
    match format {
        OutputFormat::Markdown => {
            out.push_str(&format!(
                "# Analysis: {}\n\n",
                bundle.image_path.display()
            ));
            out.push_str(&format!("**Generated:** {}\n\n", bundle.generated_at.to_rfc3339()));
            if let Some(ref profile) = bundle.profile {
                out.push_str(&format!(
                    "**Profile:** {} ({:.0}%)\n\n",
                    profile.os_category,
                    profile.confidence * 100.0
                ));
            }
            out.push_str(&status_summary(bundle));
            out.push_str("\n\n");
            out.push_str(&batch_to_markdown(&rows));
            for artifact in &bundle.artifacts {
                out.push('\n');
                out.push_str(&combined_to_markdown(artifact));
            }
        }
        _ => {
            out.push_str(&format!("Image: {}\n", bundle.image_path.display()));
            if let Some(ref profile) = bundle.profile {
                out.push_str(&format!(
                    "Profile: {} ({:.2})\n",
                    profile.os_category, profile.confidence
                ));
            }
            out.push_str(&status_summary(bundle));
            out.push_str("\n\n");
            out.push_str(&batch_to_table(&rows));
            for artifact in &bundle.artifacts {
                out.push('\n');
                out.push_str(&combined_to_table(artifact));
            }
        }
    }
    Ok(out)
}

fn status_summary(bundle: &AnalysisBundle) -> String {
    bundle
        .status_counts()
        .iter()
        .map(|(status, count)| format!("{status}: {count}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_result_markdown(out: &mut String, result: &SingleExecutionResult) {
    out.push_str(&format!("- **Status:** {}\n", result.status));
    out.push_str(&format!("- **Exit Code:** {}\n", result.exit_code));
    out.push_str(&format!("- **Records:** {}\n", result.record_count));
    out.push_str(&format!(
        "- **Elapsed:** {:.2}s\n",
        result.execution_time_seconds
    ));
    if let Some(ref path) = result.raw_output_path {
        out.push_str(&format!("- **Raw Output:** `{}`\n", path.display()));
    }
    if let Some(ref message) = result.error_message {
        out.push_str(&format!("- **Error:** {}\n", first_line(message)));
    }
    if let Some(file_type) = result.metadata().and_then(|m| m.file_type.as_deref()) {
        out.push_str(&format!("- **File Type:** {file_type}\n"));
    }
    if !result.extracted_files.is_empty() {
        out.push_str(&format!(
            "- **Extracted Files:** {}\n",
            result.extracted_files.len()
        ));
    }
}

fn batch_to_markdown(rows: &[(String, &SingleExecutionResult)]) -> String {
    let mut out = String::new();
    out.push_str("| Item | Status | Records | Elapsed | Error |\n");
    out.push_str("|------|--------|---------|---------|-------|\n");
    for (item, result) in rows {
        let error = result.error_message.as_deref().map(first_line).unwrap_or("");
        out.push_str(&format!(
            "| `{item}` | {} | {} | {:.2}s | {error} |\n",
            result.status, result.record_count, result.execution_time_seconds
        ));
    }
    out
}

fn batch_to_table(rows: &[(String, &SingleExecutionResult)]) -> String {
    let width = rows.iter().map(|(item, _)| item.len()).max().unwrap_or(4).max(4);
    let mut out = format!(
        "{:<width$}  {:<8} {:>8} {:>10}  {}\n",
        "ITEM", "STATUS", "RECORDS", "ELAPSED", "ERROR"
    );
    for (item, result) in rows {
        out.push_str(&row(item, result, width));
    }
    out
}

fn table_header_and_row(item: &str, result: &SingleExecutionResult) -> String {
    let rows = [(item.to_string(), result)];
    batch_to_table(&rows)
}

fn row(item: &str, result: &SingleExecutionResult, width: usize) -> String {
    let error = result.error_message.as_deref().map(first_line).unwrap_or("");
    format!(
        "{:<width$}  {:<8} {:>8} {:>9.2}s  {error}\n",
        item,
        result.status.to_string(),
        result.record_count,
        result.execution_time_seconds,
    )
}

fn combined_to_markdown(combined: &CombinedResult) -> String {
    let mut out = format!("## Artifact: {}\n\n", combined.file_path.display());
    out.push_str(&format!("- **Size:** {} bytes\n", combined.file_size_bytes));
    if let Some(ref digest) = combined.sha256 {
        out.push_str(&format!("- **SHA-256:** `{digest}`\n"));
    }
    for (title, branch) in [
        ("Signature Scan", &combined.signature_scan),
        ("Metadata", &combined.metadata),
    ] {
        match branch {
            None => {}
            Some(BranchOutcome::Completed(result)) => {
                out.push_str(&format!("\n### {title}\n\n"));
                push_result_markdown(&mut out, result);
            }
            Some(BranchOutcome::Errored { error }) => {
                out.push_str(&format!("\n### {title}\n\n- **Error:** {error}\n"));
            }
        }
    }
    out
}

fn combined_to_table(combined: &CombinedResult) -> String {
    let mut out = format!(
        "Artifact: {}  Size: {}",
        combined.file_path.display(),
        combined.file_size_bytes
    );
    if let Some(ref digest) = combined.sha256 {
        out.push_str(&format!("  SHA-256: {digest}"));
    }
    out.push('\n');
    for (name, branch) in [
        ("scan", &combined.signature_scan),
        ("metadata", &combined.metadata),
    ] {
        match branch {
            None => {}
            Some(BranchOutcome::Completed(result)) => out.push_str(&row(name, result, 8)),
            Some(BranchOutcome::Errored { error }) => {
                out.push_str(&format!("{name:<8}  error    {error}\n"));
            }
        }
    }
    out
}

fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}
