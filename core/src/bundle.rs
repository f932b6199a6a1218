use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CombinedResult, ExecutionStatus, ProfileDetectionResult, SingleExecutionResult};

/// Format version written into every bundle.
pub const BUNDLE_FORMAT_VERSION: &str = "1.0";

/// Serializable record of one analysis job.
///
/// A bundle groups the plugin results for one memory image with the
/// optional profile fingerprint and any post-processed artifacts, so the
/// serving layer can persist a job as a single document.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use memtriage_core::*;
///
/// let mut bundle = AnalysisBundle::new("/evidence/host.raw");
/// bundle.insert_plugin(
///     SingleExecutionResult::started("windows.pslist")
///         .succeeded(0, ParsedOutput::Rows(vec![]), Duration::from_secs(1)),
/// );
/// bundle.insert_plugin(
///     SingleExecutionResult::started("windows.malfind").timed_out(Duration::from_secs(60)),
/// );
///
/// assert_eq!(bundle.plugin_count(), 2);
/// assert_eq!(bundle.status_counts()[&ExecutionStatus::Timeout], 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisBundle {
    pub format_version: String,
    pub image_path: PathBuf,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileDetectionResult>,
    /// Plugin results keyed by plugin name.
    #[serde(default)]
    pub plugins: BTreeMap<String, SingleExecutionResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<CombinedResult>,
}

impl AnalysisBundle {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            format_version: BUNDLE_FORMAT_VERSION.to_string(),
            image_path: image_path.into(),
            generated_at: Utc::now(),
            profile: None,
            plugins: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    /// Adds a plugin result, replacing any earlier result for the same plugin.
    pub fn insert_plugin(&mut self, result: SingleExecutionResult) {
        self.plugins.insert(result.tool_name.clone(), result);
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Number of plugin results per terminal status.
    pub fn status_counts(&self) -> BTreeMap<ExecutionStatus, usize> {
        let mut counts = BTreeMap::new();
        for result in self.plugins.values() {
            *counts.entry(result.status).or_insert(0) += 1;
        }
        counts
    }

    /// Returns `true` when every plugin run succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.plugins.values().all(SingleExecutionResult::is_success)
    }
}
