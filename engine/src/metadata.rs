//! Tag metadata extraction from carved artifacts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use memtriage_core::{NOT_EXITED_CODE, ParsedOutput, SingleExecutionResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::invoker::{InvocationOutcome, Invoker, ProcessInvoker, ToolCommand};
use crate::parser::diagnostics::analyzer_error_message;
use crate::parser::parse_metadata;
use crate::tool::{ToolKind, ToolState};

/// Grouped, all-tags, short-name JSON output.
pub const METADATA_FLAGS: [&str; 4] = ["-json", "-g", "-a", "-s"];

/// Runs the metadata extractor on single files.
pub struct MetadataExtractor {
    state: ToolState,
    timeout: Duration,
    invoker: Arc<dyn Invoker>,
}

impl std::fmt::Debug for MetadataExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataExtractor")
            .field("state", &self.state)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MetadataExtractor {
    /// # Errors
    ///
    /// Returns [`InvalidInput`](crate::EngineError::InvalidInput) when an
    /// enabled `state` holds a tool other than the metadata extractor.
    pub fn new(state: ToolState, timeout: Duration) -> Result<Self> {
        state.ensure_kind(ToolKind::ExifTool)?;
        Ok(Self {
            state,
            timeout,
            invoker: Arc::new(ProcessInvoker),
        })
    }

    /// Builds an extractor from configuration, verifying the binary when enabled.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let settings = &config.tools.exiftool;
        let state = ToolState::resolve(ToolKind::ExifTool, &settings.path, settings.enabled)?;
        Self::new(state, config.timeouts.metadata())
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    pub async fn analyze(&self, file_path: &Path) -> SingleExecutionResult {
        let Some(tool) = self.state.tool() else {
            warn!(file = %file_path.display(), "Metadata extraction skipped, extractor disabled");
            return SingleExecutionResult::disabled(
                ToolKind::ExifTool.name(),
                ToolKind::ExifTool.label(),
            );
        };
        let result = SingleExecutionResult::started(ToolKind::ExifTool.name());
        let command = ToolCommand::new(tool.path(), self.timeout)
            .args(METADATA_FLAGS)
            .path_arg(file_path);

        info!(file = %file_path.display(), "Extracting metadata");
        let result = match self
            .invoker
            .invoke(&command, &CancellationToken::new())
            .await
        {
            InvocationOutcome::Completed(output) if output.exit_code == 0 => {
                let record = parse_metadata(&output.stdout);
                result
                    .succeeded(output.exit_code, ParsedOutput::Metadata(record), output.elapsed)
                    .with_stderr(&output.stderr)
            }
            InvocationOutcome::Completed(output) => result
                .failed(
                    output.exit_code,
                    analyzer_error_message(&output.stderr),
                    None,
                    output.elapsed,
                )
                .with_stderr(&output.stderr),
            InvocationOutcome::TimedOut { limit } => result.timed_out(limit),
            InvocationOutcome::Cancelled { elapsed } => result.failed(
                NOT_EXITED_CODE,
                crate::plugin::CANCELLED_MESSAGE,
                None,
                elapsed,
            ),
            InvocationOutcome::LaunchFailed { reason } => {
                result.failed(NOT_EXITED_CODE, reason, None, Duration::ZERO)
            }
        };

        info!(
            file = %file_path.display(),
            status = %result.status,
            tags = result.record_count,
            file_type = result.metadata().and_then(|m| m.file_type.as_deref()).unwrap_or("-"),
            "Metadata extraction finished"
        );
        result
    }
}
