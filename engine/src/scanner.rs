//! Embedded-signature scanning of carved artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use memtriage_core::{NOT_EXITED_CODE, ParsedOutput, SingleExecutionResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::invoker::{InvocationOutcome, Invoker, ProcessInvoker, ToolCommand};
use crate::parser::diagnostics::analyzer_error_message;
use crate::parser::parse_signature_table;
use crate::tool::{ToolKind, ToolState};

/// Runs the signature scanner on single files, optionally carving out
/// embedded files.
pub struct SignatureScanner {
    state: ToolState,
    extraction_dir: PathBuf,
    timeout: Duration,
    extract: bool,
    invoker: Arc<dyn Invoker>,
}

impl std::fmt::Debug for SignatureScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureScanner")
            .field("state", &self.state)
            .field("extraction_dir", &self.extraction_dir)
            .field("timeout", &self.timeout)
            .field("extract", &self.extract)
            .finish_non_exhaustive()
    }
}

impl SignatureScanner {
    /// Creates a scanner writing extractions below `extraction_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidInput`](crate::EngineError::InvalidInput) when an
    /// enabled `state` holds a tool other than the signature scanner.
    pub fn new(state: ToolState, extraction_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        state.ensure_kind(ToolKind::Binwalk)?;
        Ok(Self {
            state,
            extraction_dir: extraction_dir.into(),
            timeout,
            extract: true,
            invoker: Arc::new(ProcessInvoker),
        })
    }

    /// Builds a scanner from configuration, verifying the binary when enabled.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let settings = &config.tools.binwalk;
        let state = ToolState::resolve(ToolKind::Binwalk, &settings.path, settings.enabled)?;
        Self::new(
            state,
            config.storage.extraction_dir(),
            config.timeouts.signature_scan(),
        )
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Sets whether [`analyze`](Self::analyze) carves embedded files.
    pub fn with_extract(mut self, extract: bool) -> Self {
        self.extract = extract;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    /// Per-file extraction directory: `<extraction_dir>/<stem>_binwalk`.
    pub fn extraction_dir_for(&self, file_path: &Path) -> PathBuf {
        let stem = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.extraction_dir.join(format!("{stem}_binwalk"))
    }

    pub async fn analyze(&self, file_path: &Path) -> SingleExecutionResult {
        self.analyze_with(file_path, self.extract).await
    }

    pub async fn analyze_with(&self, file_path: &Path, extract: bool) -> SingleExecutionResult {
        let Some(tool) = self.state.tool() else {
            warn!(file = %file_path.display(), "Signature scan skipped, scanner disabled");
            return SingleExecutionResult::disabled(ToolKind::Binwalk.name(), ToolKind::Binwalk.label());
        };
        let result = SingleExecutionResult::started(ToolKind::Binwalk.name());

        let extract_dir = self.extraction_dir_for(file_path);
        if let Err(e) = std::fs::create_dir_all(&extract_dir) {
            return result.failed(
                NOT_EXITED_CODE,
                format!("failed to create {}: {e}", extract_dir.display()),
                None,
                Duration::ZERO,
            );
        }

        let mut command = ToolCommand::new(tool.path(), self.timeout);
        if extract {
            command = command.args(["-e", "-C"]).path_arg(&extract_dir);
        }
        let command = command.path_arg(file_path).current_dir(&extract_dir);

        info!(file = %file_path.display(), extract, "Running signature scan");
        let result = match self
            .invoker
            .invoke(&command, &CancellationToken::new())
            .await
        {
            InvocationOutcome::Completed(output) => {
                let findings = ParsedOutput::Signatures(parse_signature_table(&output.stdout));
                let extracted = if extract {
                    list_files(&extract_dir)
                } else {
                    Vec::new()
                };
                let finished = if output.exit_code == 0 {
                    result.succeeded(output.exit_code, findings, output.elapsed)
                } else {
                    result.failed(
                        output.exit_code,
                        analyzer_error_message(&output.stderr),
                        Some(findings),
                        output.elapsed,
                    )
                };
                finished
                    .with_stderr(&output.stderr)
                    .with_extracted_files(extracted)
            }
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
            signatures = result.record_count,
            extracted = result.extracted_files.len(),
            "Signature scan finished"
        );
        result
    }
}

/// Every regular file below `dir`, sorted.
fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    files
}
