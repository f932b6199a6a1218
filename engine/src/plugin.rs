//! Memory-analysis plugin execution.
//!
//! A [`PluginExecutor`] is bound to one memory image and one output
//! directory. Each [`run`](PluginExecutor::run) launches the framework for a
//! single plugin, retains its raw JSONL output on disk and decodes it into a
//! [`SingleExecutionResult`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use memtriage_core::{NOT_EXITED_CODE, ParsedOutput, SingleExecutionResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::invoker::{InvocationOutcome, Invoker, ProcessInvoker, ToolCommand};
use crate::parser::{extract_error_message, parse_jsonl_file};
use crate::tool::{ToolKind, VerifiedTool};

/// Error message recorded for runs stopped through a cancellation token.
pub const CANCELLED_MESSAGE: &str = "Execution cancelled";

/// Runs framework plugins against one memory image.
pub struct PluginExecutor {
    tool: VerifiedTool,
    image_path: PathBuf,
    output_dir: PathBuf,
    timeout: Duration,
    invoker: Arc<dyn Invoker>,
}

impl std::fmt::Debug for PluginExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginExecutor")
            .field("tool", &self.tool)
            .field("image_path", &self.image_path)
            .field("output_dir", &self.output_dir)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PluginExecutor {
    /// Binds an executor to `image_path`, creating `output_dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidInput`](EngineError::InvalidInput) when the image
    /// does not exist or `tool` is not the memory-analysis framework, and
    /// [`Io`](EngineError::Io) when the output directory cannot be created.
    pub fn new(
        tool: VerifiedTool,
        image_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let image_path = image_path.into();
        let output_dir = output_dir.into();

        if tool.kind() != ToolKind::Volatility {
            return Err(EngineError::InvalidInput(format!(
                "plugin executor needs Volatility, got {}",
                tool.kind().label()
            )));
        }
        if !image_path.exists() {
            return Err(EngineError::InvalidInput(format!(
                "memory image not found: {}",
                image_path.display()
            )));
        }
        std::fs::create_dir_all(&output_dir)?;

        Ok(Self {
            tool,
            image_path,
            output_dir,
            timeout,
            invoker: Arc::new(ProcessInvoker),
        })
    }

    /// Replaces the process invoker.
    pub fn with_invoker(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.invoker = invoker;
        self
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Raw output location for `plugin` (`windows.pslist` → `windows_pslist.json`).
    pub fn output_path(&self, plugin: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.json", plugin.replace('.', "_")))
    }

    /// Builds `<tool> -f <image> -r json <plugin> [extra_args]`.
    pub fn command(&self, plugin: &str, extra_args: &[String]) -> ToolCommand {
        ToolCommand::new(self.tool.path(), self.timeout)
            .arg("-f")
            .path_arg(&self.image_path)
            .args(["-r", "json"])
            .arg(plugin)
            .args(extra_args.iter().cloned())
            .current_dir(&self.output_dir)
    }

    /// Runs one plugin to completion or timeout.
    pub async fn run(&self, plugin: &str, extra_args: &[String]) -> SingleExecutionResult {
        self.run_with_cancel(plugin, extra_args, &CancellationToken::new())
            .await
    }

    /// Runs one plugin, stopping early when `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        plugin: &str,
        extra_args: &[String],
        cancel: &CancellationToken,
    ) -> SingleExecutionResult {
        let result = SingleExecutionResult::started(plugin);
        let output_path = self.output_path(plugin);

        if output_path.exists() {
            if let Err(e) = std::fs::remove_file(&output_path) {
                warn!(plugin = %plugin, path = %output_path.display(), error = %e, "Failed to remove stale output");
            }
        }

        info!(
            plugin = %plugin,
            image = %self.image_path.display(),
            timeout_secs = self.timeout.as_secs_f64(),
            "Executing plugin"
        );
        let command = self.command(plugin, extra_args);

        let result = match self.invoker.invoke(&command, cancel).await {
            InvocationOutcome::Completed(output) => {
                if !output_path.exists() && !output.stdout.is_empty() {
                    if let Err(e) = std::fs::write(&output_path, &output.stdout) {
                        warn!(plugin = %plugin, error = %e, "Failed to persist plugin output");
                    }
                }

                let parsed = parse_jsonl_file(&output_path).map(ParsedOutput::Rows);
                let raw_output = output_path.exists().then(|| output_path.clone());

                let finished = match parsed {
                    Some(parsed) if output.exit_code == 0 => {
                        result.succeeded(output.exit_code, parsed, output.elapsed)
                    }
                    parsed => result.failed(
                        output.exit_code,
                        extract_error_message(&output.stderr),
                        parsed,
                        output.elapsed,
                    ),
                };
                finished
                    .with_stderr(&output.stderr)
                    .with_raw_output(raw_output)
            }
            InvocationOutcome::TimedOut { limit } => result.timed_out(limit),
            InvocationOutcome::Cancelled { elapsed } => {
                result.failed(NOT_EXITED_CODE, CANCELLED_MESSAGE, None, elapsed)
            }
            InvocationOutcome::LaunchFailed { reason } => result.failed(
                NOT_EXITED_CODE,
                format!("failed to launch {}: {reason}", self.tool.path().display()),
                None,
                Duration::ZERO,
            ),
        };

        info!(
            plugin = %plugin,
            status = %result.status,
            records = result.record_count,
            elapsed_secs = result.execution_time_seconds,
            "Plugin finished"
        );
        result
    }
}
