//! External tool identities and eager installation checks.
//!
//! An analyzer never runs a tool it has not verified. [`VerifiedTool`] is the
//! proof: it can only be obtained by probing the binary (or by explicitly
//! opting out of the probe), and analyzers take it by value at construction.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};
use wait_timeout::ChildExt;

use crate::error::{EngineError, Result};
use crate::version::extract_version;

/// The external tools the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Memory-analysis framework (Volatility 3).
    Volatility,
    /// Binary-signature scanner (binwalk).
    Binwalk,
    /// Metadata extractor (ExifTool).
    ExifTool,
}

impl ToolKind {
    /// Name recorded as `tool_name` on analyzer results.
    pub fn name(self) -> &'static str {
        match self {
            Self::Volatility => "volatility",
            Self::Binwalk => "binwalk",
            Self::ExifTool => "exiftool",
        }
    }

    /// Human-readable label used in messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Volatility => "Volatility",
            Self::Binwalk => "Binwalk",
            Self::ExifTool => "ExifTool",
        }
    }

    /// Arguments of the installation probe.
    pub fn probe_args(self) -> &'static [&'static str] {
        match self {
            Self::Volatility | Self::Binwalk => &["--help"],
            Self::ExifTool => &["-ver"],
        }
    }

    pub fn probe_timeout(self) -> Duration {
        match self {
            Self::Volatility => Duration::from_secs(10),
            Self::Binwalk | Self::ExifTool => Duration::from_secs(5),
        }
    }

    pub fn class(self) -> ToolClass {
        match self {
            Self::Volatility => ToolClass::MemoryAnalysis,
            Self::Binwalk => ToolClass::SignatureScan,
            Self::ExifTool => ToolClass::Metadata,
        }
    }
}

/// Concurrency class of a tool; each class has its own ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolClass {
    MemoryAnalysis,
    SignatureScan,
    Metadata,
}

impl ToolClass {
    /// Ceiling used when configuration does not say otherwise.
    ///
    /// ```
    /// use memtriage_engine::ToolClass;
    ///
    /// assert_eq!(ToolClass::MemoryAnalysis.recommended_ceiling(), 3);
    /// assert_eq!(ToolClass::SignatureScan.recommended_ceiling(), 2);
    /// assert_eq!(ToolClass::Metadata.recommended_ceiling(), 4);
    /// ```
    pub fn recommended_ceiling(self) -> usize {
        match self {
            Self::MemoryAnalysis => 3,
            Self::SignatureScan => 2,
            Self::Metadata => 4,
        }
    }
}

/// Handle to a tool binary whose installation has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedTool {
    kind: ToolKind,
    path: PathBuf,
    version: Option<String>,
}

impl VerifiedTool {
    /// Probes `path` with the tool's standard probe arguments and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ToolUnavailable`](EngineError::ToolUnavailable) when the
    /// binary cannot be launched, exits non-zero or does not answer within
    /// the probe timeout.
    pub fn verify(kind: ToolKind, path: impl Into<PathBuf>) -> Result<Self> {
        Self::verify_with(kind, path, kind.probe_args(), kind.probe_timeout())
    }

    /// Probes `path` with custom arguments and timeout.
    pub fn verify_with(
        kind: ToolKind,
        path: impl Into<PathBuf>,
        probe_args: &[&str],
        timeout: Duration,
    ) -> Result<Self> {
        let path = path.into();
        let unavailable = |reason: String| EngineError::ToolUnavailable {
            tool: kind.label().to_string(),
            path: path.clone(),
            reason,
        };

        debug!(tool = kind.name(), path = %path.display(), args = ?probe_args, "Probing tool");
        let mut child = Command::new(&path)
            .args(probe_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| unavailable(format!("failed to launch: {e}")))?;

        // Drain both pipes so a chatty probe cannot block on a full buffer.
        let stdout_thread = child.stdout.take().map(drain_pipe);
        let stderr_thread = child.stderr.take().map(drain_pipe);

        let status = match child.wait_timeout(timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(unavailable(format!(
                    "probe timed out after {}s",
                    timeout.as_secs_f64()
                )));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(unavailable(format!("probe wait failed: {e}")));
            }
        };

        let stdout = join_pipe(stdout_thread);
        let stderr = join_pipe(stderr_thread);

        if !status.success() {
            let code = status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(unavailable(format!("probe exited with status {code}")));
        }

        let version = extract_version(&stdout, kind.name())
            .or_else(|| extract_version(&stderr, kind.name()));
        info!(
            tool = kind.name(),
            path = %path.display(),
            version = version.as_deref().unwrap_or("unknown"),
            "Tool verified"
        );

        Ok(Self {
            kind,
            path,
            version,
        })
    }

    /// Builds a handle without probing.
    ///
    /// For callers that verified the binary by other means, such as a
    /// container image known to ship it.
    pub fn unchecked(kind: ToolKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            version: None,
        }
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Version reported by the probe, if one was recognised.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

/// Whether an optional analyzer may run its tool.
///
/// Disabled tools are never probed and never spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolState {
    Enabled(VerifiedTool),
    Disabled,
}

impl ToolState {
    /// Verifies the tool when `enabled`, otherwise returns `Disabled`.
    pub fn resolve(kind: ToolKind, path: &Path, enabled: bool) -> Result<Self> {
        if enabled {
            VerifiedTool::verify(kind, path).map(Self::Enabled)
        } else {
            info!(tool = kind.name(), "Tool disabled by configuration");
            Ok(Self::Disabled)
        }
    }

    pub fn tool(&self) -> Option<&VerifiedTool> {
        match self {
            Self::Enabled(tool) => Some(tool),
            Self::Disabled => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    pub(crate) fn ensure_kind(&self, expected: ToolKind) -> Result<()> {
        match self {
            Self::Enabled(tool) if tool.kind() != expected => Err(EngineError::InvalidInput(
                format!("expected {}, got {}", expected.label(), tool.kind().label()),
            )),
            _ => Ok(()),
        }
    }
}

fn drain_pipe<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_pipe(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = handle.and_then(|t| t.join().ok()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_verify_accepts_zero_exit_and_reads_version() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "exiftool", "echo 12.76");

        let verified = VerifiedTool::verify(ToolKind::ExifTool, &tool).unwrap();
        assert_eq!(verified.kind(), ToolKind::ExifTool);
        assert_eq!(verified.path(), tool.as_path());
        assert_eq!(verified.version(), Some("12.76"));
    }

    #[test]
    fn test_verify_rejects_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let err = VerifiedTool::verify(ToolKind::Binwalk, dir.path().join("nope")).unwrap_err();
        match err {
            EngineError::ToolUnavailable { tool, reason, .. } => {
                assert_eq!(tool, "Binwalk");
                assert!(reason.contains("failed to launch"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_verify_rejects_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "vol", "echo broken >&2; exit 3");
        let err = VerifiedTool::verify(ToolKind::Volatility, &tool).unwrap_err();
        assert!(err.to_string().contains("status 3"));
    }

    #[test]
    fn test_verify_times_out_hung_probe() {
        let dir = tempfile::tempdir().unwrap();
        let tool = script(dir.path(), "binwalk", "exec sleep 5");
        let err = VerifiedTool::verify_with(
            ToolKind::Binwalk,
            &tool,
            &["--help"],
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
