//! Subprocess invocation with timeout and cancellation.
//!
//! [`Invoker`] is the seam between analyzers and the operating system.
//! [`ProcessInvoker`] launches real processes through `tokio::process`;
//! tests substitute doubles that count spawns or simulate slow tools.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use memtriage_core::NOT_EXITED_CODE;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One external command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Directory the process runs in; inherited when `None`.
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured output of a process that exited on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, or `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// How one invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Completed(ProcessOutput),
    /// The wall-clock limit elapsed; the process group was killed and the tool reaped.
    TimedOut { limit: Duration },
    /// The cancellation token fired; the process group was killed and the tool reaped.
    Cancelled { elapsed: Duration },
    /// The process could not be started.
    LaunchFailed { reason: String },
}

/// Runs external commands.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, command: &ToolCommand, cancel: &CancellationToken)
    -> InvocationOutcome;
}

/// [`Invoker`] backed by real operating-system processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessInvoker;

enum Race {
    Exited(std::io::Result<std::process::ExitStatus>, Vec<u8>, Vec<u8>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn invoke(
        &self,
        command: &ToolCommand,
        cancel: &CancellationToken,
    ) -> InvocationOutcome {
        debug!(command = %command.display(), timeout_secs = command.timeout.as_secs_f64(), "Launching tool");
        let start = Instant::now();

        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            process.current_dir(dir);
        }
        // Own group, so a kill reaches everything the tool started.
        #[cfg(unix)]
        process.process_group(0);

        let mut child = match process.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %command.display(), error = %e, "Failed to launch tool");
                return InvocationOutcome::LaunchFailed {
                    reason: e.to_string(),
                };
            }
        };

        // Taken now: once the leader is reaped `id()` returns `None`.
        let group = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let race = {
            let collect = async {
                let (status, out, err) =
                    tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
                Race::Exited(status, out, err)
            };
            tokio::select! {
                exited = collect => exited,
                _ = tokio::time::sleep(command.timeout) => Race::TimedOut,
                _ = cancel.cancelled() => Race::Cancelled,
            }
        };

        match race {
            Race::Exited(Ok(status), stdout, stderr) => InvocationOutcome::Completed(ProcessOutput {
                exit_code: status.code().unwrap_or(NOT_EXITED_CODE),
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                elapsed: start.elapsed(),
            }),
            Race::Exited(Err(e), _, _) => {
                terminate(&mut child, group).await;
                InvocationOutcome::LaunchFailed {
                    reason: format!("wait failed: {e}"),
                }
            }
            Race::TimedOut => {
                warn!(
                    command = %command.display(),
                    timeout_secs = command.timeout.as_secs_f64(),
                    "Tool timed out, killing process"
                );
                terminate(&mut child, group).await;
                InvocationOutcome::TimedOut {
                    limit: command.timeout,
                }
            }
            Race::Cancelled => {
                debug!(command = %command.display(), "Tool cancelled, killing process");
                terminate(&mut child, group).await;
                InvocationOutcome::Cancelled {
                    elapsed: start.elapsed(),
                }
            }
        }
    }
}

/// Kills the tool's whole process group, then reaps the leader.
async fn terminate(child: &mut tokio::process::Child, group: Option<u32>) {
    kill_group(group);
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(unix)]
fn kill_group(group: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pgid) = group.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // ESRCH: every member already exited.
        debug!(pgid, error = %e, "Process group kill failed");
    }
}

#[cfg(not(unix))]
fn kill_group(_group: Option<u32>) {}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> ToolCommand {
        ToolCommand::new("/bin/sh", timeout).arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_captures_stdout_stderr_and_exit_code() {
        let command = sh("echo out; echo err >&2; exit 4", Duration::from_secs(10));
        let outcome = ProcessInvoker
            .invoke(&command, &CancellationToken::new())
            .await;
        match outcome {
            InvocationOutcome::Completed(output) => {
                assert_eq!(output.exit_code, 4);
                assert_eq!(output.stdout, "out\n");
                assert_eq!(output.stderr, "err\n");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_reports_limit() {
        let limit = Duration::from_millis(200);
        let outcome = ProcessInvoker
            .invoke(&sh("exec sleep 5", limit), &CancellationToken::new())
            .await;
        assert_eq!(outcome, InvocationOutcome::TimedOut { limit });
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let command = sh("(sleep 1; touch marker) & echo started", Duration::from_millis(200))
            .current_dir(dir.path());

        let outcome = ProcessInvoker
            .invoke(&command, &CancellationToken::new())
            .await;
        assert!(matches!(outcome, InvocationOutcome::TimedOut { .. }));

        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert!(!marker.exists(), "background subshell outlived the timeout");
    }

    #[tokio::test]
    async fn test_cancellation_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let command = sh("(sleep 1; touch marker) & exec sleep 5", Duration::from_secs(30))
            .current_dir(dir.path());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = ProcessInvoker.invoke(&command, &cancel).await;
        assert!(matches!(outcome, InvocationOutcome::Cancelled { .. }));

        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = ProcessInvoker
            .invoke(&sh("exec sleep 5", Duration::from_secs(30)), &cancel)
            .await;
        assert!(matches!(outcome, InvocationOutcome::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_failure() {
        let command = ToolCommand::new("/definitely/not/here", Duration::from_secs(1));
        let outcome = ProcessInvoker
            .invoke(&command, &CancellationToken::new())
            .await;
        assert!(matches!(outcome, InvocationOutcome::LaunchFailed { .. }));
    }

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let command = sh("pwd", Duration::from_secs(10)).current_dir(dir.path());
        let InvocationOutcome::Completed(output) = ProcessInvoker
            .invoke(&command, &CancellationToken::new())
            .await
        else {
            panic!("pwd did not complete");
        };
        let reported = std::fs::canonicalize(output.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn test_display_joins_program_and_args() {
        let command = ToolCommand::new("/usr/local/bin/vol", Duration::from_secs(1))
            .args(["-f", "/img.raw", "-r", "json", "windows.pslist"]);
        assert_eq!(
            command.display(),
            "/usr/local/bin/vol -f /img.raw -r json windows.pslist"
        );
    }
}
