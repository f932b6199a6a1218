//! OS fingerprinting of memory images.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use memtriage_core::{OsCategory, ProfileDetectionResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::invoker::{InvocationOutcome, Invoker, ProcessInvoker, ToolCommand};
use crate::parser::classify_banners;
use crate::tool::VerifiedTool;

/// Plugin that prints kernel banners found in the image.
pub const BANNERS_PLUGIN: &str = "banners.Banners";

/// Limit on the banner invocation.
pub const DETECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Detects the OS family of a memory image from its kernel banners.
pub struct ProfileDetector {
    tool: VerifiedTool,
    invoker: Arc<dyn Invoker>,
}

impl ProfileDetector {
    pub fn new(tool: VerifiedTool) -> Self {
        Self {
            tool,
            invoker: Arc::new(ProcessInvoker),
        }
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.invoker = invoker;
        self
    }

    /// Runs the banner plugin and classifies its stdout.
    ///
    /// Never fails: any invocation problem yields an `Unknown` result with
    /// zero confidence and the `fallback` method.
    pub async fn detect(&self, image_path: &Path) -> ProfileDetectionResult {
        let command = ToolCommand::new(self.tool.path(), DETECTION_TIMEOUT)
            .arg("-f")
            .path_arg(image_path)
            .arg(BANNERS_PLUGIN);

        let result = match self
            .invoker
            .invoke(&command, &CancellationToken::new())
            .await
        {
            InvocationOutcome::Completed(output) => {
                ProfileDetectionResult::from_banners(classify_banners(&output.stdout))
            }
            InvocationOutcome::TimedOut { limit } => ProfileDetectionResult::fallback(format!(
                "banner detection timed out after {}s",
                limit.as_secs_f64()
            )),
            InvocationOutcome::Cancelled { .. } => {
                ProfileDetectionResult::fallback("banner detection cancelled")
            }
            InvocationOutcome::LaunchFailed { reason } => ProfileDetectionResult::fallback(reason),
        };

        match &result.error {
            Some(error) => warn!(image = %image_path.display(), error = %error, "Profile detection failed"),
            None => info!(
                image = %image_path.display(),
                os = %result.os_category,
                confidence = result.confidence,
                "Profile detected"
            ),
        }
        result
    }
}

/// Prefixes a bare plugin name with the framework namespace for `os`.
///
/// Names that already carry a namespace, and any name when the OS is
/// unknown, are returned unchanged.
///
/// # Examples
///
/// ```
/// use memtriage_core::OsCategory;
/// use memtriage_engine::qualified_plugin_name;
///
/// assert_eq!(qualified_plugin_name(OsCategory::Windows, "pslist"), "windows.pslist");
/// assert_eq!(qualified_plugin_name(OsCategory::MacOs, "pslist"), "mac.pslist");
/// assert_eq!(qualified_plugin_name(OsCategory::Linux, "linux.bash"), "linux.bash");
/// assert_eq!(qualified_plugin_name(OsCategory::Unknown, "pslist"), "pslist");
/// ```
pub fn qualified_plugin_name(os: OsCategory, plugin: &str) -> String {
    let namespace = match os {
        OsCategory::Windows => "windows",
        OsCategory::Linux => "linux",
        OsCategory::MacOs => "mac",
        OsCategory::Unknown => return plugin.to_string(),
    };
    if plugin.contains('.') {
        plugin.to_string()
    } else {
        format!("{namespace}.{plugin}")
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use memtriage_core::DetectionMethod;

    use super::*;
    use crate::invoker::ProcessOutput;
    use crate::tool::ToolKind;

    struct Fixed(InvocationOutcome);

    #[async_trait]
    impl Invoker for Fixed {
        async fn invoke(&self, command: &ToolCommand, _: &CancellationToken) -> InvocationOutcome {
            assert_eq!(command.timeout, DETECTION_TIMEOUT);
            assert_eq!(command.args.last().map(String::as_str), Some(BANNERS_PLUGIN));
            self.0.clone()
        }
    }

    fn detector(outcome: InvocationOutcome) -> ProfileDetector {
        ProfileDetector::new(VerifiedTool::unchecked(ToolKind::Volatility, "/opt/vol"))
            .with_invoker(Arc::new(Fixed(outcome)))
    }

    fn stdout(text: &str, exit_code: i32) -> InvocationOutcome {
        InvocationOutcome::Completed(ProcessOutput {
            exit_code,
            stdout: text.into(),
            stderr: String::new(),
            elapsed: Duration::from_secs(1),
        })
    }

    #[tokio::test]
    async fn test_windows_banner() {
        let result = detector(stdout("Offset\tBanner\n0x1000\tMicrosoft Windows", 0))
            .detect(Path::new("/img.raw"))
            .await;
        assert_eq!(result.os_category, OsCategory::Windows);
        assert_eq!(result.confidence, 0.8);
        assert_eq!(result.method, DetectionMethod::Banners);
    }

    #[tokio::test]
    async fn test_garbage_is_unknown_with_low_confidence() {
        let result = detector(stdout("garbage", 0))
            .detect(Path::new("/img.raw"))
            .await;
        assert_eq!(result.os_category, OsCategory::Unknown);
        assert_eq!(result.confidence, 0.3);
        assert_eq!(result.method, DetectionMethod::Banners);
    }

    #[tokio::test]
    async fn test_nonzero_exit_still_classified() {
        let result = detector(stdout("Linux version 6.1.0", 1))
            .detect(Path::new("/img.raw"))
            .await;
        assert_eq!(result.os_category, OsCategory::Linux);
    }

    #[tokio::test]
    async fn test_invocation_error_falls_back() {
        for outcome in [
            InvocationOutcome::LaunchFailed {
                reason: "not found".into(),
            },
            InvocationOutcome::TimedOut {
                limit: DETECTION_TIMEOUT,
            },
        ] {
            let result = detector(outcome).detect(Path::new("/img.raw")).await;
            assert_eq!(result.os_category, OsCategory::Unknown);
            assert_eq!(result.confidence, 0.0);
            assert_eq!(result.method, DetectionMethod::Fallback);
            assert!(result.error.is_some());
        }
    }
}
