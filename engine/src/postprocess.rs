//! Post-processing of carved artifacts.
//!
//! The coordinator fans one artifact out to the signature scanner and the
//! metadata extractor at the same time and merges both outcomes into a
//! [`CombinedResult`]. A branch that panics is reported as an error
//! placeholder and leaves the other branch untouched.

use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use memtriage_core::{BranchOutcome, CombinedResult, SingleExecutionResult};
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::metadata::MetadataExtractor;
use crate::scanner::SignatureScanner;

/// Runs both analyzers over single artifacts.
pub struct PostProcessingCoordinator {
    scanner: Arc<SignatureScanner>,
    extractor: Arc<MetadataExtractor>,
}

impl PostProcessingCoordinator {
    pub fn new(scanner: SignatureScanner, extractor: MetadataExtractor) -> Self {
        Self {
            scanner: Arc::new(scanner),
            extractor: Arc::new(extractor),
        }
    }

    /// Builds both analyzers from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolUnavailable`](crate::EngineError::ToolUnavailable) when
    /// an enabled tool fails verification.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self::new(
            SignatureScanner::from_config(config)?,
            MetadataExtractor::from_config(config)?,
        ))
    }

    pub fn scanner(&self) -> &Arc<SignatureScanner> {
        &self.scanner
    }

    pub fn extractor(&self) -> &Arc<MetadataExtractor> {
        &self.extractor
    }

    /// Processes one artifact with the requested analyzers.
    ///
    /// A requested analyzer that is disabled still reports its `Failed`
    /// "is disabled" result; an unrequested one is `None`.
    pub async fn process(&self, artifact: &Path, run_scan: bool, run_metadata: bool) -> CombinedResult {
        info!(artifact = %artifact.display(), run_scan, run_metadata, "Processing artifact");
        let processed_at = Utc::now();

        let scan = async {
            if run_scan {
                Some(guarded("signature scan", self.scanner.analyze(artifact)).await)
            } else {
                None
            }
        };
        let metadata = async {
            if run_metadata {
                Some(guarded("metadata extraction", self.extractor.analyze(artifact)).await)
            } else {
                None
            }
        };
        let digest = sha256_file(artifact.to_path_buf());

        let (signature_scan, metadata, sha256) = tokio::join!(scan, metadata, digest);

        CombinedResult {
            file_path: artifact.to_path_buf(),
            file_size_bytes: std::fs::metadata(artifact).map(|m| m.len()).unwrap_or(0),
            sha256,
            processed_at,
            signature_scan,
            metadata,
        }
    }
}

async fn guarded<F>(branch: &str, analysis: F) -> BranchOutcome
where
    F: Future<Output = SingleExecutionResult>,
{
    match std::panic::AssertUnwindSafe(analysis).catch_unwind().await {
        Ok(result) => BranchOutcome::Completed(result),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| format!("{branch} panicked"));
            error!(branch, error = %message, "Post-processing branch failed");
            BranchOutcome::Errored { error: message }
        }
    }
}

/// Hex SHA-256 of a file, computed off the async worker threads.
pub async fn sha256_file(path: PathBuf) -> Option<String> {
    tokio::task::spawn_blocking(move || digest_file(&path).ok())
        .await
        .ok()
        .flatten()
}

fn digest_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
