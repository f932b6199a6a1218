//! Result model for external forensic tool runs.
//!
//! This crate defines the value types shared by the execution engine and its
//! callers:
//!
//! - [`SingleExecutionResult`]: outcome of one external tool invocation,
//!   with its [`ExecutionStatus`] and [`ParsedOutput`].
//! - [`SignatureFinding`] and [`MetadataRecord`]: structured records decoded
//!   from the signature scanner and the metadata extractor.
//! - [`ProfileDetectionResult`]: coarse OS fingerprint of a memory image.
//! - [`CombinedResult`]: merged post-processing output for one artifact.
//! - [`AnalysisBundle`]: a serializable record of a whole analysis job.
//!
//! Validation ([`validate_result`], [`validate_bundle`]) reports results
//! whose fields contradict their status.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use memtriage_core::*;
//!
//! let result = SingleExecutionResult::started("windows.pslist")
//!     .failed(1, "Unable to validate the plugin requirements", None, Duration::from_secs(3))
//!     .with_stderr("Unable to validate the plugin requirements: ['kernel']");
//!
//! assert_eq!(result.status, ExecutionStatus::Failed);
//! assert_eq!(result.record_count, 0);
//! assert!(validate_result(&result, None).is_empty());
//! ```

mod bundle;
mod types;
mod validate;

pub use bundle::{AnalysisBundle, BUNDLE_FORMAT_VERSION};
pub use types::*;
pub use validate::{ResultViolation, validate_bundle, validate_result};
