//! Execution engine for external memory-forensics tools.
//!
//! This crate runs the memory-analysis framework, the signature scanner and
//! the metadata extractor as isolated subprocesses and normalizes their
//! output into [`memtriage_core`] result values.
//!
//! # Architecture
//!
//! - **Invocation** ([`invoker`]): launches one process with a wall-clock
//!   limit and optional cancellation, and reports how it ended.
//! - **Verification** ([`tool`]): probes each tool binary once, up front,
//!   and hands analyzers a [`VerifiedTool`].
//! - **Parsing** ([`parser`]): tolerant decoders for JSONL plugin output,
//!   signature tables, grouped metadata JSON, stderr diagnostics and kernel
//!   banners.
//! - **Analyzers**: [`PluginExecutor`], [`SignatureScanner`],
//!   [`MetadataExtractor`] and [`ProfileDetector`] turn one invocation into
//!   one typed result.
//! - **Scheduling** ([`batch`]): [`BatchScheduler`] runs many items under a
//!   per-class concurrency ceiling and isolates per-item failures.
//! - **Post-processing** ([`postprocess`]): [`PostProcessingCoordinator`]
//!   runs both artifact analyzers concurrently and merges their results.
//!
//! All execution is async; [`BlockingRuntime`] offers synchronous entry
//! points backed by one owned runtime.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use memtriage_engine::{BatchScheduler, EngineConfig, PluginExecutor, ToolClass, ToolKind, VerifiedTool};
//!
//! # async fn demo() -> memtriage_engine::Result<()> {
//! let config = EngineConfig::default().with_env_overrides()?;
//! let vol = VerifiedTool::verify(ToolKind::Volatility, &config.tools.volatility.path)?;
//! let executor = PluginExecutor::new(vol, "/evidence/host.raw", "/tmp/out", config.timeouts.plugin())?;
//!
//! let scheduler = BatchScheduler::for_class(ToolClass::MemoryAnalysis, &config.concurrency);
//! let results = scheduler
//!     .run_batch(config.plugins.critical.clone(), Arc::new(executor))
//!     .await;
//! for (plugin, result) in &results {
//!     println!("{plugin}: {} ({} records)", result.status, result.record_count);
//! }
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod blocking;
pub mod config;
pub mod error;
pub mod invoker;
pub mod metadata;
pub mod output;
pub mod parser;
pub mod plugin;
pub mod postprocess;
pub mod profile;
pub mod scanner;
pub mod tool;
pub mod version;

pub use batch::{BatchScheduler, ItemExecutor, ItemKey, path_items, run_batch};
pub use blocking::BlockingRuntime;
pub use config::{
    ConcurrencyConfig, EngineConfig, PluginConfig, StorageConfig, TimeoutConfig, ToolSettings,
    ToolsConfig,
};
pub use error::{EngineError, Result};
pub use invoker::{InvocationOutcome, Invoker, ProcessInvoker, ProcessOutput, ToolCommand};
pub use metadata::MetadataExtractor;
pub use output::{
    OutputFormat, format_batch, format_bundle, format_combined, format_profile, format_result,
};
pub use plugin::{CANCELLED_MESSAGE, PluginExecutor};
pub use postprocess::{PostProcessingCoordinator, sha256_file};
pub use profile::{ProfileDetector, qualified_plugin_name};
pub use scanner::SignatureScanner;
pub use tool::{ToolClass, ToolKind, ToolState, VerifiedTool};
