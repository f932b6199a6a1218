//! Error types for engine construction and configuration.
//!
//! Per-item tool failures never appear here; they are reported as
//! [`SingleExecutionResult`](memtriage_core::SingleExecutionResult) values.
//! These errors cover what stops a calling flow outright: a missing tool
//! binary, bad input paths, broken configuration and I/O around them.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building or configuring the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The tool binary is missing or its verification probe failed.
    #[error("{tool} is unavailable at {}: {reason}", path.display())]
    ToolUnavailable {
        tool: String,
        path: PathBuf,
        reason: String,
    },

    /// A caller-supplied path or argument is unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// File I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The async runtime could not be built or a task could not be joined.
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Convenience alias for results with [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;
