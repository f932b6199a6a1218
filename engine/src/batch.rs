//! Concurrency-bounded batch execution.
//!
//! A [`BatchScheduler`] owns a counting gate. Every item of a batch is
//! spawned at once but only `max_concurrent` of them hold a permit, and so
//! run their tool, at any moment. Items are isolated from each other: an
//! error or panic in one item becomes a `Failed` record for that item and
//! never disturbs the rest.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use memtriage_core::{NOT_EXITED_CODE, SingleExecutionResult};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ConcurrencyConfig;
use crate::error::{EngineError, Result};
use crate::metadata::MetadataExtractor;
use crate::plugin::PluginExecutor;
use crate::scanner::SignatureScanner;
use crate::tool::{ToolClass, ToolKind};

/// Identity of one batch item; also the key of the result map.
pub trait ItemKey: Ord + Clone + Send + Sync + 'static {
    /// Rendering used in logs.
    fn label(&self) -> String;
}

impl ItemKey for String {
    fn label(&self) -> String {
        self.clone()
    }
}

impl ItemKey for PathBuf {
    fn label(&self) -> String {
        self.display().to_string()
    }
}

/// Runs one batch item.
///
/// Returning `Err` (or panicking) is recorded as a `Failed` result named
/// by [`tool_name`](Self::tool_name).
#[async_trait]
pub trait ItemExecutor<K: ItemKey>: Send + Sync {
    async fn execute(&self, item: &K) -> Result<SingleExecutionResult>;

    /// `tool_name` for results synthesized on behalf of `item`.
    fn tool_name(&self, item: &K) -> String;
}

#[async_trait]
impl ItemExecutor<String> for PluginExecutor {
    async fn execute(&self, plugin: &String) -> Result<SingleExecutionResult> {
        if plugin.trim().is_empty() {
            return Err(EngineError::InvalidInput("plugin name cannot be empty".into()));
        }
        Ok(self.run(plugin, &[]).await)
    }

    fn tool_name(&self, plugin: &String) -> String {
        plugin.clone()
    }
}

#[async_trait]
impl ItemExecutor<PathBuf> for SignatureScanner {
    async fn execute(&self, file: &PathBuf) -> Result<SingleExecutionResult> {
        Ok(self.analyze(file).await)
    }

    fn tool_name(&self, _: &PathBuf) -> String {
        ToolKind::Binwalk.name().to_string()
    }
}

#[async_trait]
impl ItemExecutor<PathBuf> for MetadataExtractor {
    async fn execute(&self, file: &PathBuf) -> Result<SingleExecutionResult> {
        Ok(self.analyze(file).await)
    }

    fn tool_name(&self, _: &PathBuf) -> String {
        ToolKind::ExifTool.name().to_string()
    }
}

/// Bounds how many batch items run at once.
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    gate: Arc<Semaphore>,
    max_concurrent: usize,
}

impl BatchScheduler {
    /// Creates a scheduler; a ceiling of zero is raised to one.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            gate: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Scheduler with the configured ceiling for `class`.
    pub fn for_class(class: ToolClass, concurrency: &ConcurrencyConfig) -> Self {
        let ceiling = match class {
            ToolClass::MemoryAnalysis => concurrency.memory_analysis,
            ToolClass::SignatureScan => concurrency.signature_scan,
            ToolClass::Metadata => concurrency.metadata,
        };
        Self::new(ceiling)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Permits currently free; equals `max_concurrent` when idle.
    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    /// Runs every item and returns once all of them have finished.
    ///
    /// Repeated items run once, so two tasks never share an output path.
    /// The map holds one result per distinct item. Completion order is
    /// unspecified; the map is ordered by key.
    pub async fn run_batch<K, E>(&self, items: Vec<K>, executor: Arc<E>) -> BTreeMap<K, SingleExecutionResult>
    where
        K: ItemKey,
        E: ItemExecutor<K> + ?Sized + 'static,
    {
        let items = distinct(items);
        info!(items = items.len(), max_concurrent = self.max_concurrent, "Starting batch");
        let batch_started = Instant::now();
        let mut tasks = JoinSet::new();

        for item in items.iter().cloned() {
            let gate = Arc::clone(&self.gate);
            let executor = Arc::clone(&executor);
            tasks.spawn(async move {
                let started = Instant::now();
                let Ok(_permit) = gate.acquire_owned().await else {
                    let result = unexpected(executor.tool_name(&item), "admission gate closed", started);
                    return (item, result);
                };
                debug!(item = %item.label(), "Batch item admitted");

                let outcome = std::panic::AssertUnwindSafe(executor.execute(&item))
                    .catch_unwind()
                    .await;
                let result = match outcome {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => {
                        error!(item = %item.label(), error = %e, "Batch item failed unexpectedly");
                        unexpected(executor.tool_name(&item), &e.to_string(), started)
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!(item = %item.label(), error = %message, "Batch item panicked");
                        unexpected(executor.tool_name(&item), &message, started)
                    }
                };
                (item, result)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((item, result)) => {
                    results.insert(item, result);
                }
                Err(e) => error!(error = %e, "Batch task aborted"),
            }
        }

        // Items whose task was aborted still get a record.
        for item in items {
            if !results.contains_key(&item) {
                let result = unexpected(executor.tool_name(&item), "batch task aborted", batch_started);
                results.insert(item, result);
            }
        }

        info!(
            items = results.len(),
            succeeded = results.values().filter(|r| r.is_success()).count(),
            elapsed_secs = batch_started.elapsed().as_secs_f64(),
            "Batch finished"
        );
        results
    }
}

/// One-shot batch with its own scheduler.
pub async fn run_batch<K, E>(
    items: Vec<K>,
    executor: Arc<E>,
    max_concurrent: usize,
) -> BTreeMap<K, SingleExecutionResult>
where
    K: ItemKey,
    E: ItemExecutor<K> + ?Sized + 'static,
{
    BatchScheduler::new(max_concurrent)
        .run_batch(items, executor)
        .await
}

/// Drops repeated items, keeping first occurrences in order.
fn distinct<K: ItemKey>(items: Vec<K>) -> Vec<K> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .filter(|item| {
            let fresh = seen.insert(item.clone());
            if !fresh {
                warn!(item = %item.label(), "Dropping duplicate batch item");
            }
            fresh
        })
        .collect()
}

fn unexpected(tool_name: String, message: &str, started: Instant) -> SingleExecutionResult {
    SingleExecutionResult::started(tool_name).failed(
        NOT_EXITED_CODE,
        message,
        None,
        started.elapsed(),
    )
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "item panicked".to_string()
    }
}

/// Paths as batch keys.
pub fn path_items<I, P>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect()
}
