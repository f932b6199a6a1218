//! Synchronous facade over the async engine.
//!
//! [`BlockingRuntime`] owns one multi-threaded tokio runtime for its whole
//! lifetime and joins engine futures on it. Build it once and reuse it;
//! it must not be used from inside another async runtime.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use memtriage_core::{CombinedResult, ProfileDetectionResult, SingleExecutionResult};
use tokio::runtime::{Builder, Runtime};

use crate::batch::{BatchScheduler, ItemExecutor, ItemKey};
use crate::error::{EngineError, Result};
use crate::plugin::PluginExecutor;
use crate::postprocess::PostProcessingCoordinator;
use crate::profile::ProfileDetector;

/// Blocking entry points for callers without an async runtime.
pub struct BlockingRuntime {
    runtime: Runtime,
}

impl BlockingRuntime {
    /// Starts the owned runtime.
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("memtriage-worker")
            .build()
            .map_err(|e| EngineError::Runtime(format!("failed to start runtime: {e}")))?;
        Ok(Self { runtime })
    }

    /// Runs any engine future to completion.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn run_plugin(
        &self,
        executor: &PluginExecutor,
        plugin: &str,
        extra_args: &[String],
    ) -> SingleExecutionResult {
        self.block_on(executor.run(plugin, extra_args))
    }

    pub fn run_batch<K, E>(
        &self,
        scheduler: &BatchScheduler,
        items: Vec<K>,
        executor: Arc<E>,
    ) -> BTreeMap<K, SingleExecutionResult>
    where
        K: ItemKey,
        E: ItemExecutor<K> + ?Sized + 'static,
    {
        self.block_on(scheduler.run_batch(items, executor))
    }

    pub fn detect(&self, detector: &ProfileDetector, image_path: &Path) -> ProfileDetectionResult {
        self.block_on(detector.detect(image_path))
    }

    pub fn process(
        &self,
        coordinator: &PostProcessingCoordinator,
        artifact: &Path,
        run_scan: bool,
        run_metadata: bool,
    ) -> CombinedResult {
        self.block_on(coordinator.process(artifact, run_scan, run_metadata))
    }
}
