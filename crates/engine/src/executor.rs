// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Executors run node invocations.
//!
//! The scheduler hands each invocation to the executor its node is assigned
//! to. [`ThreadPoolExecutor`] is the built-in pool; embedders can supply their
//! own [`Executor`] through `CalculatorGraph::set_executor`.

use crate::constants::{FALLBACK_NUM_THREADS, WORKER_THREAD_PREFIX};
use flowkit_core::{FlowKitError, Result};
use std::fmt;
use std::num::NonZeroUsize;

/// One unit of scheduled work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks, possibly on other threads. `schedule` must not block on the
/// task itself.
pub trait Executor: Send + Sync {
    fn schedule(&self, task: Task);
}

/// Worker count of the default executor when nothing else is configured.
pub fn default_num_threads() -> usize {
    std::thread::available_parallelism().map_or(FALLBACK_NUM_THREADS, NonZeroUsize::get)
}

/// A pool of named OS threads backed by a dedicated multi-threaded tokio runtime.
pub struct ThreadPoolExecutor {
    name: String,
    num_threads: usize,
    runtime: Option<tokio::runtime::Runtime>,
}

impl ThreadPoolExecutor {
    /// Starts a pool of `num_threads` workers named `flowkit-<name>`.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` for a zero-sized pool and
    /// `FlowKitError::Runtime` if the threads cannot be started.
    pub fn new(name: &str, num_threads: usize) -> Result<Self> {
        if num_threads == 0 {
            return Err(FlowKitError::Configuration(format!(
                "Executor '{name}' needs at least one thread"
            )));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(num_threads)
            .thread_name(format!("{WORKER_THREAD_PREFIX}-{name}"))
            .build()
            .map_err(|e| FlowKitError::Runtime(format!("Failed to start executor '{name}': {e}")))?;
        tracing::debug!(executor = %name, num_threads, "Started thread pool executor");
        Ok(Self { name: name.to_string(), num_threads, runtime: Some(runtime) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn num_threads(&self) -> usize {
        self.num_threads
    }
}

impl Executor for ThreadPoolExecutor {
    fn schedule(&self, task: Task) {
        if let Some(runtime) = &self.runtime {
            runtime.spawn(async move { task() });
        }
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        // The last reference may be dropped on one of our own workers.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("name", &self.name)
            .field("num_threads", &self.num_threads)
            .finish_non_exhaustive()
    }
}
