//! Pool configuration.

use crate::pool::error::SpawnError;

/// Configuration for [`WorkerPool::spawn`](crate::pool::WorkerPool::spawn).
///
/// Validated once at spawn time; an invalid configuration is fatal to
/// startup, never to a running pool.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of worker threads, each bound 1:1 to its own execution
    /// context.
    pub workers: usize,
    /// Prefix for worker thread names; the worker index is appended.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            thread_name_prefix: "scriptpool-worker".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SpawnError> {
        if self.workers == 0 {
            return Err(SpawnError::Config(
                "pool requires at least one worker".to_string(),
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(SpawnError::Config(
                "thread name prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn thread_name(&self, index: usize) -> String {
        format!("{}-{}", self.thread_name_prefix, index)
    }
}
