//! Error types for pool startup, submission, and work execution.

use crate::pool::loader::FileKey;
use std::fmt;

/// Synchronous rejection of a submission, returned to the caller before the
/// request enters any queue.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The pool is shutting down; no new work is accepted.
    #[error("worker pool is shutting down")]
    QueueClosed,
    /// The request failed validation (e.g. empty function name, duplicate
    /// in-flight work id).
    #[error("invalid work request: {0}")]
    InvalidRequest(String),
    /// An explicit worker index was out of range.
    #[error("worker index {index} out of range for pool of {workers}")]
    NoSuchWorker { index: usize, workers: usize },
}

/// Fatal pool-startup failure. Execution-phase errors are never fatal to
/// the pool; only configuration, thread-spawn, and engine-initialization
/// failures surface here.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("invalid pool configuration: {0}")]
    Config(String),
    #[error("failed to spawn worker thread: {0}")]
    Thread(#[from] std::io::Error),
    #[error("worker {worker} failed to initialize: {message}")]
    WorkerInit { worker: usize, message: String },
}

/// Phase in which a work item failed. The kind prefixes the captured error
/// text delivered through the callback error slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecErrorKind {
    /// Module source not found by the loader.
    Resolution,
    /// Compile failure for the module source.
    Compile,
    /// Exception raised while running the module or the invoked function.
    Runtime,
    /// Requested function missing or not callable on the module object.
    Invocation,
}

impl fmt::Display for ExecErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecErrorKind::Resolution => "ResolutionError",
            ExecErrorKind::Compile => "CompileError",
            ExecErrorKind::Runtime => "RuntimeError",
            ExecErrorKind::Invocation => "InvocationError",
        };
        f.write_str(name)
    }
}

/// Failure to resolve a module source for a `FileKey`.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no module source registered for key {0}")]
    NotFound(FileKey),
    #[error("failed to read module source: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_error_kind_display_names() {
        assert_eq!(ExecErrorKind::Resolution.to_string(), "ResolutionError");
        assert_eq!(ExecErrorKind::Compile.to_string(), "CompileError");
        assert_eq!(ExecErrorKind::Runtime.to_string(), "RuntimeError");
        assert_eq!(ExecErrorKind::Invocation.to_string(), "InvocationError");
    }
}
