//! Work requests, in-flight work items, and completed work.

use crate::pool::error::{ExecErrorKind, SubmitError};
use crate::pool::loader::FileKey;
use crate::pool::value::MarshaledValue;
use std::fmt;

/// A typed unit of requested execution.
///
/// Requests are validated before entering any queue; duck-typed request
/// objects have no counterpart here. The originating callback is not part
/// of the request payload — it stays registered on the coordinator, keyed
/// by `work_id`, so no callback handle ever crosses a thread.
#[derive(Clone, Debug)]
pub struct WorkRequest {
    pub work_id: u64,
    pub file_key: FileKey,
    pub function: String,
    pub param: MarshaledValue,
}

impl WorkRequest {
    pub fn new(
        work_id: u64,
        file_key: FileKey,
        function: impl Into<String>,
        param: MarshaledValue,
    ) -> Self {
        Self {
            work_id,
            file_key,
            function: function.into(),
            param,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SubmitError> {
        if self.function.is_empty() {
            return Err(SubmitError::InvalidRequest(
                "function name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// The cross-thread form of a request: identifiers and owned data only.
#[derive(Debug)]
pub(crate) struct WorkItem {
    pub work_id: u64,
    pub file_key: FileKey,
    pub function: String,
    pub param: MarshaledValue,
}

impl From<WorkRequest> for WorkItem {
    fn from(request: WorkRequest) -> Self {
        Self {
            work_id: request.work_id,
            file_key: request.file_key,
            function: request.function,
            param: request.param,
        }
    }
}

/// Captured execution failure: the phase it occurred in plus the formatted
/// error text. Delivered to the caller only through the callback error
/// slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkError {
    pub kind: ExecErrorKind,
    pub message: String,
}

impl WorkError {
    pub(crate) fn new(kind: ExecErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for WorkError {}

/// One finished work item, published exactly once on the callback queue.
/// The `Result` carries exactly one of result or error, never both.
#[derive(Debug)]
pub struct CompletedWork {
    pub work_id: u64,
    pub worker: usize,
    pub outcome: Result<MarshaledValue, WorkError>,
}

impl CompletedWork {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }
}
