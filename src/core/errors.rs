/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use super::types::{PageId, Pid, Tokens};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kernel errors with serialization support
///
/// Nothing here is fatal to the kernel itself; every variant describes the
/// failure of a single operation or the suspension of a single process.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum KernelError {
    #[error("validation failed: {0}")]
    #[diagnostic(
        code(kernel::validation),
        help("The request was rejected before any state change. Check priority range, quota limits, and importance bounds.")
    )]
    Validation(String),

    #[error("process {0} not found")]
    #[diagnostic(
        code(kernel::process_not_found),
        help("The process may have been terminated and reaped, or the pid never existed.")
    )]
    ProcessNotFound(Pid),

    #[error("page {0} not found")]
    #[diagnostic(
        code(kernel::page_not_found),
        help("The page was released or the id never existed.")
    )]
    PageNotFound(PageId),

    #[error("invalid state for process {pid}: {reason}")]
    #[diagnostic(
        code(kernel::invalid_state),
        help("The operation is not legal in the process's current state.")
    )]
    InvalidState { pid: Pid, reason: String },

    #[error("capacity exceeded: requested {requested} tokens, capacity {capacity}, evictable {evictable}")]
    #[diagnostic(
        code(kernel::capacity_exceeded),
        help("Even a full eviction sweep cannot make room. Reduce the allocation size.")
    )]
    CapacityExceeded {
        requested: Tokens,
        capacity: Tokens,
        evictable: Tokens,
    },

    #[error("quota exceeded for process {pid}: {dimension}")]
    #[diagnostic(
        code(kernel::quota_exceeded),
        help("The process was suspended, not terminated. Raise the quota or resume explicitly.")
    )]
    QuotaExceeded { pid: Pid, dimension: String },

    #[error("storage timeout: {0}")]
    #[diagnostic(
        code(kernel::storage_timeout),
        help("The storage backend did not respond within bounds. The operation was retried before surfacing this.")
    )]
    StorageTimeout(String),

    #[error("checkpoint corrupt: {0}")]
    #[diagnostic(
        code(kernel::checkpoint_corrupt),
        help("The snapshot failed structural validation. The restore attempt was abandoned; the checkpoint itself is untouched.")
    )]
    CheckpointCorrupt(String),

    #[error("execution failed for process {pid}: {message}")]
    #[diagnostic(
        code(kernel::execution),
        help("The step executor reported a failure. Fatal errors terminate the process; transient ones are retried up to the error budget.")
    )]
    Execution { pid: Pid, message: String },
}

impl KernelError {
    pub fn invalid_state(pid: Pid, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            pid,
            reason: reason.into(),
        }
    }
}
