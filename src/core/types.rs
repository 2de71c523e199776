/*!
 * Core Types
 * Common identifiers and aliases used across the kernel
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Process ID type
pub type Pid = u32;

/// Priority level (0-100, lower is more urgent)
pub type Priority = u8;

/// Highest allowed priority value
pub const PRIORITY_MAX: Priority = 100;

/// Monotonic admission sequence number, assigned at spawn
pub type AdmissionSeq = u64;

/// Logical scheduler clock (advances once per tick)
pub type Tick = u64;

/// Token count for context accounting
pub type Tokens = u64;

/// Common result type for kernel operations
pub type KernelResult<T> = Result<T, super::errors::KernelError>;

/// Context page identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(Uuid);

impl PageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Checkpoint identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(Uuid);

impl CheckpointId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Current wall-clock time as microseconds since the Unix epoch
pub fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
