/*!
 * Agent Kernel Library
 * Process scheduling and context paging for cooperative agent workloads
 */

pub mod checkpoint;
pub mod core;
pub mod exec;
pub mod kernel;
pub mod memory;
pub mod process;
pub mod storage;

// Re-exports
pub use crate::core::config::{CapacityMode, EvictionWeights, KernelConfig};
pub use crate::core::errors::KernelError;
pub use crate::core::types::{
    CheckpointId, KernelResult, PageId, Pid, Priority, Tokens, PRIORITY_MAX,
};
pub use checkpoint::{CheckpointCoordinator, CheckpointInfo, CheckpointSnapshot};
pub use exec::{ExecutionError, FnExecutor, StepExecutor, StepOutcome};
pub use kernel::{AgentStatus, Kernel, KernelBuilder, KernelStats, KernelTask};
pub use memory::{ContextManager, PageInfo, PageType, PagingStats};
pub use process::{
    AgentState, ProcessInfo, QuotaDimension, QuotaUsage, ResourceQuota, Scheduler, SchedulerStats,
    StepCost,
};
pub use storage::{InMemoryStorage, StorageBackend, StorageError};
