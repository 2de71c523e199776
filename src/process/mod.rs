/*!
 * Process Management
 * Agent lifecycle, scheduling, and resource quota accounting
 */

pub mod process;
pub mod scheduler;
pub mod types;

pub use process::AgentProcess;
pub use scheduler::Scheduler;
pub use types::{
    AgentState, ProcessInfo, QuotaDimension, QuotaUsage, ResourceQuota, SchedulerStats, StepCost,
};
