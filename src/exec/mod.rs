/*!
 * Step Execution
 * Contract for the opaque step collaborator (the LLM/tool layer)
 */

use crate::core::types::Pid;
use crate::process::types::StepCost;
use thiserror::Error;

/// Result of one completed step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Resources consumed by this step
    pub cost: StepCost,
    /// The agent finished its task; the kernel terminates it cleanly
    pub done: bool,
    /// Optional output carried to the caller
    pub output: Option<String>,
}

impl StepOutcome {
    pub fn running(cost: StepCost) -> Self {
        Self {
            cost,
            done: false,
            output: None,
        }
    }

    pub fn finished(cost: StepCost, output: impl Into<String>) -> Self {
        Self {
            cost,
            done: true,
            output: Some(output.into()),
        }
    }
}

/// Step failure reported by the executor
///
/// Transient failures count against the process's error budget; fatal ones
/// terminate it immediately.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
    pub fatal: bool,
}

impl ExecutionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

/// The step collaborator
///
/// `step` is opaque and not preemptable mid-call; its duration is unbounded
/// from the kernel's viewpoint. Wall-clock quota is enforced at call
/// boundaries only.
pub trait StepExecutor: Send + Sync {
    fn step(&self, pid: Pid, context: &[String]) -> Result<StepOutcome, ExecutionError>;
}

/// Adapter so tests and demos can supply a closure as an executor
pub struct FnExecutor<F>(F);

impl<F> FnExecutor<F>
where
    F: Fn(Pid, &[String]) -> Result<StepOutcome, ExecutionError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> StepExecutor for FnExecutor<F>
where
    F: Fn(Pid, &[String]) -> Result<StepOutcome, ExecutionError> + Send + Sync,
{
    fn step(&self, pid: Pid, context: &[String]) -> Result<StepOutcome, ExecutionError> {
        (self.0)(pid, context)
    }
}
