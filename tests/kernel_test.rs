/*!
 * Kernel Integration Tests
 * End-to-end agent lifecycles through the kernel facade
 */

use agent_kernel::{
    AgentState, CapacityMode, ExecutionError, FnExecutor, Kernel, KernelConfig, KernelError,
    PageType, Pid, ResourceQuota, StepCost, StepOutcome, StepExecutor,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Executor that finishes each agent after a fixed number of steps
struct CountdownExecutor {
    steps_left: Mutex<HashMap<Pid, u32>>,
    default_steps: u32,
    cost: StepCost,
}

impl CountdownExecutor {
    fn new(default_steps: u32, cost: StepCost) -> Self {
        Self {
            steps_left: Mutex::new(HashMap::new()),
            default_steps,
            cost,
        }
    }
}

impl StepExecutor for CountdownExecutor {
    fn step(&self, pid: Pid, _context: &[String]) -> Result<StepOutcome, ExecutionError> {
        let mut left = self.steps_left.lock();
        let remaining = left.entry(pid).or_insert(self.default_steps);
        *remaining -= 1;
        if *remaining == 0 {
            Ok(StepOutcome::finished(self.cost, format!("agent {} done", pid)))
        } else {
            Ok(StepOutcome::running(self.cost))
        }
    }
}

fn kernel_with(config: KernelConfig, executor: Arc<dyn StepExecutor>) -> Kernel {
    let _ = env_logger::builder().is_test(true).try_init();
    Kernel::builder()
        .with_config(config)
        .with_executor(executor)
        .build()
        .unwrap()
}

#[test]
fn test_builder_requires_executor() {
    assert!(matches!(
        Kernel::builder().build(),
        Err(KernelError::Validation(_))
    ));
}

#[test]
fn test_agent_runs_to_completion() {
    let kernel = kernel_with(
        KernelConfig::default().with_max_concurrent(1),
        Arc::new(CountdownExecutor::new(3, StepCost::new(10, Duration::ZERO))),
    );
    let pid = kernel
        .spawn_agent("worker", 50, ResourceQuota::unlimited())
        .unwrap();

    let (ran, state) = kernel.run_once().unwrap().unwrap();
    assert_eq!(ran, pid);
    assert_eq!(state, AgentState::Terminated);

    let status = kernel.get_status(pid).unwrap();
    assert_eq!(status.usage.iterations, 3);
    assert_eq!(status.usage.tokens, 30);
    assert!(status.resident_pages.is_empty());
    assert!(kernel.is_idle());
}

#[test]
fn test_agents_complete_in_priority_order() {
    let kernel = kernel_with(
        KernelConfig::default().with_max_concurrent(1).with_aging(0, 0),
        Arc::new(CountdownExecutor::new(2, StepCost::new(1, Duration::ZERO))),
    );
    let low = kernel
        .spawn_agent("low", 90, ResourceQuota::unlimited())
        .unwrap();
    let high = kernel
        .spawn_agent("high", 10, ResourceQuota::unlimited())
        .unwrap();

    let (first, _) = kernel.run_once().unwrap().unwrap();
    let (second, _) = kernel.run_once().unwrap().unwrap();
    assert_eq!(first, high);
    assert_eq!(second, low);
    assert_eq!(kernel.run_once().unwrap(), None);
}

#[test]
fn test_quota_suspension_through_run_loop() {
    let kernel = kernel_with(
        KernelConfig::default().with_max_concurrent(1).with_time_slice(16),
        Arc::new(CountdownExecutor::new(100, StepCost::new(50, Duration::ZERO))),
    );
    let pid = kernel
        .spawn_agent(
            "spender",
            50,
            ResourceQuota::unlimited().with_max_tokens(200),
        )
        .unwrap();

    let (_, state) = kernel.run_once().unwrap().unwrap();
    assert_eq!(state, AgentState::Suspended);
    // 5 steps of 50 tokens; the 5th crossed the 200-token ceiling
    assert_eq!(kernel.get_status(pid).unwrap().usage.tokens, 250);
    assert_eq!(kernel.stats().scheduler.quota_suspensions, 1);

    // Nothing left to dispatch, but the process is not gone
    assert_eq!(kernel.run_once().unwrap(), None);
    assert!(!kernel.is_idle());
}

#[test]
fn test_transient_errors_terminate_after_budget() {
    let kernel = kernel_with(
        KernelConfig::default().with_max_concurrent(1).with_time_slice(16),
        Arc::new(FnExecutor::new(|_, _| {
            Err(ExecutionError::transient("model overloaded"))
        })),
    );
    let pid = kernel
        .spawn_agent("flaky", 50, ResourceQuota::unlimited())
        .unwrap();

    let (_, state) = kernel.run_once().unwrap().unwrap();
    // Errors 1..3 are tolerated, the 4th exceeds max_step_errors = 3
    assert_eq!(state, AgentState::Terminated);
    assert_eq!(kernel.get_status(pid).unwrap().state, AgentState::Terminated);
    assert_eq!(kernel.stats().scheduler.errors, 4);
}

#[test]
fn test_fatal_error_terminates_immediately() {
    let kernel = kernel_with(
        KernelConfig::default().with_max_concurrent(1),
        Arc::new(FnExecutor::new(|_, _| {
            Err(ExecutionError::fatal("prompt rejected"))
        })),
    );
    let pid = kernel
        .spawn_agent("doomed", 50, ResourceQuota::unlimited())
        .unwrap();

    let (_, state) = kernel.run_once().unwrap().unwrap();
    assert_eq!(state, AgentState::Terminated);
    assert_eq!(kernel.stats().scheduler.errors, 1);
    assert_eq!(kernel.get_status(pid).unwrap().usage.iterations, 0);
}

#[test]
fn test_executor_sees_assembled_context() {
    let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_by_exec = Arc::clone(&seen);
    let kernel = kernel_with(
        KernelConfig::default().with_max_concurrent(1),
        Arc::new(FnExecutor::new(move |_, context: &[String]| {
            seen_by_exec.lock().push(context.to_vec());
            Ok(StepOutcome::finished(StepCost::new(1, Duration::ZERO), "ok"))
        })),
    );
    let pid = kernel
        .spawn_agent("reader", 50, ResourceQuota::unlimited())
        .unwrap();
    kernel
        .allocate_page(pid, "notes on the task", 0.5, PageType::Task)
        .unwrap();
    kernel
        .allocate_page(pid, "you are a helpful agent", 1.0, PageType::System)
        .unwrap();

    kernel.run(1).unwrap();
    let calls = seen.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0],
        vec!["you are a helpful agent", "notes on the task"]
    );
}

#[test]
fn test_memory_quota_enforced_from_resident_tokens() {
    let kernel = kernel_with(
        KernelConfig::default()
            .with_capacity(CapacityMode::PerProcess(10_000))
            .with_max_concurrent(1),
        Arc::new(CountdownExecutor::new(10, StepCost::new(1, Duration::ZERO))),
    );
    let pid = kernel
        .spawn_agent(
            "hoarder",
            50,
            ResourceQuota::unlimited().with_max_memory(100),
        )
        .unwrap();
    kernel
        .allocate_page_sized(pid, "big context", 500, 0.5, PageType::Task)
        .unwrap();

    let (_, state) = kernel.run_once().unwrap().unwrap();
    // First step observes 500 resident tokens against a 100-token ceiling
    assert_eq!(state, AgentState::Suspended);
    assert_eq!(kernel.get_status(pid).unwrap().usage.memory_peak, 500);
}

#[test]
fn test_terminate_discards_in_flight_semantics() {
    // Termination mid-dispatch: the executor terminates its own process
    // through a kernel clone, and the step result is discarded
    let kernel_cell: Arc<Mutex<Option<Kernel>>> = Arc::new(Mutex::new(None));
    let cell = Arc::clone(&kernel_cell);
    let kernel = kernel_with(
        KernelConfig::default().with_max_concurrent(1),
        Arc::new(FnExecutor::new(move |pid, _context: &[String]| {
            let k = cell.lock().clone().unwrap();
            k.terminate_agent(pid).unwrap();
            Ok(StepOutcome::running(StepCost::new(999, Duration::ZERO)))
        })),
    );
    *kernel_cell.lock() = Some(kernel.clone());

    let pid = kernel
        .spawn_agent("self-terminating", 50, ResourceQuota::unlimited())
        .unwrap();
    let (ran, state) = kernel.run_once().unwrap().unwrap();
    assert_eq!(ran, pid);
    assert_eq!(state, AgentState::Terminated);
    // The in-flight cost was discarded, never accounted
    assert_eq!(kernel.get_status(pid).unwrap().usage.tokens, 0);
}

#[test]
fn test_max_concurrent_two_slots() {
    let kernel = kernel_with(
        KernelConfig::default().with_max_concurrent(2),
        Arc::new(CountdownExecutor::new(1, StepCost::new(1, Duration::ZERO))),
    );
    for i in 0..3 {
        kernel
            .spawn_agent(format!("agent-{}", i), 50, ResourceQuota::unlimited())
            .unwrap();
    }

    assert_eq!(kernel.run(10).unwrap(), 3);
    assert!(kernel.is_idle());
    assert_eq!(kernel.stats().scheduler.completed, 3);
}

#[test]
fn test_status_reports_pages_and_usage() {
    let kernel = kernel_with(
        KernelConfig::default().with_max_concurrent(1),
        Arc::new(CountdownExecutor::new(2, StepCost::new(5, Duration::ZERO))),
    );
    let pid = kernel
        .spawn_agent("observed", 25, ResourceQuota::unlimited().with_max_tokens(1_000))
        .unwrap();
    kernel
        .allocate_page_sized(pid, "context", 40, 0.7, PageType::Task)
        .unwrap();

    let status = kernel.get_status(pid).unwrap();
    assert_eq!(status.pid, pid);
    assert_eq!(status.name, "observed");
    assert_eq!(status.priority, 25);
    assert_eq!(status.state, AgentState::Ready);
    assert_eq!(status.resident_tokens, 40);
    assert_eq!(status.resident_pages.len(), 1);
    assert_eq!(status.resident_pages[0].importance, 0.7);
}
