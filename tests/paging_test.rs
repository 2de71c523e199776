/*!
 * Context Paging Tests
 * Capacity enforcement, eviction sweeps, swap round-trips, and fault handling
 */

use agent_kernel::{
    AgentState, CapacityMode, ContextManager, FnExecutor, InMemoryStorage, Kernel, KernelConfig,
    KernelError, PageType, ResourceQuota, StepCost, StepOutcome, StorageBackend,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn manager(capacity: CapacityMode) -> ContextManager {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = KernelConfig::default()
        .with_capacity(capacity)
        .with_swap_retries(2, Duration::ZERO);
    let m = ContextManager::new(&config, Arc::new(InMemoryStorage::new()));
    m.create_table(1);
    m
}

fn test_kernel(capacity: CapacityMode, storage: Arc<dyn StorageBackend>) -> Kernel {
    Kernel::builder()
        .with_config(
            KernelConfig::default()
                .with_capacity(capacity)
                .with_max_concurrent(1)
                .with_swap_retries(1, Duration::ZERO),
        )
        .with_storage(storage)
        .with_executor(Arc::new(FnExecutor::new(|_, _| {
            Ok(StepOutcome::running(StepCost::new(1, Duration::ZERO)))
        })))
        .build()
        .unwrap()
}

#[test]
fn test_eviction_minimality() {
    // Budget 1000, usage 900 across several pages; a 200-token allocation
    // must evict pages covering >= 100 tokens and no more than necessary.
    let m = manager(CapacityMode::PerProcess(1_000));
    for i in 0..9 {
        let importance = 0.1 + 0.05 * i as f64;
        m.allocate(1, format!("page {}", i), 100, importance, PageType::Working)
            .unwrap();
    }
    assert_eq!(m.resident_tokens(1).unwrap(), 900);

    m.allocate(1, "incoming".into(), 200, 0.9, PageType::Task)
        .unwrap();

    // One 100-token eviction covers the 100-token shortfall
    assert_eq!(m.stats().evictions, 1);
    assert_eq!(m.resident_tokens(1).unwrap(), 1_000);
}

#[test]
fn test_pinned_never_evicted_while_unpinned_exist() {
    let m = manager(CapacityMode::PerProcess(300));
    // Pinned page with a score that would otherwise make it the first victim
    let system = m
        .allocate(1, "system".into(), 100, 1.0, PageType::System)
        .unwrap();
    let w1 = m
        .allocate(1, "w1".into(), 100, 0.9, PageType::Working)
        .unwrap();
    let w2 = m
        .allocate(1, "w2".into(), 100, 0.9, PageType::Working)
        .unwrap();

    m.allocate(1, "incoming".into(), 200, 0.5, PageType::Task)
        .unwrap();

    assert!(m.is_resident(system).unwrap());
    assert!(!m.is_resident(w1).unwrap());
    assert!(!m.is_resident(w2).unwrap());
}

#[test]
fn test_capacity_exceeded_with_pinned_page() {
    // The quota scenario: a 950-token pinned page plus a 100-token request
    // cannot fit a 1000-token budget, and the pinned page is not evictable.
    let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
    let kernel = test_kernel(CapacityMode::PerProcess(1_000), storage);

    let mut pids = Vec::new();
    for (name, priority) in [("a", 10u8), ("b", 50), ("c", 90)] {
        let pid = kernel
            .spawn_agent(name, priority, ResourceQuota::unlimited().with_max_tokens(1_000))
            .unwrap();
        kernel
            .allocate_page_sized(pid, format!("system {}", name), 950, 0.9, PageType::System)
            .unwrap();
        pids.push(pid);
    }

    let err = kernel
        .allocate_page_sized(pids[1], "working", 100, 0.5, PageType::Working)
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::CapacityExceeded {
            requested: 100,
            capacity: 1_000,
            evictable: 0,
        }
    ));
}

#[test]
fn test_swap_round_trip_preserves_content() {
    let m = manager(CapacityMode::PerProcess(100));
    let first = m
        .allocate(1, "the first page".into(), 100, 0.2, PageType::Working)
        .unwrap();
    m.allocate(1, "the second page".into(), 100, 0.8, PageType::Working)
        .unwrap();

    assert!(!m.is_resident(first).unwrap());
    assert_eq!(m.swap_in(first).unwrap(), "the first page");
    assert_eq!(m.stats().swaps_out, 1);
    assert_eq!(m.stats().swaps_in, 1);
}

#[test]
fn test_fault_parks_owner_and_wakes_it() {
    let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
    let kernel = test_kernel(CapacityMode::PerProcess(100), storage);
    let pid = kernel
        .spawn_agent("agent", 50, ResourceQuota::unlimited())
        .unwrap();

    let first = kernel
        .allocate_page_sized(pid, "first", 100, 0.2, PageType::Working)
        .unwrap();
    kernel
        .allocate_page_sized(pid, "second", 100, 0.8, PageType::Working)
        .unwrap();

    // Access while not Running: content comes back, no state transition
    assert_eq!(kernel.access_page(first).unwrap(), "first");
    assert_eq!(kernel.get_status(pid).unwrap().state, AgentState::Ready);
    assert_eq!(kernel.stats().paging.page_faults, 1);
    assert_eq!(kernel.stats().scheduler.page_faults_resolved, 0);
}

#[test]
fn test_swap_timeout_suspends_owner() {
    let storage = Arc::new(InMemoryStorage::new());
    let kernel = test_kernel(
        CapacityMode::PerProcess(100),
        Arc::clone(&storage) as Arc<dyn StorageBackend>,
    );
    let pid = kernel
        .spawn_agent("agent", 50, ResourceQuota::unlimited())
        .unwrap();
    let first = kernel
        .allocate_page_sized(pid, "first", 100, 0.2, PageType::Working)
        .unwrap();
    kernel
        .allocate_page_sized(pid, "second", 100, 0.8, PageType::Working)
        .unwrap();

    // Retry limit is 1: two injected failures exhaust initial try + retry
    storage.inject_swap_failures(2);
    let err = kernel.access_page(first).unwrap_err();
    assert!(matches!(err, KernelError::StorageTimeout(_)));
    assert_eq!(kernel.get_status(pid).unwrap().state, AgentState::Suspended);

    // Data was never lost; once storage recovers the page swaps back in
    kernel.resume_agent(pid).unwrap();
    assert_eq!(kernel.access_page(first).unwrap(), "first");
}

#[test]
fn test_context_assembly_order() {
    let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
    let kernel = test_kernel(CapacityMode::PerProcess(10_000), storage);
    let pid = kernel
        .spawn_agent("agent", 50, ResourceQuota::unlimited())
        .unwrap();

    kernel
        .allocate_page_sized(pid, "task plan", 100, 0.5, PageType::Task)
        .unwrap();
    kernel
        .allocate_page_sized(pid, "system prompt", 100, 1.0, PageType::System)
        .unwrap();
    kernel
        .allocate_page_sized(pid, "tool output", 100, 0.5, PageType::Tool)
        .unwrap();

    // Pinned content leads, the rest follows in insertion order
    assert_eq!(
        kernel.get_agent_context(pid).unwrap(),
        vec!["system prompt", "task plan", "tool output"]
    );
}

#[test]
fn test_release_frees_budget_immediately() {
    let m = manager(CapacityMode::PerProcess(200));
    let a = m
        .allocate(1, "a".into(), 200, 0.5, PageType::System)
        .unwrap();
    m.release(a).unwrap();
    // The freed budget is usable without any eviction
    m.allocate(1, "b".into(), 200, 0.5, PageType::Task).unwrap();
    assert_eq!(m.stats().evictions, 0);
}

#[test]
fn test_update_importance_changes_victim_choice() {
    let m = manager(CapacityMode::PerProcess(200));
    let a = m
        .allocate(1, "a".into(), 100, 0.5, PageType::Working)
        .unwrap();
    let b = m
        .allocate(1, "b".into(), 100, 0.5, PageType::Working)
        .unwrap();

    // Raising importance lowers the score, making the page the next victim
    m.update_importance(a, 0.95).unwrap();
    m.allocate(1, "c".into(), 100, 0.5, PageType::Task).unwrap();
    assert!(!m.is_resident(a).unwrap());
    assert!(m.is_resident(b).unwrap());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Resident tokens never exceed the configured capacity, whatever the
    /// allocation pattern.
    #[test]
    fn prop_resident_tokens_never_exceed_capacity(
        sizes in prop::collection::vec(1u64..400, 1..40),
        importances in prop::collection::vec(0.0f64..=1.0, 40),
    ) {
        let m = manager(CapacityMode::PerProcess(1_000));
        for (i, size) in sizes.iter().enumerate() {
            let importance = importances[i % importances.len()];
            // Oversized requests may fail; the invariant must hold regardless
            let _ = m.allocate(1, format!("p{}", i), *size, importance, PageType::Working);
            prop_assert!(m.resident_tokens(1).unwrap() <= 1_000);
        }
    }
}
