/*!
 * Context Manager
 * Page-table arena with score-driven eviction and storage-backed swap
 */

use super::replacer::{Candidate, PageReplacer};
use super::types::{ContextPage, PageInfo, PageTable, PageType, PagingStats};
use crate::core::config::{CapacityMode, KernelConfig};
use crate::core::errors::KernelError;
use crate::core::types::{now_micros, KernelResult, PageId, Pid, Tokens};
use crate::storage::{StorageBackend, StorageError, StorageResult};
use ahash::RandomState;
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Context manager
///
/// Owns the page-table arena. Residency changes are serialized behind one
/// mutex so capacity accounting stays exact; page metadata reads go straight
/// to the arena.
pub struct ContextManager {
    tables: Arc<DashMap<Pid, PageTable, RandomState>>,
    page_index: Arc<DashMap<PageId, Pid, RandomState>>,
    storage: Arc<dyn StorageBackend>,
    replacer: PageReplacer,
    capacity: CapacityMode,
    retry_limit: u32,
    retry_backoff: Duration,
    /// Resident tokens across all tables; authoritative in Global mode,
    /// a gauge otherwise
    global_resident: Arc<AtomicU64>,
    /// Serializes allocate / swap / install, held across the storage call
    /// of each so residency state and storage contents move together
    paging: Arc<Mutex<()>>,
    stats: Arc<AtomicPagingStats>,
}

impl ContextManager {
    pub fn new(config: &KernelConfig, storage: Arc<dyn StorageBackend>) -> Self {
        info!(
            "Context manager initialized: capacity {:?}, swap retries {}",
            config.capacity, config.swap_retry_limit
        );

        Self {
            tables: Arc::new(DashMap::with_hasher(RandomState::new())),
            page_index: Arc::new(DashMap::with_hasher(RandomState::new())),
            storage,
            replacer: PageReplacer::new(config.eviction_weights, config.recency_half_life),
            capacity: config.capacity,
            retry_limit: config.swap_retry_limit,
            retry_backoff: config.swap_retry_backoff,
            global_resident: Arc::new(AtomicU64::new(0)),
            paging: Arc::new(Mutex::new(())),
            stats: Arc::new(AtomicPagingStats::new()),
        }
    }

    /// Create the (empty) page table for a new process
    pub fn create_table(&self, pid: Pid) {
        self.tables.entry(pid).or_insert_with(|| PageTable::new(pid));
    }

    pub fn contains_table(&self, pid: Pid) -> bool {
        self.tables.contains_key(&pid)
    }

    /// Drop a process's table and every page in it. Pinned pages go too.
    pub fn release_table(&self, pid: Pid) -> Tokens {
        let _guard = self.paging.lock();
        let Some((_, table)) = self.tables.remove(&pid) else {
            return 0;
        };

        let mut freed = 0;
        for page in table.iter() {
            self.page_index.remove(&page.id);
            if page.resident {
                freed += page.token_count;
            }
        }
        self.global_resident.fetch_sub(freed, Ordering::SeqCst);
        debug!("Released page table for process {} ({} tokens)", pid, freed);
        freed
    }

    /// Allocate a new page, evicting if the budget requires it
    pub fn allocate(
        &self,
        pid: Pid,
        content: String,
        token_count: Tokens,
        importance: f64,
        page_type: PageType,
    ) -> KernelResult<PageId> {
        if !(0.0..=1.0).contains(&importance) {
            return Err(KernelError::Validation(format!(
                "importance {} outside [0, 1]",
                importance
            )));
        }
        if token_count == 0 {
            return Err(KernelError::Validation("token_count must be positive".into()));
        }
        if !self.tables.contains_key(&pid) {
            return Err(KernelError::ProcessNotFound(pid));
        }

        let _guard = self.paging.lock();
        self.make_room(pid, token_count, token_count)?;

        let page = ContextPage::new(pid, content, token_count, importance, page_type);
        let id = page.id;
        self.tables
            .get_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?
            .insert(page);
        self.page_index.insert(id, pid);
        self.global_resident.fetch_add(token_count, Ordering::SeqCst);
        debug!("Allocated page {} ({} tokens) for process {}", id, token_count, pid);
        Ok(id)
    }

    /// Read a page if it is resident. `Ok(None)` is a page fault: the caller
    /// parks the owner and calls `swap_in`.
    pub fn try_access(&self, page_id: PageId) -> KernelResult<Option<String>> {
        let pid = self.owner_of(page_id)?;
        let mut table = self
            .tables
            .get_mut(&pid)
            .ok_or(KernelError::PageNotFound(page_id))?;
        let page = table
            .get_mut(page_id)
            .ok_or(KernelError::PageNotFound(page_id))?;

        self.stats.inc_accesses();
        if page.resident {
            page.touch();
            self.stats.inc_hits();
            Ok(Some(page.content.clone()))
        } else {
            self.stats.inc_faults();
            debug!("Page fault on {} (process {})", page_id, pid);
            Ok(None)
        }
    }

    /// Bring a swapped page back into residency, evicting others if needed.
    /// Retries timeouts up to the configured limit before giving up.
    pub fn swap_in(&self, page_id: PageId) -> KernelResult<String> {
        let pid = self.owner_of(page_id)?;
        let _guard = self.paging.lock();

        let token_count = {
            let table = self
                .tables
                .get(&pid)
                .ok_or(KernelError::PageNotFound(page_id))?;
            let page = table.get(page_id).ok_or(KernelError::PageNotFound(page_id))?;
            if page.resident {
                return Ok(page.content.clone());
            }
            page.token_count
        };

        let storage = Arc::clone(&self.storage);
        let content = self
            .retried(|| storage.swap_in(page_id))
            .map_err(|e| match e {
                StorageError::Timeout(msg) => KernelError::StorageTimeout(msg),
                StorageError::NotFound(_) => KernelError::PageNotFound(page_id),
            })?;

        self.make_room(pid, token_count, token_count)?;

        let mut table = self
            .tables
            .get_mut(&pid)
            .ok_or(KernelError::PageNotFound(page_id))?;
        if let Some(page) = table.set_resident(page_id, true) {
            page.content = content.clone();
            page.touch();
        }
        drop(table);
        self.global_resident.fetch_add(token_count, Ordering::SeqCst);
        self.stats.inc_swaps_in();
        debug!("Swapped in page {} for process {}", page_id, pid);
        Ok(content)
    }

    /// Explicitly push a page out to storage. Refused for pinned pages.
    pub fn swap_out(&self, page_id: PageId) -> KernelResult<()> {
        let pid = self.owner_of(page_id)?;
        let _guard = self.paging.lock();

        let content = {
            let table = self
                .tables
                .get(&pid)
                .ok_or(KernelError::PageNotFound(page_id))?;
            let page = table.get(page_id).ok_or(KernelError::PageNotFound(page_id))?;
            if page.page_type.is_pinned() {
                return Err(KernelError::Validation(format!(
                    "page {} is pinned and cannot be swapped out",
                    page_id
                )));
            }
            if !page.resident {
                return Ok(());
            }
            page.content.clone()
        };

        self.persist_and_demote(pid, page_id, &content)
    }

    /// Remove a page entirely. Legal for pinned pages.
    pub fn release(&self, page_id: PageId) -> KernelResult<()> {
        let _guard = self.paging.lock();
        let (_, pid) = self
            .page_index
            .remove(&page_id)
            .ok_or(KernelError::PageNotFound(page_id))?;

        if let Some(mut table) = self.tables.get_mut(&pid) {
            if let Some(page) = table.remove(page_id) {
                if page.resident {
                    self.global_resident
                        .fetch_sub(page.token_count, Ordering::SeqCst);
                }
            }
        }
        debug!("Released page {} (process {})", page_id, pid);
        Ok(())
    }

    pub fn update_importance(&self, page_id: PageId, importance: f64) -> KernelResult<()> {
        if !(0.0..=1.0).contains(&importance) {
            return Err(KernelError::Validation(format!(
                "importance {} outside [0, 1]",
                importance
            )));
        }
        let pid = self.owner_of(page_id)?;
        let mut table = self
            .tables
            .get_mut(&pid)
            .ok_or(KernelError::PageNotFound(page_id))?;
        let page = table
            .get_mut(page_id)
            .ok_or(KernelError::PageNotFound(page_id))?;
        page.importance = importance;
        Ok(())
    }

    pub fn owner_of(&self, page_id: PageId) -> KernelResult<Pid> {
        self.page_index
            .get(&page_id)
            .map(|r| *r.value())
            .ok_or(KernelError::PageNotFound(page_id))
    }

    pub fn is_resident(&self, page_id: PageId) -> KernelResult<bool> {
        let pid = self.owner_of(page_id)?;
        let table = self
            .tables
            .get(&pid)
            .ok_or(KernelError::PageNotFound(page_id))?;
        table
            .get(page_id)
            .map(|p| p.resident)
            .ok_or(KernelError::PageNotFound(page_id))
    }

    pub fn page_info(&self, page_id: PageId) -> KernelResult<PageInfo> {
        let pid = self.owner_of(page_id)?;
        let table = self
            .tables
            .get(&pid)
            .ok_or(KernelError::PageNotFound(page_id))?;
        table
            .get(page_id)
            .map(PageInfo::from)
            .ok_or(KernelError::PageNotFound(page_id))
    }

    pub fn list_pages(&self, pid: Pid) -> KernelResult<Vec<PageInfo>> {
        let table = self.tables.get(&pid).ok_or(KernelError::ProcessNotFound(pid))?;
        Ok(table.iter().map(PageInfo::from).collect())
    }

    /// Resident context in assembly order: pinned pages first, then by
    /// insertion order.
    pub fn agent_context(&self, pid: Pid) -> KernelResult<Vec<String>> {
        let table = self.tables.get(&pid).ok_or(KernelError::ProcessNotFound(pid))?;
        Ok(table
            .resident_in_context_order()
            .map(|p| p.content.clone())
            .collect())
    }

    pub fn resident_tokens(&self, pid: Pid) -> KernelResult<Tokens> {
        let table = self.tables.get(&pid).ok_or(KernelError::ProcessNotFound(pid))?;
        Ok(table.resident_tokens())
    }

    pub fn total_resident_tokens(&self) -> Tokens {
        self.global_resident.load(Ordering::SeqCst)
    }

    /// Clone of every page in insertion order. Swapped pages come back with
    /// empty content; their bytes live in storage.
    pub fn snapshot_table(&self, pid: Pid) -> KernelResult<Vec<ContextPage>> {
        let _guard = self.paging.lock();
        let table = self.tables.get(&pid).ok_or(KernelError::ProcessNotFound(pid))?;
        Ok(table.iter().cloned().collect())
    }

    /// Rebuild a table from checkpointed pages. Recorded order is preserved;
    /// residency is granted pinned-first within the current budget, and
    /// anything that no longer fits stays swapped (content must already be
    /// seeded in storage).
    pub fn install_table(&self, pid: Pid, pages: Vec<ContextPage>) -> KernelResult<()> {
        let _guard = self.paging.lock();
        if self
            .tables
            .get(&pid)
            .map(|t| !t.is_empty())
            .unwrap_or(false)
        {
            return Err(KernelError::invalid_state(
                pid,
                "cannot install a page table over existing pages",
            ));
        }

        let free = match self.capacity {
            CapacityMode::PerProcess(n) => n,
            CapacityMode::Global(n) => {
                n.saturating_sub(self.global_resident.load(Ordering::SeqCst))
            }
        };

        let pinned_tokens: Tokens = pages
            .iter()
            .filter(|p| p.page_type.is_pinned())
            .map(|p| p.token_count)
            .sum();
        if pinned_tokens > free {
            return Err(KernelError::CapacityExceeded {
                requested: pinned_tokens,
                capacity: self.capacity.capacity(),
                evictable: 0,
            });
        }

        let mut budget = free - pinned_tokens;
        let mut table = PageTable::new(pid);
        let mut resident_total = 0;
        for mut page in pages {
            page.owner = pid;
            if page.page_type.is_pinned() {
                page.resident = true;
            } else if page.resident {
                if page.token_count <= budget {
                    budget -= page.token_count;
                } else {
                    page.resident = false;
                    page.content = String::new();
                }
            }
            if page.resident {
                resident_total += page.token_count;
            }
            self.page_index.insert(page.id, pid);
            table.insert(page);
        }
        self.tables.insert(pid, table);
        self.global_resident
            .fetch_add(resident_total, Ordering::SeqCst);
        info!("Installed page table for process {} ({} tokens resident)", pid, resident_total);
        Ok(())
    }

    pub fn stats(&self) -> PagingStats {
        self.stats.snapshot(
            self.page_index.len(),
            self.global_resident.load(Ordering::SeqCst),
        )
    }

    /// Free up `needed` tokens of headroom, evicting lowest-score pages in
    /// candidate scope. Caller holds the paging lock.
    fn make_room(&self, pid: Pid, needed: Tokens, requested: Tokens) -> KernelResult<()> {
        let (capacity, used) = match self.capacity {
            CapacityMode::PerProcess(n) => {
                let table = self.tables.get(&pid).ok_or(KernelError::ProcessNotFound(pid))?;
                (n, table.resident_tokens())
            }
            CapacityMode::Global(n) => (n, self.global_resident.load(Ordering::SeqCst)),
        };

        let free = capacity.saturating_sub(used);
        if needed <= free {
            return Ok(());
        }
        let shortfall = needed - free;

        let now = now_micros();
        let mut candidates = Vec::new();
        let mut collect = |table: &PageTable| {
            for page in table.iter() {
                if page.resident && !page.page_type.is_pinned() {
                    candidates.push(self.replacer.candidate(page, now));
                }
            }
        };
        match self.capacity {
            CapacityMode::PerProcess(_) => {
                if let Some(table) = self.tables.get(&pid) {
                    collect(&table);
                }
            }
            CapacityMode::Global(_) => {
                for table in self.tables.iter() {
                    collect(&table);
                }
            }
        }

        let evictable = candidates.iter().map(|c| c.tokens).sum();
        let victims = PageReplacer::select_victims(candidates, shortfall).ok_or(
            KernelError::CapacityExceeded {
                requested,
                capacity,
                evictable,
            },
        )?;

        for victim in victims {
            self.evict(&victim)?;
        }
        Ok(())
    }

    /// Persist one victim and mark it non-resident
    fn evict(&self, victim: &Candidate) -> KernelResult<()> {
        let content = {
            let table = self
                .tables
                .get(&victim.pid)
                .ok_or(KernelError::PageNotFound(victim.id))?;
            match table.get(victim.id) {
                Some(page) if page.resident => page.content.clone(),
                _ => return Ok(()),
            }
        };

        debug!("Evicting page {} from process {}", victim.id, victim.pid);
        self.stats.inc_evictions();
        self.persist_and_demote(victim.pid, victim.id, &content)
    }

    fn persist_and_demote(&self, pid: Pid, page_id: PageId, content: &str) -> KernelResult<()> {
        let storage = Arc::clone(&self.storage);
        self.retried(|| storage.swap_out(page_id, content))
            .map_err(|e| match e {
                StorageError::Timeout(msg) => KernelError::StorageTimeout(msg),
                StorageError::NotFound(_) => KernelError::PageNotFound(page_id),
            })?;

        let mut table = self
            .tables
            .get_mut(&pid)
            .ok_or(KernelError::PageNotFound(page_id))?;
        if let Some(page) = table.set_resident(page_id, false) {
            let tokens = page.token_count;
            drop(table);
            self.global_resident.fetch_sub(tokens, Ordering::SeqCst);
        }
        self.stats.inc_swaps_out();
        Ok(())
    }

    /// Run a storage operation, retrying timeouts with bounded backoff
    fn retried<T>(&self, mut op: impl FnMut() -> StorageResult<T>) -> StorageResult<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(StorageError::Timeout(msg)) if attempt < self.retry_limit => {
                    attempt += 1;
                    warn!("Storage timeout (attempt {}): {}", attempt, msg);
                    if !self.retry_backoff.is_zero() {
                        std::thread::sleep(self.retry_backoff);
                    }
                }
                other => return other,
            }
        }
    }
}

impl Clone for ContextManager {
    fn clone(&self) -> Self {
        Self {
            tables: Arc::clone(&self.tables),
            page_index: Arc::clone(&self.page_index),
            storage: Arc::clone(&self.storage),
            replacer: self.replacer.clone(),
            capacity: self.capacity,
            retry_limit: self.retry_limit,
            retry_backoff: self.retry_backoff,
            global_resident: Arc::clone(&self.global_resident),
            paging: Arc::clone(&self.paging),
            stats: Arc::clone(&self.stats),
        }
    }
}

/// Atomic paging counters for lock-free updates
#[repr(C, align(64))]
struct AtomicPagingStats {
    total_accesses: AtomicU64,
    cache_hits: AtomicU64,
    page_faults: AtomicU64,
    swaps_in: AtomicU64,
    swaps_out: AtomicU64,
    evictions: AtomicU64,
}

impl AtomicPagingStats {
    fn new() -> Self {
        Self {
            total_accesses: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            page_faults: AtomicU64::new(0),
            swaps_in: AtomicU64::new(0),
            swaps_out: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    fn inc_accesses(&self) {
        self.total_accesses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    fn inc_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    fn inc_faults(&self) {
        self.page_faults.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    fn inc_swaps_in(&self) {
        self.swaps_in.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    fn inc_swaps_out(&self) {
        self.swaps_out.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    fn inc_evictions(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, pages: usize, resident_tokens: Tokens) -> PagingStats {
        PagingStats {
            pages,
            resident_tokens,
            total_accesses: self.total_accesses.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            page_faults: self.page_faults.load(Ordering::Relaxed),
            swaps_in: self.swaps_in.load(Ordering::Relaxed),
            swaps_out: self.swaps_out.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn manager(capacity: CapacityMode) -> ContextManager {
        let config = KernelConfig::default()
            .with_capacity(capacity)
            .with_swap_retries(2, Duration::ZERO);
        let manager = ContextManager::new(&config, Arc::new(InMemoryStorage::new()));
        manager.create_table(1);
        manager
    }

    #[test]
    fn test_allocate_and_access() {
        let m = manager(CapacityMode::PerProcess(1_000));
        let id = m
            .allocate(1, "hello".into(), 100, 0.5, PageType::Task)
            .unwrap();
        assert_eq!(m.try_access(id).unwrap(), Some("hello".into()));
        assert_eq!(m.resident_tokens(1).unwrap(), 100);
        assert_eq!(m.stats().cache_hits, 1);
    }

    #[test]
    fn test_allocate_rejects_bad_importance() {
        let m = manager(CapacityMode::PerProcess(1_000));
        assert!(m
            .allocate(1, "x".into(), 10, 1.5, PageType::Task)
            .is_err());
    }

    #[test]
    fn test_eviction_takes_minimum_score_page() {
        let m = manager(CapacityMode::PerProcess(200));
        let low_score = m
            .allocate(1, "a".into(), 100, 0.9, PageType::Task)
            .unwrap();
        let high_score = m
            .allocate(1, "b".into(), 100, 0.1, PageType::Working)
            .unwrap();

        // Full; this allocation must evict exactly one page, the one with
        // the lower score
        m.allocate(1, "new".into(), 100, 0.5, PageType::Task).unwrap();
        assert!(!m.is_resident(low_score).unwrap());
        assert!(m.is_resident(high_score).unwrap());
        assert_eq!(m.resident_tokens(1).unwrap(), 200);
        assert_eq!(m.stats().evictions, 1);
    }

    #[test]
    fn test_pinned_pages_survive_pressure() {
        let m = manager(CapacityMode::PerProcess(200));
        let system = m
            .allocate(1, "system".into(), 150, 0.1, PageType::System)
            .unwrap();
        m.allocate(1, "a".into(), 50, 0.1, PageType::Working).unwrap();

        m.allocate(1, "b".into(), 50, 0.9, PageType::Working).unwrap();
        assert!(m.is_resident(system).unwrap());
    }

    #[test]
    fn test_capacity_exceeded_when_sweep_cannot_help() {
        let m = manager(CapacityMode::PerProcess(1_000));
        m.allocate(1, "pinned".into(), 950, 0.5, PageType::System)
            .unwrap();
        m.allocate(1, "w".into(), 40, 0.5, PageType::Working).unwrap();

        let err = m
            .allocate(1, "big".into(), 100, 0.5, PageType::Task)
            .unwrap_err();
        assert!(matches!(
            err,
            KernelError::CapacityExceeded {
                requested: 100,
                capacity: 1_000,
                evictable: 40,
            }
        ));
        // No state change on failure
        assert_eq!(m.resident_tokens(1).unwrap(), 990);
    }

    #[test]
    fn test_fault_and_swap_in_round_trip() {
        let m = manager(CapacityMode::PerProcess(100));
        let first = m
            .allocate(1, "first".into(), 100, 0.2, PageType::Working)
            .unwrap();
        m.allocate(1, "second".into(), 100, 0.8, PageType::Working)
            .unwrap();

        assert_eq!(m.try_access(first).unwrap(), None);
        assert_eq!(m.stats().page_faults, 1);

        assert_eq!(m.swap_in(first).unwrap(), "first");
        assert!(m.is_resident(first).unwrap());
        assert_eq!(m.resident_tokens(1).unwrap(), 100);
    }

    #[test]
    fn test_swap_in_surfaces_timeout_after_retries() {
        let storage = Arc::new(InMemoryStorage::new());
        let config = KernelConfig::default()
            .with_capacity(CapacityMode::PerProcess(100))
            .with_swap_retries(1, Duration::ZERO);
        let m = ContextManager::new(&config, Arc::clone(&storage) as Arc<dyn StorageBackend>);
        m.create_table(1);

        let a = m.allocate(1, "a".into(), 100, 0.2, PageType::Working).unwrap();
        m.allocate(1, "b".into(), 100, 0.8, PageType::Working).unwrap();

        // Initial attempt plus one retry both fail
        storage.inject_swap_failures(2);
        assert!(matches!(m.swap_in(a), Err(KernelError::StorageTimeout(_))));
    }

    #[test]
    fn test_global_mode_evicts_across_processes() {
        let m = manager(CapacityMode::Global(200));
        m.create_table(2);
        let p1 = m.allocate(1, "p1".into(), 100, 0.9, PageType::Working).unwrap();
        let p2 = m.allocate(2, "p2".into(), 100, 0.1, PageType::Working).unwrap();

        // Allocating on process 2 evicts process 1's page, the minimum
        // score across the whole arena
        m.allocate(2, "more".into(), 100, 0.5, PageType::Task).unwrap();
        assert!(!m.is_resident(p1).unwrap());
        assert!(m.is_resident(p2).unwrap());
        assert_eq!(m.total_resident_tokens(), 200);
    }

    #[test]
    fn test_release_works_on_pinned() {
        let m = manager(CapacityMode::PerProcess(1_000));
        let id = m
            .allocate(1, "system".into(), 100, 1.0, PageType::System)
            .unwrap();
        m.release(id).unwrap();
        assert!(matches!(
            m.try_access(id),
            Err(KernelError::PageNotFound(_))
        ));
        assert_eq!(m.resident_tokens(1).unwrap(), 0);
    }

    #[test]
    fn test_release_table_frees_everything() {
        let m = manager(CapacityMode::PerProcess(1_000));
        m.allocate(1, "a".into(), 100, 0.5, PageType::Task).unwrap();
        m.allocate(1, "b".into(), 200, 0.5, PageType::System).unwrap();

        assert_eq!(m.release_table(1), 300);
        assert_eq!(m.total_resident_tokens(), 0);
        assert!(!m.contains_table(1));
    }
}
