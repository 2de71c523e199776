/*!
 * Context Memory Types
 * Token-budgeted context pages and per-process page tables
 */

use crate::core::types::{now_micros, PageId, Pid, Tokens};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of context a page holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    /// System prompt and standing instructions; pinned, never evicted
    System,
    /// Task description and plan state
    Task,
    /// Tool call results
    Tool,
    /// Intermediate working notes
    Working,
}

impl PageType {
    /// Pinned pages are never eviction candidates
    pub fn is_pinned(&self) -> bool {
        matches!(self, PageType::System)
    }
}

/// One unit of agent context
///
/// Content lives inline while resident; after a swap-out it lives in storage
/// and the inline copy is cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ContextPage {
    pub id: PageId,
    pub owner: Pid,
    pub content: String,
    pub token_count: Tokens,
    /// Caller-assigned importance in [0, 1]
    pub importance: f64,
    pub page_type: PageType,
    pub resident: bool,
    pub last_access_micros: u64,
    pub access_count: u64,
    pub created_at_micros: u64,
}

impl ContextPage {
    pub fn new(
        owner: Pid,
        content: String,
        token_count: Tokens,
        importance: f64,
        page_type: PageType,
    ) -> Self {
        let now = now_micros();
        Self {
            id: PageId::generate(),
            owner,
            content,
            token_count,
            importance,
            page_type,
            resident: true,
            last_access_micros: now,
            access_count: 0,
            created_at_micros: now,
        }
    }

    /// Record an access for eviction scoring
    pub fn touch(&mut self) {
        self.last_access_micros = now_micros();
        self.access_count += 1;
    }
}

/// Metadata view of a page, without the content
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PageInfo {
    pub id: PageId,
    pub owner: Pid,
    pub token_count: Tokens,
    pub importance: f64,
    pub page_type: PageType,
    pub resident: bool,
    pub access_count: u64,
}

impl From<&ContextPage> for PageInfo {
    fn from(page: &ContextPage) -> Self {
        Self {
            id: page.id,
            owner: page.owner,
            token_count: page.token_count,
            importance: page.importance,
            page_type: page.page_type,
            resident: page.resident,
            access_count: page.access_count,
        }
    }
}

/// Per-process page table
///
/// Keeps insertion order as the deterministic iteration order and maintains
/// the resident token total incrementally; the total always equals the sum
/// over resident pages.
#[derive(Debug)]
pub struct PageTable {
    owner: Pid,
    pages: HashMap<PageId, ContextPage, ahash::RandomState>,
    order: Vec<PageId>,
    resident_tokens: Tokens,
}

impl PageTable {
    pub fn new(owner: Pid) -> Self {
        Self {
            owner,
            pages: HashMap::default(),
            order: Vec::new(),
            resident_tokens: 0,
        }
    }

    pub fn owner(&self) -> Pid {
        self.owner
    }

    pub fn resident_tokens(&self) -> Tokens {
        self.resident_tokens
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.pages.contains_key(&id)
    }

    pub fn get(&self, id: PageId) -> Option<&ContextPage> {
        self.pages.get(&id)
    }

    pub fn get_mut(&mut self, id: PageId) -> Option<&mut ContextPage> {
        self.pages.get_mut(&id)
    }

    /// Insert a page at the end of the insertion order
    pub fn insert(&mut self, page: ContextPage) {
        if page.resident {
            self.resident_tokens += page.token_count;
        }
        self.order.push(page.id);
        self.pages.insert(page.id, page);
    }

    /// Remove a page entirely, returning it
    pub fn remove(&mut self, id: PageId) -> Option<ContextPage> {
        let page = self.pages.remove(&id)?;
        self.order.retain(|p| *p != id);
        if page.resident {
            self.resident_tokens -= page.token_count;
        }
        Some(page)
    }

    /// Flip residency, keeping the token total consistent.
    /// Clears inline content on swap-out; the caller persists it first.
    pub fn set_resident(&mut self, id: PageId, resident: bool) -> Option<&mut ContextPage> {
        let page = self.pages.get_mut(&id)?;
        if page.resident != resident {
            if resident {
                self.resident_tokens += page.token_count;
            } else {
                self.resident_tokens -= page.token_count;
                page.content = String::new();
            }
            page.resident = resident;
        }
        Some(page)
    }

    /// Pages in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ContextPage> {
        self.order.iter().filter_map(|id| self.pages.get(id))
    }

    /// Resident pages in context-assembly order: pinned pages first, then
    /// the rest, each group in insertion order. Keeps the static prefix
    /// stable across assemblies.
    pub fn resident_in_context_order(&self) -> impl Iterator<Item = &ContextPage> {
        let pinned = self
            .iter()
            .filter(|p| p.resident && p.page_type.is_pinned());
        let rest = self
            .iter()
            .filter(|p| p.resident && !p.page_type.is_pinned());
        pinned.chain(rest)
    }
}

/// Paging statistics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PagingStats {
    pub pages: usize,
    pub resident_tokens: Tokens,
    pub total_accesses: u64,
    pub cache_hits: u64,
    pub page_faults: u64,
    pub swaps_in: u64,
    pub swaps_out: u64,
    pub evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(owner: Pid, tokens: Tokens, page_type: PageType) -> ContextPage {
        ContextPage::new(owner, "content".into(), tokens, 0.5, page_type)
    }

    #[test]
    fn test_resident_total_tracks_inserts_and_removes() {
        let mut table = PageTable::new(1);
        let a = page(1, 100, PageType::Task);
        let b = page(1, 40, PageType::Tool);
        let a_id = a.id;
        table.insert(a);
        table.insert(b);
        assert_eq!(table.resident_tokens(), 140);

        table.remove(a_id);
        assert_eq!(table.resident_tokens(), 40);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_swap_out_clears_content() {
        let mut table = PageTable::new(1);
        let p = page(1, 100, PageType::Task);
        let id = p.id;
        table.insert(p);

        table.set_resident(id, false);
        assert_eq!(table.resident_tokens(), 0);
        let p = table.get(id).unwrap();
        assert!(!p.resident);
        assert!(p.content.is_empty());
        // Idempotent
        table.set_resident(id, false);
        assert_eq!(table.resident_tokens(), 0);
    }

    #[test]
    fn test_context_order_puts_pinned_first() {
        let mut table = PageTable::new(1);
        let task = page(1, 10, PageType::Task);
        let system = page(1, 10, PageType::System);
        let tool = page(1, 10, PageType::Tool);
        let (task_id, system_id, tool_id) = (task.id, system.id, tool.id);
        table.insert(task);
        table.insert(system);
        table.insert(tool);

        let order: Vec<_> = table.resident_in_context_order().map(|p| p.id).collect();
        assert_eq!(order, vec![system_id, task_id, tool_id]);
    }
}
