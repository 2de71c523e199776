/*!
 * Context Memory
 * Token-budgeted paging: page tables, eviction, storage-backed swap
 */

pub mod manager;
mod replacer;
pub mod types;

pub use manager::ContextManager;
pub use types::{ContextPage, PageInfo, PageTable, PageType, PagingStats};
