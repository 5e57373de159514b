//! Persistent store for lists and items.
//!
//! The sync core only relies on the [`ListStore`] contract:
//!
//! ```text
//! lists(id, name, createdAt)
//! items(id, listId → lists.id ON DELETE CASCADE, name, category = "Other",
//!       quantity = 1, details?, completedAt?, createdAt, index)
//! ```
//!
//! Two backends ship with the crate: [`MemoryStore`] (process-local) and
//! [`RocksStore`] (durable, RocksDB column families).

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use async_trait::async_trait;

use crate::model::{Item, ItemUpdate, List, NewItem, SortEntry};

/// Storage errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Backend failure (I/O, RocksDB, poisoned lock)
    #[error("Database error: {0}")]
    DatabaseError(String),
    /// Referenced list does not exist
    #[error("List not found: {0}")]
    ListNotFound(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// CRUD contract consumed by the router and the list actions.
///
/// Every single-row mutation returns the affected row, or `None` when the id
/// is unknown. Batch operations (`delete_items`, `reorder`, `delete_list`)
/// are atomic.
#[async_trait]
pub trait ListStore: Send + Sync {
    async fn create_list(&self, name: &str) -> Result<List, StoreError>;

    async fn get_list(&self, id: &str) -> Result<Option<List>, StoreError>;

    /// Lists for the given ids, in input order; unknown ids are skipped.
    async fn get_lists(&self, ids: &[String]) -> Result<Vec<List>, StoreError>;

    async fn rename_list(&self, id: &str, name: &str) -> Result<Option<List>, StoreError>;

    /// Delete a list and all of its items.
    async fn delete_list(&self, id: &str) -> Result<bool, StoreError>;

    /// Insert with a minted id, current `createdAt` and an index placing the
    /// item after every existing one. Fails with `ListNotFound` for an
    /// unknown list.
    async fn insert_item(&self, list_id: &str, item: NewItem) -> Result<Item, StoreError>;

    async fn get_item(&self, id: &str) -> Result<Option<Item>, StoreError>;

    /// Items of a list ordered by index (stable on ties).
    async fn items_for_list(&self, list_id: &str) -> Result<Vec<Item>, StoreError>;

    /// Overwrite name, category, quantity and details.
    async fn update_item(&self, update: &ItemUpdate) -> Result<Option<Item>, StoreError>;

    async fn set_category(&self, id: &str, category: &str) -> Result<Option<Item>, StoreError>;

    async fn set_completed(
        &self,
        id: &str,
        completed_at: Option<i64>,
    ) -> Result<Option<Item>, StoreError>;

    /// Returns the deleted row.
    async fn delete_item(&self, id: &str) -> Result<Option<Item>, StoreError>;

    /// Delete the rows whose id is in `ids` *and* that belong to `list_id`.
    /// Returns the ids actually deleted.
    async fn delete_items(&self, list_id: &str, ids: &[String]) -> Result<Vec<String>, StoreError>;

    /// Set index and category for every entry owned by `list_id` in one batch.
    /// Returns the number of rows updated.
    async fn reorder(&self, list_id: &str, entries: &[SortEntry]) -> Result<usize, StoreError>;

    /// Ids of items completed at or after `since`, newest completion first.
    async fn recently_completed(&self, list_id: &str, since: i64)
        -> Result<Vec<String>, StoreError>;
}

/// Index for a new item appended after `items`.
pub(crate) fn next_index<'a>(items: impl Iterator<Item = &'a Item>) -> i64 {
    items.map(|i| i.index).max().map_or(0, |max| max.saturating_add(1))
}

/// Build a fresh row for `list_id`.
pub(crate) fn mint_item(list_id: &str, item: NewItem, index: i64) -> Item {
    Item {
        id: uuid::Uuid::new_v4().to_string(),
        list_id: list_id.to_string(),
        name: item.name.trim().to_string(),
        category: crate::model::category_or_default(item.category.as_deref()),
        quantity: item.quantity.unwrap_or(1).max(1),
        details: crate::model::details_or_none(item.details.as_deref()),
        created_at: crate::model::now_millis(),
        completed_at: None,
        index,
    }
}

/// Copy the editable fields of a normalized update onto a row.
pub(crate) fn apply_update(item: &mut Item, update: &ItemUpdate) {
    let update = update.normalized();
    item.name = update.name;
    item.category = crate::model::category_or_default(update.category.as_deref());
    item.quantity = update.quantity.unwrap_or(1);
    item.details = update.details;
}
