//! Process-local [`ListStore`]. State is lost on restart.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{apply_update, mint_item, next_index, ListStore, StoreError};
use crate::model::{now_millis, sort_by_index, Item, ItemUpdate, List, NewItem, SortEntry};

#[derive(Default)]
struct Tables {
    lists: HashMap<String, List>,
    /// Insertion order doubles as the tie-breaker for equal indices
    items: Vec<Item>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListStore for MemoryStore {
    async fn create_list(&self, name: &str) -> Result<List, StoreError> {
        let list = List {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            created_at: now_millis(),
        };
        self.tables
            .write()
            .await
            .lists
            .insert(list.id.clone(), list.clone());
        Ok(list)
    }

    async fn get_list(&self, id: &str) -> Result<Option<List>, StoreError> {
        Ok(self.tables.read().await.lists.get(id).cloned())
    }

    async fn get_lists(&self, ids: &[String]) -> Result<Vec<List>, StoreError> {
        let tables = self.tables.read().await;
        Ok(ids.iter().filter_map(|id| tables.lists.get(id).cloned()).collect())
    }

    async fn rename_list(&self, id: &str, name: &str) -> Result<Option<List>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.lists.get_mut(id).map(|list| {
            list.name = name.trim().to_string();
            list.clone()
        }))
    }

    async fn delete_list(&self, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let existed = tables.lists.remove(id).is_some();
        tables.items.retain(|item| item.list_id != id);
        Ok(existed)
    }

    async fn insert_item(&self, list_id: &str, item: NewItem) -> Result<Item, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.lists.contains_key(list_id) {
            return Err(StoreError::ListNotFound(list_id.to_string()));
        }
        let index = next_index(tables.items.iter().filter(|i| i.list_id == list_id));
        let row = mint_item(list_id, item, index);
        tables.items.push(row.clone());
        Ok(row)
    }

    async fn get_item(&self, id: &str) -> Result<Option<Item>, StoreError> {
        Ok(self.tables.read().await.items.iter().find(|i| i.id == id).cloned())
    }

    async fn items_for_list(&self, list_id: &str) -> Result<Vec<Item>, StoreError> {
        let tables = self.tables.read().await;
        let mut items: Vec<Item> = tables
            .items
            .iter()
            .filter(|i| i.list_id == list_id)
            .cloned()
            .collect();
        sort_by_index(&mut items);
        Ok(items)
    }

    async fn update_item(&self, update: &ItemUpdate) -> Result<Option<Item>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.items.iter_mut().find(|i| i.id == update.id).map(|item| {
            apply_update(item, update);
            item.clone()
        }))
    }

    async fn set_category(&self, id: &str, category: &str) -> Result<Option<Item>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.items.iter_mut().find(|i| i.id == id).map(|item| {
            item.category = crate::model::category_or_default(Some(category));
            item.clone()
        }))
    }

    async fn set_completed(
        &self,
        id: &str,
        completed_at: Option<i64>,
    ) -> Result<Option<Item>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.items.iter_mut().find(|i| i.id == id).map(|item| {
            item.completed_at = completed_at;
            item.clone()
        }))
    }

    async fn delete_item(&self, id: &str) -> Result<Option<Item>, StoreError> {
        let mut tables = self.tables.write().await;
        let position = tables.items.iter().position(|i| i.id == id);
        Ok(position.map(|p| tables.items.remove(p)))
    }

    async fn delete_items(&self, list_id: &str, ids: &[String]) -> Result<Vec<String>, StoreError> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut tables = self.tables.write().await;
        let mut deleted = Vec::new();
        tables.items.retain(|item| {
            let hit = item.list_id == list_id && wanted.contains(item.id.as_str());
            if hit {
                deleted.push(item.id.clone());
            }
            !hit
        });
        Ok(deleted)
    }

    async fn reorder(&self, list_id: &str, entries: &[SortEntry]) -> Result<usize, StoreError> {
        let by_id: HashMap<&str, &SortEntry> =
            entries.iter().map(|e| (e.id.as_str(), e)).collect();
        let mut tables = self.tables.write().await;
        let mut updated = 0;
        for item in tables.items.iter_mut().filter(|i| i.list_id == list_id) {
            if let Some(entry) = by_id.get(item.id.as_str()) {
                item.index = entry.index;
                item.category = crate::model::category_or_default(Some(&entry.category));
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn recently_completed(
        &self,
        list_id: &str,
        since: i64,
    ) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read().await;
        let mut done: Vec<&Item> = tables
            .items
            .iter()
            .filter(|i| i.list_id == list_id && i.completed_at.is_some_and(|at| at >= since))
            .collect();
        done.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(done.into_iter().map(|i| i.id.clone()).collect())
    }
}
