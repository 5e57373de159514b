//! Request/response list actions that sit beside the realtime router:
//! creating a list, fetching it by id, persisting a rename and the
//! "recently completed" query.

use std::sync::Arc;

use crate::model::{now_millis, List, ListSnapshot};
use crate::storage::{ListStore, StoreError};

/// How far back [`ListActions::recently_completed`] looks.
pub const RECENT_WINDOW_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("{0}")]
    Validation(String),
    #[error("List not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct ListActions {
    store: Arc<dyn ListStore>,
}

impl ListActions {
    pub fn new(store: Arc<dyn ListStore>) -> Self {
        Self { store }
    }

    pub async fn create_list(&self, name: &str) -> Result<List, ActionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ActionError::Validation("List name is required".into()));
        }
        let list = self.store.create_list(name).await?;
        log::info!("Created list {} ({})", list.id, list.name);
        Ok(list)
    }

    pub async fn fetch_list(&self, id: &str) -> Result<ListSnapshot, ActionError> {
        let list = self
            .store
            .get_list(id)
            .await?
            .ok_or_else(|| ActionError::NotFound(id.to_string()))?;
        let items = self.store.items_for_list(id).await?;
        Ok(ListSnapshot {
            id: list.id,
            name: list.name,
            items,
        })
    }

    /// Lists for a client's history, in the order given. Unknown ids are skipped.
    pub async fn fetch_lists(&self, ids: &[String]) -> Result<Vec<List>, ActionError> {
        Ok(self.store.get_lists(ids).await?)
    }

    pub async fn rename_list(&self, id: &str, name: &str) -> Result<List, ActionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ActionError::Validation("List name is required".into()));
        }
        self.store
            .rename_list(id, name)
            .await?
            .ok_or_else(|| ActionError::NotFound(id.to_string()))
    }

    /// Ids of items completed in the last hour, newest first.
    pub async fn recently_completed(&self, list_id: &str) -> Result<Vec<String>, ActionError> {
        let since = now_millis() - RECENT_WINDOW_MS;
        Ok(self.store.recently_completed(list_id, since).await?)
    }
}
