//! JSON wire protocol between list clients and the sync server.
//!
//! Every frame is a WebSocket text message:
//! ```text
//! { "event": "item:add", "data": { "name": "Milk" } }
//! ```
//!
//! [`ClientIntent`] flows client → server, [`ServerEvent`] server → client.

use serde::{Deserialize, Serialize};

use crate::model::{Item, ItemPatch, ItemUpdate, NewItem, SortEntry};

/// Client-originated request to mutate or query shared state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientIntent {
    #[serde(rename = "list:connect")]
    JoinList(String),
    #[serde(rename = "list:disconnect")]
    LeaveList(String),
    #[serde(rename = "list:rename")]
    RenameList(ListRename),
    #[serde(rename = "item:add")]
    AddItem(NewItem),
    #[serde(rename = "item:update")]
    UpdateItem(ItemUpdate),
    #[serde(rename = "item:complete")]
    CompleteItem(String),
    #[serde(rename = "item:uncomplete")]
    UncompleteItem(String),
    #[serde(rename = "item:delete")]
    DeleteItem(String),
    #[serde(rename = "items:delete")]
    DeleteItems(BulkDelete),
    #[serde(rename = "list:sort")]
    SortList(Vec<SortEntry>),
}

/// Server broadcast or targeted notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "list:connected")]
    ListConnected(String),
    #[serde(rename = "list:disconnected")]
    ListDisconnected(String),
    /// Full ordered snapshot of the list
    #[serde(rename = "items:retrieved")]
    ItemsRetrieved(Vec<Item>),
    #[serde(rename = "item:added")]
    ItemAdded(Item),
    /// Presentation hint for the adding session
    #[serde(rename = "item:highlight")]
    ItemHighlight(String),
    #[serde(rename = "item:updated")]
    ItemUpdated(ItemPatch),
    #[serde(rename = "item:completed")]
    ItemCompleted(Item),
    #[serde(rename = "item:uncompleted")]
    ItemUncompleted(String),
    #[serde(rename = "item:deleted")]
    ItemDeleted(String),
    #[serde(rename = "items:deleted")]
    ItemsDeleted(Vec<String>),
    #[serde(rename = "item:categorized")]
    ItemCategorized(Categorized),
    #[serde(rename = "list:renamed")]
    ListRenamed(ListRename),
    #[serde(rename = "item:error")]
    ItemError(String),
    #[serde(rename = "list:error")]
    ListError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRename {
    pub id: String,
    pub name: String,
}

/// Bulk delete payload. Both fields are required for the delete to happen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDelete {
    #[serde(default)]
    pub list_id: Option<String>,
    #[serde(default)]
    pub item_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Categorized {
    pub id: String,
    pub category: String,
}

/// Protocol errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Connection closed")]
    ConnectionClosed,
}

impl ClientIntent {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinList(_) => "list:connect",
            Self::LeaveList(_) => "list:disconnect",
            Self::RenameList(_) => "list:rename",
            Self::AddItem(_) => "item:add",
            Self::UpdateItem(_) => "item:update",
            Self::CompleteItem(_) => "item:complete",
            Self::UncompleteItem(_) => "item:uncomplete",
            Self::DeleteItem(_) => "item:delete",
            Self::DeleteItems(_) => "items:delete",
            Self::SortList(_) => "list:sort",
        }
    }
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListConnected(_) => "list:connected",
            Self::ListDisconnected(_) => "list:disconnected",
            Self::ItemsRetrieved(_) => "items:retrieved",
            Self::ItemAdded(_) => "item:added",
            Self::ItemHighlight(_) => "item:highlight",
            Self::ItemUpdated(_) => "item:updated",
            Self::ItemCompleted(_) => "item:completed",
            Self::ItemUncompleted(_) => "item:uncompleted",
            Self::ItemDeleted(_) => "item:deleted",
            Self::ItemsDeleted(_) => "items:deleted",
            Self::ItemCategorized(_) => "item:categorized",
            Self::ListRenamed(_) => "list:renamed",
            Self::ItemError(_) => "item:error",
            Self::ListError(_) => "list:error",
        }
    }
}
