//! Shopping-list domain types shared by the server, the store and the client.
//!
//! All timestamps are epoch milliseconds (`i64`). Field names serialize as
//! camelCase so the JSON wire format reads `listId`, `completedAt`, ...

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Category used when none is supplied or categorization has nothing better.
pub const DEFAULT_CATEGORY: &str = "Other";

/// Known categories, in display order.
pub const CATEGORIES: [&str; 15] = [
    "Produce",
    "Meat & Seafood",
    "Bakery",
    "Canned Goods",
    "Beverages",
    "Dairy",
    "Snacks",
    "Pantry Items",
    "Frozen Foods",
    "Household",
    "Personal Care",
    "Baby",
    "Pet Care",
    "Clothing",
    DEFAULT_CATEGORY,
];

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Collapse a missing or blank category to [`DEFAULT_CATEGORY`].
pub fn category_or_default(category: Option<&str>) -> String {
    match category.map(str::trim) {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => DEFAULT_CATEGORY.to_string(),
    }
}

/// Blank details are stored as `None`.
pub fn details_or_none(details: Option<&str>) -> Option<String> {
    details
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

/// A shopping list. Renamed by participants, otherwise immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

/// A persisted list item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub list_id: String,
    pub name: String,
    pub category: String,
    pub quantity: u32,
    pub details: Option<String>,
    pub created_at: i64,
    /// `None` while active, completion time once completed
    pub completed_at: Option<i64>,
    pub index: i64,
}

impl Item {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Shallow merge: only fields present in the patch are overwritten.
    pub fn apply_patch(&mut self, patch: &ItemPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(category) = &patch.category {
            self.category = category_or_default(Some(category));
        }
        if let Some(quantity) = patch.quantity {
            self.quantity = quantity.max(1);
        }
        if let Some(details) = &patch.details {
            self.details = details_or_none(Some(details));
        }
    }
}

/// Payload of an add-item intent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl NewItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Whether the caller picked a category (blank counts as none).
    pub fn has_category(&self) -> bool {
        self.category
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }
}

/// Payload of an update-item intent.
///
/// Clients usually send the whole item row; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemUpdate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub details: Option<String>,
}

impl ItemUpdate {
    /// Apply defaults: blank category becomes "Other", quantity at least 1.
    pub fn normalized(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.trim().to_string(),
            category: Some(category_or_default(self.category.as_deref())),
            quantity: Some(self.quantity.unwrap_or(1).max(1)),
            details: details_or_none(self.details.as_deref()),
        }
    }
}

/// Partial item carried by `item:updated`.
///
/// An empty `details` string clears the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ItemPatch {
    /// All user-editable fields of a row.
    pub fn from_item(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            name: Some(item.name.clone()),
            category: Some(item.category.clone()),
            quantity: Some(item.quantity),
            details: Some(item.details.clone().unwrap_or_default()),
        }
    }

    pub fn from_update(update: &ItemUpdate) -> Self {
        let update = update.normalized();
        Self {
            id: update.id,
            name: Some(update.name),
            category: update.category,
            quantity: update.quantity,
            details: Some(update.details.unwrap_or_default()),
        }
    }

    pub fn category(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: Some(category.into()),
            ..Self::default()
        }
    }
}

/// One row of a reorder/recategorize batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortEntry {
    pub id: String,
    pub index: i64,
    pub category: String,
}

/// A list together with its ordered items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSnapshot {
    pub id: String,
    pub name: String,
    pub items: Vec<Item>,
}

/// Stable sort by `index`; ties keep their incoming order.
pub fn sort_by_index(items: &mut [Item]) {
    items.sort_by_key(|item| item.index);
}
