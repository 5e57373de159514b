//! Pure client-side state reconciliation.
//!
//! [`reconcile`] folds one server event into a [`ListState`]. It never
//! fails: events naming unknown ids leave the state untouched, and applying
//! the same event twice yields the same state as applying it once (except
//! `item:added`, which is idempotent by id).

use crate::model::{now_millis, sort_by_index, Item, ItemPatch, SortEntry, CATEGORIES};
use crate::protocol::ServerEvent;

/// Local mirror of one list's items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListState {
    pub items: Vec<Item>,
    pub show_completed: bool,
}

/// One category group of the derived view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryView {
    pub name: String,
    pub item_ids: Vec<String>,
}

/// Fold `event` into `state`.
pub fn reconcile(mut state: ListState, event: &ServerEvent) -> ListState {
    match event {
        ServerEvent::ItemsRetrieved(items) => {
            state.items = items.clone();
            sort_by_index(&mut state.items);
        }
        ServerEvent::ItemAdded(item) => {
            if state.item(&item.id).is_none() {
                state.items.push(item.clone());
            }
        }
        ServerEvent::ItemUpdated(patch) => state.apply_patch(patch),
        ServerEvent::ItemCompleted(row) => {
            state.set_completed(&row.id, Some(row.completed_at.unwrap_or_else(now_millis)));
        }
        ServerEvent::ItemUncompleted(id) => state.set_completed(id, None),
        ServerEvent::ItemDeleted(id) => state.remove(std::slice::from_ref(id)),
        ServerEvent::ItemsDeleted(ids) => state.remove(ids),
        _ => {}
    }
    state
}

/// Display rank of a category: known ones first, in their fixed order.
fn category_rank(name: &str) -> (usize, &str) {
    let known = CATEGORIES.iter().position(|c| *c == name);
    (known.unwrap_or(CATEGORIES.len()), name)
}

impl ListState {
    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn item_mut(&mut self, id: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    pub fn apply_patch(&mut self, patch: &ItemPatch) {
        if let Some(item) = self.item_mut(&patch.id) {
            item.apply_patch(patch);
        }
    }

    pub fn set_completed(&mut self, id: &str, completed_at: Option<i64>) {
        if let Some(item) = self.item_mut(id) {
            item.completed_at = completed_at;
        }
    }

    pub fn remove(&mut self, ids: &[String]) {
        self.items.retain(|item| !ids.contains(&item.id));
    }

    /// Apply a reorder batch locally, ahead of the server's snapshot.
    pub fn apply_sort(&mut self, entries: &[SortEntry]) {
        for entry in entries {
            if let Some(item) = self.item_mut(&entry.id) {
                item.index = entry.index;
                item.category = entry.category.clone();
            }
        }
        sort_by_index(&mut self.items);
    }

    fn visible(&self, item: &Item) -> bool {
        self.show_completed || !item.is_completed()
    }

    /// Items grouped by category, recomputed from `items`.
    ///
    /// Known categories keep their fixed order, unknown ones follow
    /// alphabetically. Completed items are hidden unless `show_completed`
    /// is set, and empty groups are omitted.
    pub fn categories(&self) -> Vec<CategoryView> {
        let mut ordered: Vec<&Item> = self.items.iter().filter(|i| self.visible(i)).collect();
        ordered.sort_by_key(|i| i.index);

        let mut names: Vec<&str> = ordered.iter().map(|i| i.category.as_str()).collect();
        names.sort_by(|a, b| category_rank(a).cmp(&category_rank(b)));
        names.dedup();

        names
            .into_iter()
            .map(|name| CategoryView {
                name: name.to_string(),
                item_ids: ordered
                    .iter()
                    .filter(|i| i.category == name)
                    .map(|i| i.id.clone())
                    .collect(),
            })
            .collect()
    }

    /// Ids of one category in display order, hidden completed items last.
    fn category_order(&self, category: &str) -> Vec<String> {
        let mut members: Vec<&Item> = self.items.iter().filter(|i| i.category == category).collect();
        members.sort_by_key(|i| (!self.visible(i), i.index));
        members.into_iter().map(|i| i.id.clone()).collect()
    }

    /// Reorder batch for moving `id` to `position` within `category`.
    ///
    /// Every item of the source and target categories is renumbered from 0
    /// in its new display order. Returns an empty batch for an unknown id.
    pub fn plan_move(&self, id: &str, category: &str, position: usize) -> Vec<SortEntry> {
        let Some(moving) = self.item(id) else {
            return Vec::new();
        };
        let source = moving.category.clone();

        let mut target = self.category_order(category);
        target.retain(|other| other != id);
        target.insert(position.min(target.len()), id.to_string());

        let mut entries = renumber(&target, category);
        if source != category {
            let mut rest = self.category_order(&source);
            rest.retain(|other| other != id);
            entries.extend(renumber(&rest, &source));
        }
        entries
    }
}

fn renumber(ids: &[String], category: &str) -> Vec<SortEntry> {
    ids.iter()
        .enumerate()
        .map(|(index, id)| SortEntry {
            id: id.clone(),
            index: index as i64,
            category: category.to_string(),
        })
        .collect()
}
