//! Client sync engine: optimistic local state for the list being viewed.
//!
//! The engine owns a [`ListState`], applies local edits optimistically and
//! turns them into [`ClientIntent`]s on an outgoing channel (usually
//! [`SyncClient::intent_sender`](crate::client::SyncClient::intent_sender)).
//! Server events are folded in through [`SyncEngine::handle_event`]; the
//! server always wins.
//!
//! Checking an item off is delayed: the item shows as completed at once,
//! but `item:complete` is only sent when the completion timer fires, so an
//! accidental tap can be undone without a round trip.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::model::{now_millis, ItemPatch, ItemUpdate, NewItem};
use crate::protocol::{BulkDelete, Categorized, ClientIntent, ListRename, ServerEvent};
use crate::reconcile::{reconcile, CategoryView, ListState};

/// Client engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a checked item waits before `item:complete` is sent
    pub completion_delay: Duration,
    /// Whether completed items appear in the category view
    pub show_completed: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            completion_delay: Duration::from_secs(5),
            show_completed: false,
        }
    }
}

/// Things worth telling the user about after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Joined(String),
    Left(String),
    /// Draw attention to a freshly added item
    Highlight(String),
    /// An item was moved to a better category
    Categorized(Categorized),
    Renamed(ListRename),
    ItemError(String),
    ListError(String),
}

pub struct SyncEngine {
    config: EngineConfig,
    state: ListState,
    current_list: Option<String>,
    /// Completion timers by item id
    pending: HashMap<String, JoinHandle<()>>,
    intents: mpsc::Sender<ClientIntent>,
}

impl SyncEngine {
    pub fn new(config: EngineConfig, intents: mpsc::Sender<ClientIntent>) -> Self {
        let state = ListState {
            items: Vec::new(),
            show_completed: config.show_completed,
        };
        Self {
            config,
            state,
            current_list: None,
            pending: HashMap::new(),
            intents,
        }
    }

    pub fn state(&self) -> &ListState {
        &self.state
    }

    pub fn current_list(&self) -> Option<&str> {
        self.current_list.as_deref()
    }

    pub fn categories(&self) -> Vec<CategoryView> {
        self.state.categories()
    }

    fn send(&self, intent: ClientIntent) -> bool {
        match self.intents.try_send(intent) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Dropping intent: {e}");
                false
            }
        }
    }

    fn reset(&mut self) {
        self.cancel_all();
        self.state.items.clear();
    }

    pub fn join_list(&mut self, list_id: &str) -> bool {
        if self.current_list.as_deref() == Some(list_id) {
            return self.send(ClientIntent::JoinList(list_id.to_string()));
        }
        if let Some(previous) = self.current_list.take() {
            self.send(ClientIntent::LeaveList(previous));
        }
        self.reset();
        self.current_list = Some(list_id.to_string());
        self.send(ClientIntent::JoinList(list_id.to_string()))
    }

    pub fn leave_list(&mut self) -> bool {
        let Some(list_id) = self.current_list.take() else {
            return false;
        };
        self.reset();
        self.send(ClientIntent::LeaveList(list_id))
    }

    /// Transport (re)connected: rejoin the last list to get a fresh snapshot.
    pub fn on_connected(&mut self) -> bool {
        match self.current_list.clone() {
            Some(list_id) => {
                log::info!("Rejoining list {list_id}");
                self.send(ClientIntent::JoinList(list_id))
            }
            None => false,
        }
    }

    /// Transport lost. State is kept until the next snapshot replaces it.
    pub fn on_disconnected(&mut self) {
        log::debug!(
            "Disconnected with {} pending completions",
            self.pending.len()
        );
    }

    pub fn add_item(&mut self, item: NewItem) -> bool {
        if item.name.trim().is_empty() {
            return false;
        }
        self.send(ClientIntent::AddItem(item))
    }

    /// Merge the edit locally, then send it.
    pub fn update_item(&mut self, update: ItemUpdate) -> bool {
        self.state.apply_patch(&ItemPatch::from_update(&update));
        self.send(ClientIntent::UpdateItem(update))
    }

    /// Show the item as completed and start its completion timer.
    pub fn check_item(&mut self, id: &str) -> bool {
        match self.state.item(id) {
            Some(item) if !item.is_completed() => {}
            _ => return false,
        }
        self.state.set_completed(id, Some(now_millis()));
        self.cancel_timer(id);

        let intents = self.intents.clone();
        let delay = self.config.completion_delay;
        let item_id = id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if intents.send(ClientIntent::CompleteItem(item_id)).await.is_err() {
                log::warn!("Completion timer fired after the connection closed");
            }
        });
        self.pending.insert(id.to_string(), timer);
        true
    }

    /// Undo a check. Any pending completion timer is cancelled and
    /// `item:uncomplete` goes out at once.
    pub fn uncheck_item(&mut self, id: &str) -> bool {
        if self.state.item(id).is_none() {
            return false;
        }
        self.cancel_timer(id);
        self.state.set_completed(id, None);
        self.send(ClientIntent::UncompleteItem(id.to_string()))
    }

    pub fn toggle_item(&mut self, id: &str) -> bool {
        let completed = self.state.item(id).is_some_and(|i| i.is_completed());
        if completed {
            self.uncheck_item(id)
        } else {
            self.check_item(id)
        }
    }

    pub fn is_pending_completion(&self, id: &str) -> bool {
        self.pending.get(id).is_some_and(|t| !t.is_finished())
    }

    pub fn delete_item(&mut self, id: &str) -> bool {
        self.cancel_timer(id);
        self.state.remove(&[id.to_string()]);
        self.send(ClientIntent::DeleteItem(id.to_string()))
    }

    /// Bulk-delete every completed item whose completion is not still pending.
    pub fn delete_completed_items(&mut self) -> bool {
        let Some(list_id) = self.current_list.clone() else {
            return false;
        };
        let ids: Vec<String> = self
            .state
            .items
            .iter()
            .filter(|i| i.is_completed() && !self.pending.contains_key(&i.id))
            .map(|i| i.id.clone())
            .collect();
        if ids.is_empty() {
            return false;
        }
        self.state.remove(&ids);
        self.send(ClientIntent::DeleteItems(BulkDelete {
            list_id: Some(list_id),
            item_ids: ids,
        }))
    }

    /// Tell peers about a rename. Persisting it is a separate list action.
    pub fn rename_list(&mut self, name: &str) -> bool {
        let Some(list_id) = self.current_list.clone() else {
            return false;
        };
        self.send(ClientIntent::RenameList(ListRename {
            id: list_id,
            name: name.trim().to_string(),
        }))
    }

    /// Drag-and-drop: move an item to `position` in `category` and send the
    /// whole reindexed batch as one `list:sort`.
    pub fn move_item(&mut self, id: &str, category: &str, position: usize) -> bool {
        let batch = self.state.plan_move(id, category, position);
        if batch.is_empty() {
            return false;
        }
        self.state.apply_sort(&batch);
        self.send(ClientIntent::SortList(batch))
    }

    pub fn set_show_completed(&mut self, show: bool) {
        self.config.show_completed = show;
        self.state.show_completed = show;
    }

    /// Fold a server event into local state.
    pub fn handle_event(&mut self, event: &ServerEvent) -> Option<Notice> {
        match event {
            ServerEvent::ItemCompleted(row) => self.cancel_timer(&row.id),
            ServerEvent::ItemDeleted(id) => self.cancel_timer(id),
            ServerEvent::ItemsDeleted(ids) => ids.iter().for_each(|id| self.cancel_timer(id)),
            _ => {}
        }

        self.state = reconcile(std::mem::take(&mut self.state), event);

        match event {
            ServerEvent::ItemsRetrieved(_) => {
                self.restore_pending();
                None
            }
            ServerEvent::ListConnected(id) => Some(Notice::Joined(id.clone())),
            ServerEvent::ListDisconnected(id) => Some(Notice::Left(id.clone())),
            ServerEvent::ItemHighlight(id) => Some(Notice::Highlight(id.clone())),
            ServerEvent::ItemCategorized(c) => Some(Notice::Categorized(c.clone())),
            ServerEvent::ListRenamed(r) => Some(Notice::Renamed(r.clone())),
            ServerEvent::ItemError(m) => Some(Notice::ItemError(m.clone())),
            ServerEvent::ListError(m) => Some(Notice::ListError(m.clone())),
            _ => None,
        }
    }

    /// A snapshot knows nothing of local timers: keep pending items checked
    /// and forget timers whose item is gone.
    fn restore_pending(&mut self) {
        let gone: Vec<String> = self
            .pending
            .keys()
            .filter(|id| self.state.item(id).is_none())
            .cloned()
            .collect();
        for id in gone {
            self.cancel_timer(&id);
        }
        let now = now_millis();
        for (id, timer) in &self.pending {
            if !timer.is_finished() {
                if let Some(item) = self.state.item_mut(id) {
                    item.completed_at.get_or_insert(now);
                }
            }
        }
    }

    fn cancel_timer(&mut self, id: &str) {
        if let Some(timer) = self.pending.remove(id) {
            timer.abort();
        }
    }

    fn cancel_all(&mut self) {
        for (_, timer) in self.pending.drain() {
            timer.abort();
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
