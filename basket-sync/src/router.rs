//! Sync event router: client intents in, authoritative broadcasts out.
//!
//! ```text
//! ClientIntent ──► Router::handle(&SessionState) ──► Outcome
//!                        │                              ├── transition (join / leave)
//!                        ├── ListStore                  ├── dispatches [(audience, event, delay)]
//!                        │                              └── categorization job
//!                        ▼
//!                  Router::dispatch ──► RoomRegistry ──► session outboxes
//! ```
//!
//! Handlers never emit inline. They return an [`Outcome`] describing who
//! gets what, which keeps the protocol testable without a transport.
//! [`Router::dispatch`] applies the membership transition, delivers the
//! dispatches, and only then spawns the categorization task so a fast
//! categorizer can never overtake the `item:added` broadcast.
//!
//! Session lifecycle: `CONNECTED (no room) → IN_ROOM(L)` on join,
//! back to `CONNECTED` on leave, and gone on transport close.

use std::sync::Arc;
use std::time::Duration;

use crate::categorize::{normalize_category, CategorizeError, Categorizer};
use crate::model::{now_millis, Item, ItemPatch, ItemUpdate, NewItem, SortEntry, DEFAULT_CATEGORY};
use crate::protocol::{BulkDelete, Categorized, ClientIntent, ListRename, ServerEvent};
use crate::registry::{RoomRegistry, SessionId, SessionState};
use crate::storage::{ListStore, StoreError};

/// Who receives a dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Only the session that sent the intent
    Sender,
    /// Every session viewing the list, sender included
    Room(String),
    /// Every session viewing the list except the sender
    RoomExceptSender(String),
}

/// One event to deliver, optionally after a delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub audience: Audience,
    pub event: ServerEvent,
    pub delay: Option<Duration>,
}

/// Room membership change requested by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    Join(String),
    Leave(String),
}

/// Background categorization of a freshly added item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Categorization {
    pub item_id: String,
    pub list_id: String,
    pub name: String,
}

/// Everything an intent handler decided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub transition: Option<Membership>,
    pub dispatches: Vec<Dispatch>,
    pub categorize: Option<Categorization>,
}

impl Outcome {
    pub fn none() -> Self {
        Self::default()
    }

    fn item_error(message: &str) -> Self {
        Self::none().sender(ServerEvent::ItemError(message.to_string()))
    }

    fn list_error(message: &str) -> Self {
        Self::none().sender(ServerEvent::ListError(message.to_string()))
    }

    fn push(mut self, audience: Audience, event: ServerEvent, delay: Option<Duration>) -> Self {
        self.dispatches.push(Dispatch {
            audience,
            event,
            delay,
        });
        self
    }

    fn sender(self, event: ServerEvent) -> Self {
        self.push(Audience::Sender, event, None)
    }

    fn room(self, list_id: &str, event: ServerEvent) -> Self {
        self.push(Audience::Room(list_id.to_string()), event, None)
    }

    /// Events in delivery order, ignoring audience and delay.
    pub fn events(&self) -> Vec<&ServerEvent> {
        self.dispatches.iter().map(|d| &d.event).collect()
    }
}

/// Router timing knobs.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Delay before the sender gets `item:highlight` for a new item
    pub highlight_delay: Duration,
    /// Upper bound on a single categorization call
    pub categorize_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            highlight_delay: Duration::from_millis(250),
            categorize_timeout: Duration::from_secs(5),
        }
    }
}

/// Applies intents to the store and fans results out through the registry.
#[derive(Clone)]
pub struct Router {
    store: Arc<dyn ListStore>,
    registry: Arc<RoomRegistry>,
    categorizer: Arc<dyn Categorizer>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        store: Arc<dyn ListStore>,
        registry: Arc<RoomRegistry>,
        categorizer: Arc<dyn Categorizer>,
        config: RouterConfig,
    ) -> Self {
        Self {
            store,
            registry,
            categorizer,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Decide the outcome of one intent. Does not touch the registry.
    pub async fn handle(&self, session: &SessionState, intent: ClientIntent) -> Outcome {
        log::trace!("Session {} -> {}", session.id, intent.name());
        match intent {
            ClientIntent::JoinList(list_id) => self.join(session, list_id).await,
            ClientIntent::LeaveList(list_id) => Self::leave(session, list_id),
            ClientIntent::RenameList(rename) => Self::rename(session, rename),
            other => {
                let Some(list_id) = session.list_id.clone() else {
                    log::debug!("Session {} sent {} outside a room", session.id, other.name());
                    return Outcome::item_error("Join a list first");
                };
                self.mutate(&list_id, other).await
            }
        }
    }

    async fn mutate(&self, list_id: &str, intent: ClientIntent) -> Outcome {
        let result = match intent {
            ClientIntent::AddItem(item) => self.add_item(list_id, item).await,
            ClientIntent::UpdateItem(update) => self.update_item(list_id, update).await,
            ClientIntent::CompleteItem(id) => self.set_completed(list_id, &id, true).await,
            ClientIntent::UncompleteItem(id) => self.set_completed(list_id, &id, false).await,
            ClientIntent::DeleteItem(id) => self.delete_item(list_id, &id).await,
            ClientIntent::DeleteItems(bulk) => self.delete_items(list_id, bulk).await,
            ClientIntent::SortList(entries) => self.sort(list_id, entries).await,
            ClientIntent::JoinList(_) | ClientIntent::LeaveList(_) | ClientIntent::RenameList(_) => {
                Ok(Outcome::none())
            }
        };
        result.unwrap_or_else(|(verb, e)| {
            log::error!("Failed to {verb} in list {list_id}: {e}");
            Outcome::item_error(&format!("Failed to {verb}"))
        })
    }

    async fn join(&self, session: &SessionState, list_id: String) -> Outcome {
        let list_id = list_id.trim().to_string();
        if list_id.is_empty() {
            return Outcome::list_error("List id is required");
        }
        match self.load_items(&list_id).await {
            Ok(Some(items)) => {
                log::info!("Session {} joined list {list_id} ({} items)", session.id, items.len());
                Outcome {
                    transition: Some(Membership::Join(list_id.clone())),
                    ..Outcome::none()
                }
                .sender(ServerEvent::ListConnected(list_id))
                .sender(ServerEvent::ItemsRetrieved(items))
            }
            Ok(None) => Outcome::list_error("List not found"),
            Err(e) => {
                log::error!("Failed to load list {list_id}: {e}");
                Outcome::list_error("Failed to load list")
            }
        }
    }

    /// Ordered items of an existing list, `None` for an unknown list.
    async fn load_items(&self, list_id: &str) -> Result<Option<Vec<Item>>, StoreError> {
        match self.store.get_list(list_id).await? {
            Some(_) => Ok(Some(self.store.items_for_list(list_id).await?)),
            None => Ok(None),
        }
    }

    fn leave(session: &SessionState, list_id: String) -> Outcome {
        if session.list_id.as_deref() != Some(list_id.as_str()) {
            return Outcome::none();
        }
        log::info!("Session {} left list {list_id}", session.id);
        Outcome {
            transition: Some(Membership::Leave(list_id.clone())),
            ..Outcome::none()
        }
        .sender(ServerEvent::ListDisconnected(list_id))
    }

    /// Pass-through notification; persisting the rename is a list action.
    fn rename(session: &SessionState, rename: ListRename) -> Outcome {
        let Some(list_id) = session.list_id.as_deref() else {
            return Outcome::list_error("Join a list first");
        };
        if rename.id != list_id {
            return Outcome::list_error("Can only rename the list you are viewing");
        }
        let name = rename.name.trim();
        if name.is_empty() {
            return Outcome::list_error("List name is required");
        }
        Outcome::none().push(
            Audience::RoomExceptSender(list_id.to_string()),
            ServerEvent::ListRenamed(ListRename {
                id: rename.id.clone(),
                name: name.to_string(),
            }),
            None,
        )
    }

    async fn add_item(
        &self,
        list_id: &str,
        item: NewItem,
    ) -> Result<Outcome, (&'static str, StoreError)> {
        if item.name.trim().is_empty() {
            return Ok(Outcome::item_error("Item name is required"));
        }
        let wants_category = !item.has_category();
        let row = self
            .store
            .insert_item(list_id, item)
            .await
            .map_err(|e| ("add item", e))?;
        log::debug!("Added item {} ({}) to list {list_id}", row.id, row.name);

        let mut outcome = Outcome::none()
            .room(list_id, ServerEvent::ItemAdded(row.clone()))
            .push(
                Audience::Sender,
                ServerEvent::ItemHighlight(row.id.clone()),
                Some(self.config.highlight_delay),
            );
        if wants_category {
            outcome.categorize = Some(Categorization {
                item_id: row.id,
                list_id: list_id.to_string(),
                name: row.name,
            });
        }
        Ok(outcome)
    }

    /// Look up an item and make sure it belongs to `list_id`.
    async fn owned_item(&self, list_id: &str, id: &str) -> Result<Option<Item>, StoreError> {
        Ok(self
            .store
            .get_item(id)
            .await?
            .filter(|item| item.list_id == list_id))
    }

    async fn update_item(
        &self,
        list_id: &str,
        update: ItemUpdate,
    ) -> Result<Outcome, (&'static str, StoreError)> {
        if update.name.trim().is_empty() {
            return Ok(Outcome::item_error("Item name is required"));
        }
        let verb = "update item";
        if self.owned_item(list_id, &update.id).await.map_err(|e| (verb, e))?.is_none() {
            return Ok(Outcome::item_error("Item not found"));
        }
        match self.store.update_item(&update).await.map_err(|e| (verb, e))? {
            Some(row) => {
                let patch = ItemPatch::from_item(&row);
                Ok(Outcome::none().room(list_id, ServerEvent::ItemUpdated(patch)))
            }
            None => Ok(Outcome::item_error("Item not found")),
        }
    }

    async fn set_completed(
        &self,
        list_id: &str,
        id: &str,
        completed: bool,
    ) -> Result<Outcome, (&'static str, StoreError)> {
        let verb = if completed { "complete item" } else { "uncomplete item" };
        if self.owned_item(list_id, id).await.map_err(|e| (verb, e))?.is_none() {
            return Ok(Outcome::item_error("Item not found"));
        }
        let completed_at = completed.then(now_millis);
        let row = self
            .store
            .set_completed(id, completed_at)
            .await
            .map_err(|e| (verb, e))?;
        Ok(match row {
            Some(row) if completed => Outcome::none().room(list_id, ServerEvent::ItemCompleted(row)),
            Some(row) => Outcome::none().room(list_id, ServerEvent::ItemUncompleted(row.id)),
            None => Outcome::item_error("Item not found"),
        })
    }

    async fn delete_item(&self, list_id: &str, id: &str) -> Result<Outcome, (&'static str, StoreError)> {
        let verb = "delete item";
        if self.owned_item(list_id, id).await.map_err(|e| (verb, e))?.is_none() {
            return Ok(Outcome::none());
        }
        Ok(match self.store.delete_item(id).await.map_err(|e| (verb, e))? {
            Some(row) => Outcome::none().room(list_id, ServerEvent::ItemDeleted(row.id)),
            None => Outcome::none(),
        })
    }

    /// The payload's list id must name the session's own list.
    async fn delete_items(
        &self,
        list_id: &str,
        bulk: BulkDelete,
    ) -> Result<Outcome, (&'static str, StoreError)> {
        match bulk.list_id.as_deref().map(str::trim) {
            Some(target) if target == list_id => {}
            Some(target) if !target.is_empty() => {
                log::warn!("Ignoring bulk delete for list {target} from a session in {list_id}");
                return Ok(Outcome::none());
            }
            _ => return Ok(Outcome::none()),
        }
        if bulk.item_ids.is_empty() {
            return Ok(Outcome::none());
        }
        let deleted = self
            .store
            .delete_items(list_id, &bulk.item_ids)
            .await
            .map_err(|e| ("delete items", e))?;
        log::debug!(
            "Bulk deleted {}/{} items from list {list_id}",
            deleted.len(),
            bulk.item_ids.len()
        );
        if deleted.is_empty() {
            return Ok(Outcome::none());
        }
        Ok(Outcome::none().room(list_id, ServerEvent::ItemsDeleted(deleted)))
    }

    async fn sort(
        &self,
        list_id: &str,
        entries: Vec<SortEntry>,
    ) -> Result<Outcome, (&'static str, StoreError)> {
        let verb = "sort list";
        if entries.is_empty() {
            return Ok(Outcome::none());
        }
        let updated = self.store.reorder(list_id, &entries).await.map_err(|e| (verb, e))?;
        let items = self.store.items_for_list(list_id).await.map_err(|e| (verb, e))?;
        log::debug!("Sorted {updated} items in list {list_id}");
        Ok(Outcome::none().room(list_id, ServerEvent::ItemsRetrieved(items)))
    }

    /// Run one categorization job and describe its follow-up broadcasts.
    ///
    /// Every failure path yields an empty outcome; the item keeps its
    /// default category.
    pub async fn categorize(&self, job: &Categorization) -> Outcome {
        let suggestion = tokio::time::timeout(
            self.config.categorize_timeout,
            self.categorizer.categorize(&job.name),
        )
        .await
        .unwrap_or(Err(CategorizeError::Timeout));

        let category = match suggestion {
            Ok(raw) => normalize_category(&raw),
            Err(e) => {
                log::debug!("Categorization of {:?} failed: {e}", job.name);
                return Outcome::none();
            }
        };
        if category == DEFAULT_CATEGORY {
            return Outcome::none();
        }

        match self.store.get_item(&job.item_id).await {
            Ok(Some(row)) if row.category == DEFAULT_CATEGORY => {}
            Ok(Some(row)) => {
                log::debug!(
                    "Item {} was filed under {} meanwhile, keeping it",
                    job.item_id,
                    row.category
                );
                return Outcome::none();
            }
            Ok(None) => return Outcome::none(),
            Err(e) => {
                log::debug!("Failed to load {} for categorization: {e}", job.item_id);
                return Outcome::none();
            }
        }

        match self.store.set_category(&job.item_id, category).await {
            Ok(Some(_)) => {
                log::debug!("Item {} categorized as {category}", job.item_id);
                Outcome::none()
                    .room(
                        &job.list_id,
                        ServerEvent::ItemUpdated(ItemPatch::category(&job.item_id, category)),
                    )
                    .sender(ServerEvent::ItemCategorized(Categorized {
                        id: job.item_id.clone(),
                        category: category.to_string(),
                    }))
            }
            Ok(None) => Outcome::none(),
            Err(e) => {
                log::debug!("Failed to store category for {}: {e}", job.item_id);
                Outcome::none()
            }
        }
    }

    /// Handle an intent for a registered session and deliver the result.
    pub async fn dispatch(&self, session: &SessionId, intent: ClientIntent) {
        let Some(state) = self.registry.session_state(session).await else {
            log::debug!("Dropping {} from unknown session {session}", intent.name());
            return;
        };
        let outcome = self.handle(&state, intent).await;
        self.apply(&state, outcome).await;
    }

    async fn apply(&self, state: &SessionState, outcome: Outcome) {
        match &outcome.transition {
            Some(Membership::Join(list_id)) => {
                if let Some(previous) = state.list_id.as_deref().filter(|p| *p != list_id) {
                    self.registry.leave(&state.id, previous).await;
                }
                self.registry.join(&state.id, list_id).await;
            }
            Some(Membership::Leave(list_id)) => {
                self.registry.leave(&state.id, list_id).await;
            }
            None => {}
        }

        for dispatch in outcome.dispatches {
            self.deliver(state.id, dispatch).await;
        }

        if let Some(job) = outcome.categorize {
            let router = self.clone();
            let sender = state.id;
            tokio::spawn(async move {
                let follow_up = router.categorize(&job).await;
                for dispatch in follow_up.dispatches {
                    router.deliver(sender, dispatch).await;
                }
            });
        }
    }

    async fn deliver(&self, sender: SessionId, dispatch: Dispatch) {
        match dispatch.delay {
            Some(delay) => {
                let registry = self.registry.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    send(&registry, &sender, dispatch.audience, dispatch.event).await;
                });
            }
            None => {
                send(&self.registry, &sender, dispatch.audience, dispatch.event).await;
            }
        }
    }

    /// Transport closed: implicit leave, no acknowledgement.
    pub async fn disconnect(&self, session: &SessionId) {
        if let Some(list_id) = self.registry.close_session(session).await {
            log::info!("Session {session} disconnected from list {list_id}");
        }
    }
}

async fn send(registry: &RoomRegistry, sender: &SessionId, audience: Audience, event: ServerEvent) -> usize {
    match audience {
        Audience::Sender => usize::from(registry.send_to(sender, event).await),
        Audience::Room(list_id) => registry.broadcast(&list_id, event, None).await,
        Audience::RoomExceptSender(list_id) => registry.broadcast(&list_id, event, Some(sender)).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorize::{FixedCategorizer, NoopCategorizer};
    use crate::model::{List, NewItem};
    use crate::registry::Outbox;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use uuid::Uuid;

    fn router_with(categorizer: impl Categorizer + 'static) -> (Router, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let router = Router::new(
            store.clone(),
            Arc::new(RoomRegistry::new(64)),
            Arc::new(categorizer),
            RouterConfig::default(),
        );
        (router, store)
    }

    fn in_room(list: &List) -> SessionState {
        SessionState {
            id: Uuid::new_v4(),
            list_id: Some(list.id.clone()),
        }
    }

    async fn add(router: &Router, session: &SessionState, name: &str) -> Item {
        let outcome = router
            .handle(session, ClientIntent::AddItem(NewItem::named(name)))
            .await;
        match &outcome.dispatches[0].event {
            ServerEvent::ItemAdded(item) => item.clone(),
            other => panic!("expected item:added, got {other:?}"),
        }
    }

    async fn next_event(outbox: &mut Outbox) -> ServerEvent {
        let event = tokio::time::timeout(Duration::from_secs(2), outbox.recv())
            .await
            .expect("timed out waiting for event")
            .expect("outbox closed");
        (*event).clone()
    }

    #[tokio::test]
    async fn test_join_sends_ack_and_snapshot() {
        let (router, store) = router_with(NoopCategorizer);
        let list = store.create_list("Groceries").await.unwrap();
        let session = in_room(&list);
        let a = add(&router, &session, "Eggs").await;
        let b = add(&router, &session, "Bread").await;

        let fresh = SessionState { id: Uuid::new_v4(), list_id: None };
        let outcome = router.handle(&fresh, ClientIntent::JoinList(list.id.clone())).await;
        assert_eq!(outcome.transition, Some(Membership::Join(list.id.clone())));
        assert!(outcome.dispatches.iter().all(|d| d.audience == Audience::Sender));
        assert_eq!(outcome.dispatches[0].event, ServerEvent::ListConnected(list.id.clone()));
        assert_eq!(
            outcome.dispatches[1].event,
            ServerEvent::ItemsRetrieved(store.items_for_list(&list.id).await.unwrap())
        );
        match &outcome.dispatches[1].event {
            ServerEvent::ItemsRetrieved(items) => {
                let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
                assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_unknown_list() {
        let (router, _) = router_with(NoopCategorizer);
        let fresh = SessionState { id: Uuid::new_v4(), list_id: None };
        let outcome = router.handle(&fresh, ClientIntent::JoinList("nope".into())).await;
        assert_eq!(outcome.transition, None);
        assert_eq!(outcome.events(), vec![&ServerEvent::ListError("List not found".into())]);
    }

    #[tokio::test]
    async fn test_leave_only_acknowledges_current_room() {
        let (router, store) = router_with(NoopCategorizer);
        let list = store.create_list("Groceries").await.unwrap();
        let session = in_room(&list);

        let other = router.handle(&session, ClientIntent::LeaveList("elsewhere".into())).await;
        assert_eq!(other, Outcome::none());

        let outcome = router.handle(&session, ClientIntent::LeaveList(list.id.clone())).await;
        assert_eq!(outcome.transition, Some(Membership::Leave(list.id.clone())));
        assert_eq!(outcome.events(), vec![&ServerEvent::ListDisconnected(list.id.clone())]);
    }

    #[tokio::test]
    async fn test_add_item_broadcasts_and_requests_categorization() {
        let (router, store) = router_with(NoopCategorizer);
        let list = store.create_list("Groceries").await.unwrap();
        let session = in_room(&list);

        let outcome = router
            .handle(&session, ClientIntent::AddItem(NewItem::named("  Milk ")))
            .await;
        let row = match &outcome.dispatches[0] {
            Dispatch { audience: Audience::Room(l), event: ServerEvent::ItemAdded(row), delay: None } => {
                assert_eq!(l, &list.id);
                row.clone()
            }
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!((row.name.as_str(), row.category.as_str(), row.quantity), ("Milk", "Other", 1));

        let highlight = &outcome.dispatches[1];
        assert_eq!(highlight.audience, Audience::Sender);
        assert_eq!(highlight.event, ServerEvent::ItemHighlight(row.id.clone()));
        assert_eq!(highlight.delay, Some(Duration::from_millis(250)));

        let job = outcome.categorize.expect("categorization requested");
        assert_eq!(job.item_id, row.id);
        assert_eq!(job.name, "Milk");
    }

    #[tokio::test]
    async fn test_add_item_with_category_skips_categorization() {
        let (router, store) = router_with(NoopCategorizer);
        let list = store.create_list("Groceries").await.unwrap();
        let item = NewItem {
            category: Some("Bakery".into()),
            ..NewItem::named("Bagels")
        };
        let outcome = router.handle(&in_room(&list), ClientIntent::AddItem(item)).await;
        assert!(outcome.categorize.is_none());
    }

    #[tokio::test]
    async fn test_add_item_rejects_blank_name() {
        let (router, store) = router_with(NoopCategorizer);
        let list = store.create_list("Groceries").await.unwrap();
        let outcome = router
            .handle(&in_room(&list), ClientIntent::AddItem(NewItem::named("   ")))
            .await;
        assert_eq!(outcome.events(), vec![&ServerEvent::ItemError("Item name is required".into())]);
        assert_eq!(outcome.dispatches[0].audience, Audience::Sender);
        assert!(store.items_for_list(&list.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mutation_outside_room_is_rejected() {
        let (router, _) = router_with(NoopCategorizer);
        let fresh = SessionState { id: Uuid::new_v4(), list_id: None };
        let outcome = router.handle(&fresh, ClientIntent::AddItem(NewItem::named("Milk"))).await;
        assert_eq!(outcome.events(), vec![&ServerEvent::ItemError("Join a list first".into())]);
    }

    #[tokio::test]
    async fn test_update_defaults_category() {
        let (router, store) = router_with(NoopCategorizer);
        let list = store.create_list("Groceries").await.unwrap();
        let session = in_room(&list);
        let row = add(&router, &session, "Milk").await;

        let update = ItemUpdate {
            id: row.id.clone(),
            name: "Oat milk".into(),
            category: Some(String::new()),
            quantity: Some(2),
            details: None,
        };
        let outcome = router.handle(&session, ClientIntent::UpdateItem(update)).await;
        match outcome.events()[..] {
            [ServerEvent::ItemUpdated(patch)] => {
                assert_eq!(patch.name.as_deref(), Some("Oat milk"));
                assert_eq!(patch.category.as_deref(), Some("Other"));
                assert_eq!(patch.quantity, Some(2));
            }
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_item_errors() {
        let (router, store) = router_with(NoopCategorizer);
        let list = store.create_list("Groceries").await.unwrap();
        let session = in_room(&list);
        let not_found = ServerEvent::ItemError("Item not found".into());

        let outcome = router.handle(&session, ClientIntent::CompleteItem("ghost".into())).await;
        assert_eq!(outcome.events(), vec![&not_found]);

        let outcome = router.handle(&session, ClientIntent::DeleteItem("ghost".into())).await;
        assert_eq!(outcome, Outcome::none());
    }

    #[tokio::test]
    async fn test_item_from_another_list_is_not_found() {
        let (router, store) = router_with(NoopCategorizer);
        let mine = store.create_list("Groceries").await.unwrap();
        let theirs = store.create_list("Hardware").await.unwrap();
        let foreign = add(&router, &in_room(&theirs), "Nails").await;

        let session = in_room(&mine);
        router.handle(&session, ClientIntent::DeleteItem(foreign.id.clone())).await;
        assert!(store.get_item(&foreign.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_complete_uncomplete_pairs_end_uncompleted() {
        let (router, store) = router_with(NoopCategorizer);
        let list = store.create_list("Groceries").await.unwrap();
        let session = in_room(&list);
        let row = add(&router, &session, "Milk").await;

        for _ in 0..3 {
            let done = router.handle(&session, ClientIntent::CompleteItem(row.id.clone())).await;
            assert!(matches!(done.events()[..], [ServerEvent::ItemCompleted(item)] if item.completed_at.is_some()));
            let undone = router.handle(&session, ClientIntent::UncompleteItem(row.id.clone())).await;
            assert_eq!(undone.events(), vec![&ServerEvent::ItemUncompleted(row.id.clone())]);
        }
        let stored = store.get_item(&row.id).await.unwrap().unwrap();
        assert_eq!(stored.completed_at, None);
    }

    #[tokio::test]
    async fn test_bulk_delete_is_scoped_to_list() {
        let (router, store) = router_with(NoopCategorizer);
        let list = store.create_list("Groceries").await.unwrap();
        let other = store.create_list("Hardware").await.unwrap();
        let session = in_room(&list);
        let a = add(&router, &session, "a").await;
        let b = add(&router, &session, "b").await;
        let c = add(&router, &in_room(&other), "c").await;

        let bulk = BulkDelete {
            list_id: Some(list.id.clone()),
            item_ids: vec![a.id.clone(), b.id.clone(), c.id.clone()],
        };
        let outcome = router.handle(&session, ClientIntent::DeleteItems(bulk)).await;
        assert_eq!(outcome.dispatches.len(), 1);
        assert_eq!(outcome.dispatches[0].audience, Audience::Room(list.id.clone()));
        assert_eq!(outcome.dispatches[0].event, ServerEvent::ItemsDeleted(vec![a.id, b.id]));
        assert!(store.get_item(&c.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bulk_delete_noops() {
        let (router, store) = router_with(NoopCategorizer);
        let list = store.create_list("Groceries").await.unwrap();
        let session = in_room(&list);
        let a = add(&router, &session, "a").await;

        let empty = BulkDelete { list_id: Some(list.id.clone()), item_ids: vec![] };
        assert_eq!(router.handle(&session, ClientIntent::DeleteItems(empty)).await, Outcome::none());

        let missing = BulkDelete { list_id: None, item_ids: vec![a.id.clone()] };
        assert_eq!(router.handle(&session, ClientIntent::DeleteItems(missing)).await, Outcome::none());
        assert!(store.get_item(&a.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bulk_delete_for_another_list_is_ignored() {
        let (router, store) = router_with(NoopCategorizer);
        let mine = store.create_list("Groceries").await.unwrap();
        let theirs = store.create_list("Hardware").await.unwrap();
        let row = add(&router, &in_room(&theirs), "Nails").await;

        let bulk = BulkDelete {
            list_id: Some(theirs.id.clone()),
            item_ids: vec![row.id.clone()],
        };
        let outcome = router.handle(&in_room(&mine), ClientIntent::DeleteItems(bulk)).await;
        assert_eq!(outcome, Outcome::none());
        assert!(store.get_item(&row.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sort_broadcasts_full_snapshot() {
        let (router, store) = router_with(NoopCategorizer);
        let list = store.create_list("Groceries").await.unwrap();
        let session = in_room(&list);
        let y = add(&router, &session, "y").await;
        let x = add(&router, &session, "x").await;

        let entries = vec![
            SortEntry { id: x.id.clone(), index: 0, category: "Produce".into() },
            SortEntry { id: y.id.clone(), index: 1, category: "Produce".into() },
        ];
        let outcome = router.handle(&session, ClientIntent::SortList(entries)).await;
        assert_eq!(outcome.dispatches[0].audience, Audience::Room(list.id.clone()));
        match outcome.events()[..] {
            [ServerEvent::ItemsRetrieved(items)] => {
                let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
                assert_eq!(ids, vec![x.id.as_str(), y.id.as_str()]);
                assert!(items.iter().all(|i| i.category == "Produce"));
            }
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rename_relays_to_peers_only() {
        let (router, store) = router_with(NoopCategorizer);
        let list = store.create_list("Groceries").await.unwrap();
        let session = in_room(&list);

        let rename = ListRename { id: list.id.clone(), name: " Weekly ".into() };
        let outcome = router.handle(&session, ClientIntent::RenameList(rename)).await;
        assert_eq!(outcome.dispatches[0].audience, Audience::RoomExceptSender(list.id.clone()));
        assert_eq!(
            outcome.dispatches[0].event,
            ServerEvent::ListRenamed(ListRename { id: list.id.clone(), name: "Weekly".into() })
        );

        let wrong = ListRename { id: "elsewhere".into(), name: "x".into() };
        let outcome = router.handle(&session, ClientIntent::RenameList(wrong)).await;
        assert!(matches!(outcome.events()[..], [ServerEvent::ListError(_)]));
    }

    #[tokio::test]
    async fn test_categorize_persists_known_category() {
        let (router, store) = router_with(FixedCategorizer::new().with("Milk", "dairy"));
        let list = store.create_list("Groceries").await.unwrap();
        let row = add(&router, &in_room(&list), "Milk").await;

        let job = Categorization { item_id: row.id.clone(), list_id: list.id.clone(), name: "Milk".into() };
        let outcome = router.categorize(&job).await;
        assert_eq!(
            outcome.dispatches[0],
            Dispatch {
                audience: Audience::Room(list.id.clone()),
                event: ServerEvent::ItemUpdated(ItemPatch::category(&row.id, "Dairy")),
                delay: None,
            }
        );
        assert_eq!(outcome.dispatches[1].audience, Audience::Sender);
        assert_eq!(
            outcome.dispatches[1].event,
            ServerEvent::ItemCategorized(Categorized { id: row.id.clone(), category: "Dairy".into() })
        );
        assert_eq!(store.get_item(&row.id).await.unwrap().unwrap().category, "Dairy");
    }

    #[tokio::test]
    async fn test_categorize_other_is_silent() {
        let (router, store) = router_with(FixedCategorizer::new().with("Widget", "Gadgets"));
        let list = store.create_list("Groceries").await.unwrap();
        let row = add(&router, &in_room(&list), "Widget").await;
        let job = Categorization { item_id: row.id, list_id: list.id, name: "Widget".into() };
        assert_eq!(router.categorize(&job).await, Outcome::none());
    }

    #[tokio::test]
    async fn test_categorize_keeps_user_choice() {
        let (router, store) = router_with(FixedCategorizer::new().with("Milk", "Dairy"));
        let list = store.create_list("Groceries").await.unwrap();
        let row = add(&router, &in_room(&list), "Milk").await;
        store.set_category(&row.id, "Frozen Foods").await.unwrap();

        let job = Categorization { item_id: row.id.clone(), list_id: list.id, name: "Milk".into() };
        assert_eq!(router.categorize(&job).await, Outcome::none());
        assert_eq!(store.get_item(&row.id).await.unwrap().unwrap().category, "Frozen Foods");
    }

    struct SlowCategorizer;

    #[async_trait]
    impl Categorizer for SlowCategorizer {
        async fn categorize(&self, _name: &str) -> Result<String, CategorizeError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("Dairy".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_categorize_timeout_is_silent() {
        let (router, store) = router_with(SlowCategorizer);
        let list = store.create_list("Groceries").await.unwrap();
        let row = add(&router, &in_room(&list), "Milk").await;
        let job = Categorization { item_id: row.id.clone(), list_id: list.id, name: "Milk".into() };
        assert_eq!(router.categorize(&job).await, Outcome::none());
        assert_eq!(store.get_item(&row.id).await.unwrap().unwrap().category, "Other");
    }

    /// Lists resolve; every item write fails.
    struct BrokenItems(MemoryStore);

    fn broken() -> StoreError {
        StoreError::DatabaseError("disk on fire".into())
    }

    #[async_trait]
    impl ListStore for BrokenItems {
        async fn create_list(&self, name: &str) -> Result<List, StoreError> {
            self.0.create_list(name).await
        }
        async fn get_list(&self, id: &str) -> Result<Option<List>, StoreError> {
            self.0.get_list(id).await
        }
        async fn get_lists(&self, ids: &[String]) -> Result<Vec<List>, StoreError> {
            self.0.get_lists(ids).await
        }
        async fn rename_list(&self, id: &str, name: &str) -> Result<Option<List>, StoreError> {
            self.0.rename_list(id, name).await
        }
        async fn delete_list(&self, id: &str) -> Result<bool, StoreError> {
            self.0.delete_list(id).await
        }
        async fn insert_item(&self, _: &str, _: NewItem) -> Result<Item, StoreError> {
            Err(broken())
        }
        async fn get_item(&self, id: &str) -> Result<Option<Item>, StoreError> {
            self.0.get_item(id).await
        }
        async fn items_for_list(&self, list_id: &str) -> Result<Vec<Item>, StoreError> {
            self.0.items_for_list(list_id).await
        }
        async fn update_item(&self, _: &ItemUpdate) -> Result<Option<Item>, StoreError> {
            Err(broken())
        }
        async fn set_category(&self, _: &str, _: &str) -> Result<Option<Item>, StoreError> {
            Err(broken())
        }
        async fn set_completed(&self, _: &str, _: Option<i64>) -> Result<Option<Item>, StoreError> {
            Err(broken())
        }
        async fn delete_item(&self, _: &str) -> Result<Option<Item>, StoreError> {
            Err(broken())
        }
        async fn delete_items(&self, _: &str, _: &[String]) -> Result<Vec<String>, StoreError> {
            Err(broken())
        }
        async fn reorder(&self, _: &str, _: &[SortEntry]) -> Result<usize, StoreError> {
            Err(broken())
        }
        async fn recently_completed(&self, _: &str, _: i64) -> Result<Vec<String>, StoreError> {
            Err(broken())
        }
    }

    #[tokio::test]
    async fn test_store_failure_reaches_sender_only() {
        let store = Arc::new(BrokenItems(MemoryStore::new()));
        let list = store.create_list("Groceries").await.unwrap();
        let router = Router::new(
            store,
            Arc::new(RoomRegistry::new(8)),
            Arc::new(NoopCategorizer),
            RouterConfig::default(),
        );
        let session = in_room(&list);

        let outcome = router.handle(&session, ClientIntent::AddItem(NewItem::named("Milk"))).await;
        assert_eq!(outcome.dispatches.len(), 1);
        assert_eq!(outcome.dispatches[0].audience, Audience::Sender);
        assert_eq!(outcome.dispatches[0].event, ServerEvent::ItemError("Failed to add item".into()));
        assert!(outcome.categorize.is_none());

        let bulk = BulkDelete { list_id: Some(list.id.clone()), item_ids: vec!["a".into()] };
        let outcome = router.handle(&session, ClientIntent::DeleteItems(bulk)).await;
        assert_eq!(outcome.events(), vec![&ServerEvent::ItemError("Failed to delete items".into())]);
    }

    #[tokio::test]
    async fn test_dispatch_add_then_categorize_reaches_room() {
        let (router, store) = router_with(FixedCategorizer::new().with("Milk", "Dairy"));
        let list = store.create_list("L1").await.unwrap();
        let registry = router.registry().clone();
        let (a, mut rx_a) = registry.open_session().await;
        let (b, mut rx_b) = registry.open_session().await;

        router.dispatch(&a, ClientIntent::JoinList(list.id.clone())).await;
        router.dispatch(&b, ClientIntent::JoinList(list.id.clone())).await;
        for rx in [&mut rx_a, &mut rx_b] {
            assert!(matches!(next_event(rx).await, ServerEvent::ListConnected(_)));
            assert_eq!(next_event(rx).await, ServerEvent::ItemsRetrieved(vec![]));
        }

        router.dispatch(&a, ClientIntent::AddItem(NewItem::named("Milk"))).await;

        let added_b = next_event(&mut rx_b).await;
        let row = match added_b {
            ServerEvent::ItemAdded(row) => row,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!((row.category.as_str(), row.quantity), ("Other", 1));
        assert_eq!(
            next_event(&mut rx_b).await,
            ServerEvent::ItemUpdated(ItemPatch::category(&row.id, "Dairy"))
        );

        let mut seen_by_a = Vec::new();
        for _ in 0..4 {
            seen_by_a.push(next_event(&mut rx_a).await);
        }
        assert_eq!(seen_by_a[0], ServerEvent::ItemAdded(row.clone()));
        assert!(seen_by_a.contains(&ServerEvent::ItemUpdated(ItemPatch::category(&row.id, "Dairy"))));
        assert!(seen_by_a.contains(&ServerEvent::ItemHighlight(row.id.clone())));
        assert!(seen_by_a.contains(&ServerEvent::ItemCategorized(Categorized {
            id: row.id.clone(),
            category: "Dairy".into(),
        })));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx_b.try_recv().is_err(), "peer must not see sender-only events");
    }

    #[tokio::test]
    async fn test_dispatch_join_moves_rooms() {
        let (router, store) = router_with(NoopCategorizer);
        let first = store.create_list("One").await.unwrap();
        let second = store.create_list("Two").await.unwrap();
        let registry = router.registry().clone();
        let (a, _rx) = registry.open_session().await;

        router.dispatch(&a, ClientIntent::JoinList(first.id.clone())).await;
        router.dispatch(&a, ClientIntent::JoinList(second.id.clone())).await;
        assert!(registry.members(&first.id).await.is_empty());
        assert_eq!(registry.members(&second.id).await, vec![a]);

        router.disconnect(&a).await;
        assert!(registry.members(&second.id).await.is_empty());
    }
}
