//! Room registry: which session is viewing which list, and fan-out.
//!
//! Every connected session owns a bounded outbound queue. A room is the set
//! of sessions currently joined to one list id; a session is in at most one
//! room at a time. Delivery is best-effort: a full or closed queue drops the
//! event and the sender moves on.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::protocol::ServerEvent;

pub type SessionId = Uuid;

/// Receiving half of a session's outbound queue.
pub type Outbox = mpsc::Receiver<Arc<ServerEvent>>;

/// Per-session routing state handed to every router call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub id: SessionId,
    pub list_id: Option<String>,
}

/// Statistics for monitoring delivery health.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub delivered: u64,
    pub dropped: u64,
    pub sessions: usize,
    pub rooms: usize,
}

struct SessionHandle {
    sender: mpsc::Sender<Arc<ServerEvent>>,
    list_id: Option<String>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionHandle>,
    rooms: HashMap<String, HashSet<SessionId>>,
}

pub struct RoomRegistry {
    inner: RwLock<Inner>,
    /// Outbound queue capacity per session
    capacity: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl RoomRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity: capacity.max(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new connection; the caller drains the returned outbox.
    pub async fn open_session(&self) -> (SessionId, Outbox) {
        let id = Uuid::new_v4();
        let (sender, outbox) = mpsc::channel(self.capacity);
        self.inner.write().await.sessions.insert(
            id,
            SessionHandle {
                sender,
                list_id: None,
            },
        );
        (id, outbox)
    }

    /// Drop a session and its membership. Returns the list it was viewing.
    pub async fn close_session(&self, session: &SessionId) -> Option<String> {
        let mut inner = self.inner.write().await;
        let handle = inner.sessions.remove(session)?;
        if let Some(list_id) = &handle.list_id {
            Self::remove_member(&mut inner.rooms, list_id, session);
        }
        handle.list_id
    }

    pub async fn session_state(&self, session: &SessionId) -> Option<SessionState> {
        let inner = self.inner.read().await;
        inner.sessions.get(session).map(|h| SessionState {
            id: *session,
            list_id: h.list_id.clone(),
        })
    }

    /// Associate a session with a list. Idempotent for the current list.
    ///
    /// The caller is responsible for leaving any previous list first; a
    /// stale membership is replaced rather than duplicated.
    pub async fn join(&self, session: &SessionId, list_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Inner { sessions, rooms } = &mut *inner;
        let Some(handle) = sessions.get_mut(session) else {
            return false;
        };
        if handle.list_id.as_deref() == Some(list_id) {
            return true;
        }
        if let Some(previous) = handle.list_id.take() {
            log::warn!("Session {session} joined {list_id} without leaving {previous}");
            Self::remove_member(rooms, &previous, session);
        }
        handle.list_id = Some(list_id.to_string());
        rooms.entry(list_id.to_string()).or_default().insert(*session);
        true
    }

    /// Remove a session from a list. No-op if it is not a member.
    pub async fn leave(&self, session: &SessionId, list_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Inner { sessions, rooms } = &mut *inner;
        match sessions.get_mut(session) {
            Some(handle) if handle.list_id.as_deref() == Some(list_id) => {
                handle.list_id = None;
                Self::remove_member(rooms, list_id, session);
                true
            }
            _ => false,
        }
    }

    /// Deliver to every session in `list_id`, optionally skipping one.
    /// Returns the number of sessions the event was queued for.
    pub async fn broadcast(
        &self,
        list_id: &str,
        event: ServerEvent,
        exclude: Option<&SessionId>,
    ) -> usize {
        let event = Arc::new(event);
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(list_id) else {
            return 0;
        };
        members
            .iter()
            .filter(|id| Some(*id) != exclude)
            .filter_map(|id| inner.sessions.get(id).map(|h| (id, h)))
            .filter(|(id, handle)| self.deliver(id, handle, &event))
            .count()
    }

    /// Deliver to a single session, regardless of room.
    pub async fn send_to(&self, session: &SessionId, event: ServerEvent) -> bool {
        let inner = self.inner.read().await;
        match inner.sessions.get(session) {
            Some(handle) => self.deliver(session, handle, &Arc::new(event)),
            None => false,
        }
    }

    fn deliver(&self, id: &SessionId, handle: &SessionHandle, event: &Arc<ServerEvent>) -> bool {
        match handle.sender.try_send(event.clone()) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Session {id} outbox full, dropping {}", event.name());
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Session {id} closed, dropping {}", event.name());
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn remove_member(rooms: &mut HashMap<String, HashSet<SessionId>>, list_id: &str, session: &SessionId) {
        if let Some(members) = rooms.get_mut(list_id) {
            members.remove(session);
            if members.is_empty() {
                rooms.remove(list_id);
                log::debug!("Room {list_id} removed (empty)");
            }
        }
    }

    pub async fn members(&self, list_id: &str) -> Vec<SessionId> {
        self.inner
            .read()
            .await
            .rooms
            .get(list_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        RegistryStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            sessions: inner.sessions.len(),
            rooms: inner.rooms.len(),
        }
    }
}
