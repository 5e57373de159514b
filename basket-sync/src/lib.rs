//! # basket-sync
//!
//! Real-time synchronization core for collaborative shopping lists.
//!
//! Every participant viewing a list sits in that list's room; every change
//! is validated against the store and broadcast to the room.
//!
//! Server side:
//! - [`registry`]: sessions, room membership and best-effort fan-out
//! - [`router`]: client intents → store mutations → dispatch descriptors
//! - [`categorize`]: background category suggestions for new items
//! - [`lists`]: request/response list actions (create, fetch, rename)
//! - [`storage`]: the `ListStore` contract with in-memory and RocksDB backends
//! - [`server`]: WebSocket transport
//!
//! Client side:
//! - [`client`]: WebSocket transport with reconnect
//! - [`engine`]: optimistic local state, completion timers, drag reordering
//! - [`reconcile`]: pure `(state, event) → state` folding
//!
//! Wire format: JSON text frames `{"event": "...", "data": ...}`, see [`protocol`].

pub mod categorize;
pub mod client;
pub mod engine;
pub mod lists;
pub mod model;
pub mod protocol;
pub mod reconcile;
pub mod registry;
pub mod router;
pub mod server;
pub mod storage;

pub use categorize::{Categorizer, FixedCategorizer, NoopCategorizer, OpenAiCategorizer, OpenAiConfig};
pub use client::{ClientEvent, ConnectionState, SyncClient};
pub use engine::{EngineConfig, Notice, SyncEngine};
pub use lists::{ActionError, ListActions};
pub use model::{Item, ItemPatch, ItemUpdate, List, ListSnapshot, NewItem, SortEntry};
pub use protocol::{ClientIntent, ServerEvent};
pub use reconcile::{reconcile, CategoryView, ListState};
pub use registry::{RoomRegistry, SessionId, SessionState};
pub use router::{Audience, Dispatch, Outcome, Router, RouterConfig};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use storage::{ListStore, MemoryStore, RocksStore, StoreConfig, StoreError};
