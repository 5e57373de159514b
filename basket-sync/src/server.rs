//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                 ┌── Room (list_id) ──┐
//!            ├── Router ───────┤                    ├──► Client A
//! Client B ──┘     │           └── RoomRegistry ────┘    Client B
//!                  │
//!                  ├── ListStore (memory / RocksDB)
//!                  └── Categorizer (background)
//! ```
//!
//! Each connection registers a session with the [`RoomRegistry`] and runs a
//! single `select!` loop: text frames are decoded into intents and handed
//! to the [`Router`]; events queued in the session outbox are written back.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

use crate::categorize::{Categorizer, NoopCategorizer};
use crate::lists::ListActions;
use crate::protocol::ClientIntent;
use crate::registry::RoomRegistry;
use crate::router::{Router, RouterConfig};
use crate::storage::{ListStore, MemoryStore, RocksStore, StoreConfig, StoreError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Outbound queue capacity per session
    pub session_buffer: usize,
    /// Delay before `item:highlight` reaches the sender
    pub highlight_delay_ms: u64,
    /// Timeout for one categorization call
    pub categorize_timeout_ms: u64,
    /// RocksDB directory (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
            session_buffer: 256,
            highlight_delay_ms: 250,
            categorize_timeout_ms: 5000,
            storage_path: None,
        }
    }
}

impl ServerConfig {
    fn router_config(&self) -> RouterConfig {
        RouterConfig {
            highlight_delay: Duration::from_millis(self.highlight_delay_ms),
            categorize_timeout: Duration::from_millis(self.categorize_timeout_ms),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    /// Frames that did not decode as an intent
    pub rejected_frames: u64,
    pub active_rooms: usize,
    pub dropped_events: u64,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    router: Router,
    actions: ListActions,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn ListStore>,
        categorizer: Arc<dyn Categorizer>,
    ) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.session_buffer));
        let router = Router::new(
            store.clone(),
            registry,
            categorizer,
            config.router_config(),
        );
        Self {
            config,
            router,
            actions: ListActions::new(store),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// In-memory store, no categorization.
    pub fn with_defaults() -> Self {
        Self::new(
            ServerConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(NoopCategorizer),
        )
    }

    /// Open the store described by `config.storage_path`.
    pub fn from_config(
        config: ServerConfig,
        categorizer: Arc<dyn Categorizer>,
    ) -> Result<Self, StoreError> {
        let store: Arc<dyn ListStore> = match &config.storage_path {
            Some(path) => {
                let store_config = StoreConfig {
                    path: path.clone(),
                    ..StoreConfig::default()
                };
                Arc::new(RocksStore::open(store_config)?)
            }
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(config, store, categorizer))
    }

    /// Request/response list actions sharing this server's store.
    pub fn actions(&self) -> &ListActions {
        &self.actions
    }

    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        let registry = self.router.registry().stats().await;
        stats.active_rooms = registry.rooms;
        stats.dropped_events = registry.dropped;
        stats
    }

    /// Bind `config.bind_addr` and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept WebSocket connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let router = self.router.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, router, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        router: Router,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (session, mut outbox) = router.registry().open_session().await;
        log::info!("WebSocket connection established from {addr} (session {session})");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                            }
                            match ClientIntent::decode(text.as_str()) {
                                Ok(intent) => router.dispatch(&session, intent).await,
                                Err(e) => {
                                    log::warn!("Ignoring frame from {addr}: {e}");
                                    stats.write().await.rejected_frames += 1;
                                }
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            log::warn!("Ignoring binary frame from {addr}");
                            stats.write().await.rejected_frames += 1;
                        }
                        Some(Ok(Message::Close(_))) | None => break Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Err(e.into()),
                    }
                }

                event = outbox.recv() => {
                    let Some(event) = event else { break Ok(()) };
                    match event.encode() {
                        Ok(text) => {
                            if let Err(e) = ws_sender.send(Message::text(text)).await {
                                break Err(e.into());
                            }
                        }
                        Err(e) => log::error!("Failed to encode {}: {e}", event.name()),
                    }
                }
            }
        };

        router.disconnect(&session).await;
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Connection from {addr} closed");
        result
    }
}
