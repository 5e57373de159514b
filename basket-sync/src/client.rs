//! WebSocket client transport for the sync engine.
//!
//! Intents are written to one long-lived channel
//! ([`SyncClient::intent_sender`]) that outlives individual connections.
//! Each connection spawns a writer task that drains the channel onto the
//! socket and a reader task that decodes frames into [`ClientEvent`]s.
//! Intents queued while offline are dropped on the next connect; the
//! engine recovers through the rejoin snapshot instead.

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientIntent, ProtocolError, ServerEvent};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    Server(ServerEvent),
}

pub struct SyncClient {
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    intent_tx: mpsc::Sender<ClientIntent>,
    /// Shared by successive writer tasks
    intent_rx: Arc<Mutex<mpsc::Receiver<ClientIntent>>>,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (intent_tx, intent_rx) = mpsc::channel(256);
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            intent_tx,
            intent_rx: Arc::new(Mutex::new(intent_rx)),
            event_tx,
            event_rx: Some(event_rx),
            tasks: Vec::new(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Sender for intents; hand this to a [`SyncEngine`](crate::engine::SyncEngine).
    pub fn intent_sender(&self) -> mpsc::Sender<ClientIntent> {
        self.intent_tx.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Connect (or reconnect) to the server.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        self.abort_tasks();
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (closed_tx, mut closed_rx) = oneshot::channel::<()>();

        let mut rx = self.intent_rx.clone().lock_owned().await;
        let mut stale = 0usize;
        while rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            log::warn!("Dropped {stale} intents queued while offline");
        }

        // Writer task: forward intents to the socket until the reader stops
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    intent = rx.recv() => {
                        let Some(intent) = intent else { break };
                        let text = match intent.encode() {
                            Ok(text) => text,
                            Err(e) => {
                                log::error!("Failed to encode {}: {e}", intent.name());
                                continue;
                            }
                        };
                        if ws_writer.send(Message::text(text)).await.is_err() {
                            log::warn!("Socket closed, dropping {}", intent.name());
                            break;
                        }
                    }
                    _ = &mut closed_rx => break,
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        log::info!("Connected to {}", self.server_url);
        let _ = self.event_tx.send(ClientEvent::Connected).await;

        // Reader task: decode server events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(ClientEvent::Server(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Ignoring malformed server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            drop(closed_tx);
            *state.write().await = ConnectionState::Disconnected;
            log::info!("Connection to server lost");
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        self.tasks = vec![writer, reader];
        Ok(())
    }

    /// Queue an intent for the current connection.
    pub async fn send(&self, intent: ClientIntent) -> Result<(), ProtocolError> {
        if self.connection_state().await != ConnectionState::Connected {
            log::warn!("Not connected, dropping {}", intent.name());
            return Err(ProtocolError::ConnectionClosed);
        }
        self.intent_tx
            .send(intent)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Close the connection. Emits [`ClientEvent::Disconnected`].
    pub async fn disconnect(&mut self) {
        self.abort_tasks();
        let mut state = self.state.write().await;
        if *state != ConnectionState::Disconnected {
            *state = ConnectionState::Disconnected;
            drop(state);
            let _ = self.event_tx.send(ClientEvent::Disconnected).await;
        }
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
