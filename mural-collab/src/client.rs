//! WebSocket board client.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Draw/clear/resync ops with timestamps stamped from the local clock
//! - Offline queue: draws made while disconnected replay on reconnect.
//!   Safe under LWW: the original timestamps travel with the ops, so a
//!   replayed stale draw simply loses.

use std::collections::VecDeque;
use std::sync::Arc;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use mural_core::{Clock, Grid, Phase, SystemClock};

use crate::protocol::{ClientOp, ProtocolError, ServerEvent};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events surfaced to the application.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// Full board state (catch-up, post-write, or requested resync)
    Snapshot(Vec<Grid>),
    /// Countdown tick
    PhaseTick { phase: Phase, remaining_ms: u64 },
    /// The board returned to round-initial state
    RoundReset(Vec<Grid>),
    /// A round artifact is available at `reference`
    ExportReady(String),
    /// Heartbeat reply
    Pong,
}

/// A draw captured while offline, replayed verbatim on reconnect.
#[derive(Debug, Clone, PartialEq)]
struct QueuedWrite {
    grid: u32,
    key: String,
    value: i64,
    timestamp: u64,
}

/// Bounded queue of draws made while disconnected.
pub struct OfflineQueue {
    queue: VecDeque<QueuedWrite>,
    max_size: usize,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    fn enqueue(&mut self, write: QueuedWrite) -> bool {
        if self.queue.len() >= self.max_size {
            return false; // Queue full
        }
        self.queue.push_back(write);
        true
    }

    fn drain(&mut self) -> Vec<QueuedWrite> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// The board client.
///
/// Manages one WebSocket connection to the board server, translating
/// server frames into [`BoardEvent`]s and queueing draws while offline.
pub struct BoardClient {
    /// Client-side identity, used only for logging.
    client_id: Uuid,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Stamps draw timestamps
    clock: Arc<dyn Clock>,

    /// Draws captured while disconnected
    offline_queue: Arc<Mutex<OfflineQueue>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<BoardEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<BoardEvent>,

    /// Server URL
    server_url: String,
}

impl BoardClient {
    /// Create a new client on the system clock.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_clock(server_url, Arc::new(SystemClock))
    }

    /// Create a client with an injected clock (tests stamp timestamps by hand).
    pub fn with_clock(server_url: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            client_id: Uuid::new_v4(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            clock,
            offline_queue: Arc::new(Mutex::new(OfflineQueue::new(10_000))),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<BoardEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket frames and
    /// replays any draws queued while offline.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_result = tokio_tungstenite::connect_async(&self.server_url).await;

        match ws_result {
            Ok((ws_stream, _)) => {
                let (mut ws_writer, mut ws_reader) = ws_stream.split();

                // Writer task: forward the outgoing channel to the socket.
                let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
                self.outgoing_tx = Some(out_tx);
                tokio::spawn(async move {
                    use futures_util::SinkExt;
                    while let Some(data) = out_rx.recv().await {
                        if ws_writer
                            .send(tokio_tungstenite::tungstenite::Message::Binary(data.into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                });

                *self.state.write().await = ConnectionState::Connected;
                let _ = self.event_tx.send(BoardEvent::Connected).await;

                // Replay the offline queue with its original timestamps.
                {
                    let mut queue = self.offline_queue.lock().await;
                    let queued = queue.drain();
                    if !queued.is_empty() {
                        log::info!(
                            "client {}: replaying {} queued draws",
                            self.client_id,
                            queued.len()
                        );
                        for write in queued {
                            let op = ClientOp::Write {
                                grid: write.grid,
                                key: write.key,
                                value: write.value,
                                timestamp: write.timestamp,
                            };
                            if let Ok(encoded) = op.encode() {
                                if let Some(ref tx) = self.outgoing_tx {
                                    let _ = tx.send(encoded).await;
                                }
                            }
                        }
                    }
                }

                // Reader task: translate server frames into events.
                let event_tx = self.event_tx.clone();
                let state = self.state.clone();
                tokio::spawn(async move {
                    while let Some(msg) = ws_reader.next().await {
                        match msg {
                            Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                                let bytes: Vec<u8> = data.into();
                                match ServerEvent::decode(&bytes) {
                                    Ok(event) => {
                                        let translated = match event {
                                            ServerEvent::Snapshot { grids } => {
                                                BoardEvent::Snapshot(grids)
                                            }
                                            ServerEvent::PhaseTick { phase, remaining_ms } => {
                                                BoardEvent::PhaseTick { phase, remaining_ms }
                                            }
                                            ServerEvent::RoundReset { grids } => {
                                                BoardEvent::RoundReset(grids)
                                            }
                                            ServerEvent::ExportReady { reference } => {
                                                BoardEvent::ExportReady(reference)
                                            }
                                            ServerEvent::Pong => BoardEvent::Pong,
                                        };
                                        if event_tx.send(translated).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        log::warn!("undecodable server frame: {e}");
                                    }
                                }
                            }
                            Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => {
                                break;
                            }
                            _ => {}
                        }
                    }

                    // Connection lost
                    *state.write().await = ConnectionState::Disconnected;
                    let _ = event_tx.send(BoardEvent::Disconnected).await;
                });

                Ok(())
            }
            Err(_e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Paint one cell, stamped with the local clock.
    ///
    /// If disconnected, the draw is queued for replay on reconnect.
    pub async fn draw(
        &self,
        grid: u32,
        key: impl Into<String>,
        value: i64,
    ) -> Result<(), ProtocolError> {
        let write = QueuedWrite {
            grid,
            key: key.into(),
            value,
            timestamp: self.clock.now_ms(),
        };

        let state = *self.state.read().await;
        if state != ConnectionState::Connected {
            let mut queue = self.offline_queue.lock().await;
            if !queue.enqueue(write) {
                return Err(ProtocolError::ConnectionClosed);
            }
            return Ok(());
        }

        let op = ClientOp::Write {
            grid: write.grid,
            key: write.key,
            value: write.value,
            timestamp: write.timestamp,
        };
        self.send(op).await
    }

    /// Force an immediate board reset (any phase).
    pub async fn clear(&self) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Ok(()); // Meaningless offline; drop silently
        }
        self.send(ClientOp::Clear).await
    }

    /// Ask for a fresh snapshot.
    pub async fn request_snapshot(&self) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Ok(());
        }
        self.send(ClientOp::RequestSnapshot).await
    }

    /// Send a heartbeat ping.
    pub async fn ping(&self) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Ok(());
        }
        self.send(ClientOp::Ping).await
    }

    async fn send(&self, op: ClientOp) -> Result<(), ProtocolError> {
        let encoded = op.encode()?;
        if let Some(ref tx) = self.outgoing_tx {
            tx.send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Number of draws waiting for replay.
    pub async fn offline_queue_len(&self) -> usize {
        self.offline_queue.lock().await.len()
    }
}
