//! WebSocket board server.
//!
//! Architecture:
//! ```text
//! Session A ──┐                         ┌── 1 Hz ticker ── PhaseScheduler
//!              ├── StateStore (LWW) ◄───┤        │ transitions (mpsc)
//! Session B ──┘        │                └── round driver ── export / reset
//!                      │ snapshot
//!                      ▼
//!                 Broadcaster ── full-state fan-out ──► every session
//! ```
//!
//! The store and broadcaster are built once per process and passed by
//! reference into the session tasks; there are no ambient globals. The
//! ticker only observes the clock; everything it triggers (export,
//! reset, broadcast) runs in the round driver so a slow export can never
//! stall the countdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use mural_core::{
    default_board, Clock, Grid, GridSpec, Phase, PhaseScheduler, PhaseTransition, RoundConfig,
    RoundTimeline, StateStore, SystemClock, WriteOutcome,
};

use crate::broadcast::{Broadcaster, SessionInfo};
use crate::export::{MeshExporter, SnapshotExporter};
use crate::protocol::{ClientOp, ServerEvent};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity (frames buffered per session)
    pub broadcast_capacity: usize,
    /// Active/rest window durations
    pub round: RoundConfig,
    /// The board layout: one spec per grid
    pub specs: Vec<GridSpec>,
    /// Where round artifacts land (None = exporting disabled)
    pub export_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            round: RoundConfig::default(),
            specs: default_board(),
            export_dir: None,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_ops: u64,
    pub total_bytes: u64,
    pub rounds_completed: u64,
    pub exports_completed: u64,
    pub exports_failed: u64,
}

/// The board server.
pub struct BoardServer {
    config: ServerConfig,
    store: Arc<StateStore>,
    broadcaster: Arc<Broadcaster>,
    clock: Arc<dyn Clock>,
    exporter: Option<Arc<dyn SnapshotExporter>>,
    stats: Arc<RwLock<ServerStats>>,
}

impl BoardServer {
    /// Create a server on the system clock.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a server with an injected clock (tests drive phases by hand).
    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(StateStore::new(config.specs.clone()));
        let broadcaster = Arc::new(Broadcaster::new(config.broadcast_capacity));
        let exporter = config.export_dir.as_ref().map(|dir| {
            let names = config.specs.iter().map(|s| s.name.clone()).collect();
            Arc::new(MeshExporter::new(dir.clone(), names)) as Arc<dyn SnapshotExporter>
        });

        Self {
            config,
            store,
            broadcaster,
            clock,
            exporter,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Replace the exporter (tests, alternative artifact formats).
    pub fn with_exporter(mut self, exporter: Arc<dyn SnapshotExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Start listening for WebSocket sessions.
    ///
    /// Runs until the listener fails; the ticker and round-driver tasks
    /// are owned by a guard and cancelled when this returns.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("mural server listening on {}", self.config.bind_addr);

        let _round_tasks = self.spawn_round_tasks();

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let store = self.store.clone();
            let broadcaster = self.broadcaster.clone();
            let clock = self.clock.clone();
            let stats = self.stats.clone();
            let timeline = RoundTimeline::new(self.config.round);

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, store, broadcaster, clock, timeline, stats)
                        .await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Spawn the 1 Hz ticker and the round driver it feeds.
    fn spawn_round_tasks(&self) -> TaskGuard {
        let (transition_tx, mut transition_rx) = mpsc::channel::<PhaseTransition>(8);

        // Ticker: recompute the phase every second, publish the countdown.
        // Its own loop never runs downstream handlers.
        let ticker = {
            let broadcaster = self.broadcaster.clone();
            let clock = self.clock.clone();
            let round = self.config.round;
            tokio::spawn(async move {
                let mut scheduler = PhaseScheduler::new(round, clock);
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                loop {
                    interval.tick().await;
                    if let Some(transition) = scheduler.tick() {
                        if transition_tx.send(transition).await.is_err() {
                            break; // driver gone, shutting down
                        }
                    }
                    let _ = broadcaster.publish(&ServerEvent::PhaseTick {
                        phase: scheduler.phase(),
                        remaining_ms: scheduler.remaining_ms(),
                    });
                }
            })
        };

        // Driver: export on entering rest, reset + rebroadcast on entering
        // active. Failures are logged and counted, never propagated back
        // into the ticker.
        let driver = {
            let store = self.store.clone();
            let broadcaster = self.broadcaster.clone();
            let exporter = self.exporter.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                while let Some(transition) = transition_rx.recv().await {
                    match transition.to {
                        Phase::Rest => {
                            let Some(exporter) = exporter.clone() else {
                                continue;
                            };
                            // Frozen copy: the export never races the reset.
                            let snapshot = store.snapshot();
                            match tokio::task::spawn_blocking(move || exporter.export(&snapshot))
                                .await
                            {
                                Ok(Ok(reference)) => {
                                    stats.write().await.exports_completed += 1;
                                    let _ = broadcaster
                                        .publish(&ServerEvent::ExportReady { reference });
                                }
                                Ok(Err(e)) => {
                                    stats.write().await.exports_failed += 1;
                                    log::warn!("round export failed: {e}");
                                }
                                Err(e) => {
                                    stats.write().await.exports_failed += 1;
                                    log::warn!("export task failed to run: {e}");
                                }
                            }
                        }
                        Phase::Active => {
                            let grids = store.reset();
                            stats.write().await.rounds_completed += 1;
                            log::info!("new round: board reset");
                            let _ = broadcaster.publish(&ServerEvent::RoundReset { grids });
                        }
                    }
                }
            })
        };

        TaskGuard(vec![ticker, driver])
    }

    /// Handle a single WebSocket session.
    ///
    /// Registration and deregistration bracket the session loop
    /// unconditionally: a session whose socket fails mid-loop is still
    /// removed from the registry.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        store: Arc<StateStore>,
        broadcaster: Arc<Broadcaster>,
        clock: Arc<dyn Clock>,
        timeline: RoundTimeline,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let info = SessionInfo::new(clock.now_ms());
        let session_id = info.session_id;
        let mut rx = broadcaster.register(info).await;

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }
        log::info!("session {session_id} connected from {addr}");

        let result = Self::session_loop(
            &mut ws_sender,
            &mut ws_receiver,
            &mut rx,
            session_id,
            addr,
            &store,
            &broadcaster,
            &clock,
            timeline,
            &stats,
        )
        .await;

        broadcaster.unregister(&session_id).await;
        stats.write().await.active_connections -= 1;
        result
    }

    /// Catch-up send plus the session's select loop.
    #[allow(clippy::too_many_arguments)]
    async fn session_loop(
        ws_sender: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
        ws_receiver: &mut SplitStream<WebSocketStream<TcpStream>>,
        rx: &mut tokio::sync::broadcast::Receiver<Arc<Vec<u8>>>,
        session_id: uuid::Uuid,
        addr: SocketAddr,
        store: &Arc<StateStore>,
        broadcaster: &Arc<Broadcaster>,
        clock: &Arc<dyn Clock>,
        timeline: RoundTimeline,
        stats: &Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Catch-up: the joining session gets the full current state and
        // the live countdown before it sees any broadcast frame.
        let snapshot_frame = ServerEvent::Snapshot {
            grids: store.snapshot(),
        }
        .encode()?;
        ws_sender.send(Message::Binary(snapshot_frame.into())).await?;

        let now = clock.now_ms();
        let tick_frame = ServerEvent::PhaseTick {
            phase: timeline.phase_at(now),
            remaining_ms: timeline.remaining_ms(now),
        }
        .encode()?;
        ws_sender.send(Message::Binary(tick_frame.into())).await?;

        loop {
            tokio::select! {
                // Incoming op from this session
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            {
                                let mut s = stats.write().await;
                                s.total_ops += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            match ClientOp::decode(&bytes) {
                                Ok(ClientOp::Write { grid, key, value, timestamp }) => {
                                    if let Some(grids) = apply_write(
                                        store, timeline, clock.now_ms(),
                                        grid, &key, value, timestamp,
                                    ) {
                                        let _ = broadcaster
                                            .publish(&ServerEvent::Snapshot { grids });
                                    }
                                }
                                Ok(ClientOp::Clear) => {
                                    // Allowed in any phase.
                                    let grids = store.reset();
                                    log::info!("board cleared by session {session_id}");
                                    let _ = broadcaster
                                        .publish(&ServerEvent::RoundReset { grids });
                                }
                                Ok(ClientOp::RequestSnapshot) => {
                                    let frame = ServerEvent::Snapshot {
                                        grids: store.snapshot(),
                                    }
                                    .encode()?;
                                    ws_sender.send(Message::Binary(frame.into())).await?;
                                }
                                Ok(ClientOp::Ping) => {
                                    let frame = ServerEvent::Pong.encode()?;
                                    ws_sender.send(Message::Binary(frame.into())).await?;
                                }
                                Err(e) => {
                                    // Malformed ops never propagate to other sessions.
                                    log::warn!("undecodable frame from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("session {session_id} closed");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing broadcast frame
                frame = rx.recv() => {
                    match frame {
                        Ok(data) => {
                            if ws_sender
                                .send(Message::Binary(data.to_vec().into()))
                                .await
                                .is_err()
                            {
                                // Failed session: drop it, never retry inline.
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            // The next full snapshot resynchronizes it.
                            log::warn!("session {session_id} lagged by {n} frames");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }
}

/// Ticker/driver task ownership; aborting on drop keeps no timer alive
/// past the server loop.
struct TaskGuard(Vec<tokio::task::JoinHandle<()>>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Apply a write op under the phase gate.
///
/// Returns the snapshot to broadcast when the write landed. Draws during
/// rest are dropped outright (not deferred) with stale-write semantics:
/// no effect, no error.
fn apply_write(
    store: &StateStore,
    timeline: RoundTimeline,
    now_ms: u64,
    grid: u32,
    key: &str,
    value: i64,
    timestamp: u64,
) -> Option<Vec<Grid>> {
    if timeline.phase_at(now_ms) == Phase::Rest {
        log::debug!("ignoring draw during rest: grid {grid} key {key:?}");
        return None;
    }
    match store.apply(grid as usize, key, value, timestamp) {
        WriteOutcome::Applied => Some(store.snapshot()),
        WriteOutcome::Unchanged => None,
        WriteOutcome::Rejected(reason) => {
            log::debug!("write rejected: {reason}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mural_core::WHITE;

    fn small_config() -> ServerConfig {
        ServerConfig {
            specs: vec![GridSpec::pixel_face("face-0", 20, 20, 10)],
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.round.active_ms, 270_000);
        assert_eq!(config.round.rest_ms, 30_000);
        assert_eq!(config.specs.len(), 7);
        assert!(config.export_dir.is_none());
    }

    #[test]
    fn test_server_creation() {
        let server = BoardServer::new(small_config());
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
        assert_eq!(server.store().grid_count(), 1);
        assert!(server.exporter.is_none());
    }

    #[test]
    fn test_server_with_export_dir_builds_exporter() {
        let config = ServerConfig {
            export_dir: Some("/tmp/mural-test-exports".into()),
            ..small_config()
        };
        let server = BoardServer::new(config);
        assert!(server.exporter.is_some());
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = BoardServer::new(small_config());
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_ops, 0);
        assert_eq!(stats.rounds_completed, 0);
    }

    #[test]
    fn test_apply_write_during_active() {
        let store = StateStore::new(vec![GridSpec::pixel_face("face-0", 20, 20, 10)]);
        let timeline = RoundTimeline::new(RoundConfig::default());

        // 100 s into the cycle: active window.
        let grids = apply_write(&store, timeline, 100_000, 0, "pixel-0-0", 0xFF0000, 5);
        assert!(grids.is_some());
        assert_eq!(
            grids.unwrap()[0].get("pixel-0-0").unwrap().value,
            0xFF0000
        );
    }

    #[test]
    fn test_apply_write_rejected_during_rest() {
        let store = StateStore::new(vec![GridSpec::pixel_face("face-0", 20, 20, 10)]);
        let timeline = RoundTimeline::new(RoundConfig::default());

        // 275 s into the cycle: rest window. Dropped outright.
        let grids = apply_write(&store, timeline, 275_000, 0, "pixel-0-0", 0xFF0000, 5);
        assert!(grids.is_none());
        assert_eq!(store.snapshot()[0].get("pixel-0-0").unwrap().value, WHITE);
    }

    #[test]
    fn test_apply_write_stale_no_broadcast() {
        let store = StateStore::new(vec![GridSpec::pixel_face("face-0", 20, 20, 10)]);
        let timeline = RoundTimeline::new(RoundConfig::default());

        assert!(apply_write(&store, timeline, 1_000, 0, "pixel-0-0", 0xFF0000, 5).is_some());
        // Older stamp: no effect, no broadcast.
        assert!(apply_write(&store, timeline, 2_000, 0, "pixel-0-0", 0x0000FF, 3).is_none());
        assert_eq!(store.snapshot()[0].get("pixel-0-0").unwrap().value, 0xFF0000);
    }

    #[test]
    fn test_apply_write_unknown_grid_no_broadcast() {
        let store = StateStore::new(vec![GridSpec::pixel_face("face-0", 20, 20, 10)]);
        let timeline = RoundTimeline::new(RoundConfig::default());
        assert!(apply_write(&store, timeline, 1_000, 99, "pixel-0-0", 0xFF0000, 5).is_none());
    }

    #[test]
    fn test_apply_write_idempotent_no_rebroadcast() {
        let store = StateStore::new(vec![GridSpec::pixel_face("face-0", 20, 20, 10)]);
        let timeline = RoundTimeline::new(RoundConfig::default());

        assert!(apply_write(&store, timeline, 1_000, 0, "pixel-0-0", 0xFF0000, 5).is_some());
        // Exact duplicate: accepted upstream as a no-op, nothing to send.
        assert!(apply_write(&store, timeline, 1_000, 0, "pixel-0-0", 0xFF0000, 5).is_none());
    }
}
