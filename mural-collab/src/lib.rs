//! # mural-collab — real-time collaboration layer for the mural board
//!
//! WebSocket multiplayer editing over the `mural-core` engine: every
//! session sees the same grids, conflicts resolve per-cell by
//! last-write-wins, and a wall-clock phase cycle alternates drawing
//! windows with export/rest windows.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ BoardClient │ ◄─────────────────► │ BoardServer │
//! │ (per user)  │    Binary Proto     │ (central)   │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                          ┌─────────────────┼─────────────────┐
//!                          ▼                 ▼                 ▼
//!                    ┌───────────┐    ┌─────────────┐   ┌──────────────┐
//!                    │ StateStore│    │ Broadcaster │   │ MeshExporter │
//!                    │ (LWW)     │    │ (fan-out)   │   │ (per round)  │
//!                    └───────────┘    └─────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded op/event enums)
//! - [`broadcast`] — Session registry and full-state fan-out
//! - [`server`] — WebSocket board server with phase ticker + round driver
//! - [`client`] — WebSocket board client with offline draw queue
//! - [`export`] — Per-round snapshot artifacts (LZ4 + manifest)

pub mod broadcast;
pub mod client;
pub mod export;
pub mod protocol;
pub mod server;

// Re-exports for convenience
pub use broadcast::{BroadcastStats, Broadcaster, SessionInfo};
pub use client::{BoardClient, BoardEvent, ConnectionState, OfflineQueue};
pub use export::{
    decode_artifact, flatten, ExportError, ExportManifest, FlatGrid, MeshArtifact, MeshExporter,
    SnapshotExporter,
};
pub use protocol::{ClientOp, ProtocolError, ServerEvent};
pub use server::{BoardServer, ServerConfig, ServerStats};
