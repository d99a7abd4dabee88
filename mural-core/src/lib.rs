//! # mural-core — replicated shared-state engine
//!
//! Transport-free core of the mural board: the grid data model, the
//! last-write-wins [`StateStore`], and the wall-clock-driven
//! [`PhaseScheduler`]. The collaboration layer (`mural-collab`) wires
//! these to WebSocket sessions; nothing in this crate knows about
//! sockets or serde wire formats beyond deriving `Serialize`.

pub mod grid;
pub mod phase;
pub mod store;

pub use grid::{default_board, Cell, Grid, GridSpec, NO_NOTE, WHITE};
pub use phase::{
    Clock, Phase, PhaseScheduler, PhaseTransition, RoundConfig, RoundTimeline, SystemClock,
};
pub use store::{RejectReason, StateStore, WriteOutcome};
