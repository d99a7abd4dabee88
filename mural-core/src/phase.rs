//! Wall-clock-driven phase scheduling.
//!
//! The board alternates a write-accepting `active` window and a
//! read-only `rest` window. Phase and remaining time are pure functions
//! of wall-clock time modulo the cycle length, never of
//! elapsed-since-start counters, so independent server processes agree
//! on the phase without coordination, provided their clocks are
//! synchronized.
//!
//! ```text
//! |──────────── active (270 s) ────────────|── rest (30 s) ──|
//! 0                                    active_ms          cycle_ms
//!          phase_at(now) = f(now % cycle_ms)
//! ```
//!
//! The scheduler itself owns no timer: a caller drives [`PhaseScheduler::tick`]
//! at ≥1 Hz and reacts to the edge-triggered transitions it returns.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Read-only source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Which window the board is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Writes accepted.
    Active,
    /// Read-only; the round's snapshot is exported during this window.
    Rest,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Active => write!(f, "active"),
            Phase::Rest => write!(f, "rest"),
        }
    }
}

/// Durations of the two windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundConfig {
    pub active_ms: u64,
    pub rest_ms: u64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            active_ms: 270_000, // 4.5 minutes
            rest_ms: 30_000,
        }
    }
}

impl RoundConfig {
    pub fn cycle_ms(&self) -> u64 {
        self.active_ms + self.rest_ms
    }
}

/// Pure phase arithmetic over wall-clock instants.
///
/// The cycle is anchored to Unix-epoch milliseconds modulo
/// `active_ms + rest_ms`; the rest window is the final `rest_ms` of each
/// cycle. With the default 270 s + 30 s this lands on UTC 5-minute
/// boundaries.
#[derive(Debug, Clone, Copy)]
pub struct RoundTimeline {
    config: RoundConfig,
}

impl RoundTimeline {
    pub fn new(config: RoundConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> RoundConfig {
        self.config
    }

    /// Phase at the given instant. `rest_ms = 0` degenerates to
    /// always-active.
    pub fn phase_at(&self, now_ms: u64) -> Phase {
        let cycle = self.config.cycle_ms();
        if cycle == 0 {
            return Phase::Active;
        }
        let elapsed = now_ms % cycle;
        if cycle - elapsed <= self.config.rest_ms {
            Phase::Rest
        } else {
            Phase::Active
        }
    }

    /// Milliseconds until the NEXT phase transition. Always non-negative;
    /// wraps at 0 into the next cycle.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        let cycle = self.config.cycle_ms();
        if cycle == 0 {
            return 0;
        }
        let elapsed = now_ms % cycle;
        match self.phase_at(now_ms) {
            Phase::Active => self.config.active_ms - elapsed,
            Phase::Rest => cycle - elapsed,
        }
    }
}

/// An observed phase edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
}

/// Edge-triggered phase observer.
///
/// `tick()` recomputes the phase from the injected [`Clock`] and reports
/// each transition exactly once. The first tick establishes the baseline
/// and never reports: a process starting mid-round must not fire a
/// spurious reset.
pub struct PhaseScheduler {
    timeline: RoundTimeline,
    clock: Arc<dyn Clock>,
    last: Option<Phase>,
}

impl PhaseScheduler {
    pub fn new(config: RoundConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            timeline: RoundTimeline::new(config),
            clock,
            last: None,
        }
    }

    pub fn timeline(&self) -> RoundTimeline {
        self.timeline
    }

    /// Current phase, independent of tick history.
    pub fn phase(&self) -> Phase {
        self.timeline.phase_at(self.clock.now_ms())
    }

    /// Milliseconds to the next transition, independent of tick history.
    pub fn remaining_ms(&self) -> u64 {
        self.timeline.remaining_ms(self.clock.now_ms())
    }

    /// Recompute the phase; `Some` exactly once per observed edge.
    pub fn tick(&mut self) -> Option<PhaseTransition> {
        let current = self.phase();
        match self.last {
            None => {
                self.last = Some(current);
                None
            }
            Some(previous) if previous != current => {
                self.last = Some(current);
                log::info!("phase transition: {previous} -> {current}");
                Some(PhaseTransition {
                    from: previous,
                    to: current,
                })
            }
            Some(_) => None,
        }
    }
}
