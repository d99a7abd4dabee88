//! Last-write-wins state store.
//!
//! One store holds every grid of the board. A write lands only if its
//! timestamp is strictly greater than the stored cell's; equal
//! timestamps are rejected, so the winner of any concurrent pair is
//! deterministic given distinct stamps. The store keeps no history: it
//! is a set of LWW registers, not a log.
//!
//! Reference: Kleppmann — Designing Data-Intensive Applications, Chapter 5

use crate::grid::{Grid, GridSpec};
use std::sync::RwLock;

/// Result of [`StateStore::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The cell was overwritten; broadcast the new state.
    Applied,
    /// Identical value + timestamp re-applied; accepted, nothing to do.
    Unchanged,
    /// The write had no effect on the store.
    Rejected(RejectReason),
}

/// Why a write was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Grid index outside the board.
    UnknownGrid(usize),
    /// Key not in the grid's fixed universe.
    UnknownKey(String),
    /// Candidate timestamp not strictly greater than the stored one.
    /// Routine under concurrent editing, not an error.
    Stale { stored: u64, candidate: u64 },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::UnknownGrid(index) => write!(f, "unknown grid index {index}"),
            RejectReason::UnknownKey(key) => write!(f, "key {key:?} not in grid"),
            RejectReason::Stale { stored, candidate } => {
                write!(f, "stale write: stored ts {stored} >= candidate ts {candidate}")
            }
        }
    }
}

/// The single shared mutable resource of the board.
///
/// All access is serialized through one `RwLock`; `snapshot` is
/// copy-on-read, and `reset` swaps every grid atomically so a concurrent
/// write lands wholly before or wholly after it.
pub struct StateStore {
    specs: Vec<GridSpec>,
    grids: RwLock<Vec<Grid>>,
}

impl StateStore {
    /// Build one grid per spec, every cell at its round-initial value.
    pub fn new(specs: Vec<GridSpec>) -> Self {
        let grids = specs.iter().map(GridSpec::blank_grid).collect();
        Self {
            specs,
            grids: RwLock::new(grids),
        }
    }

    /// Apply a write under the LWW rule.
    ///
    /// Rejected when the grid index is out of range, the key is not a
    /// member of the grid, or the stored timestamp is >= the candidate's.
    /// Re-applying an identical `(value, timestamp)` pair returns
    /// [`WriteOutcome::Unchanged`]: accepted, no broadcast needed.
    pub fn apply(&self, grid_index: usize, key: &str, value: i64, timestamp: u64) -> WriteOutcome {
        let mut grids = match self.grids.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        let grid = match grids.get_mut(grid_index) {
            Some(grid) => grid,
            None => {
                log::debug!("rejected write: unknown grid {grid_index}");
                return WriteOutcome::Rejected(RejectReason::UnknownGrid(grid_index));
            }
        };

        let cell = match grid.cells.get_mut(key) {
            Some(cell) => cell,
            None => {
                log::debug!("rejected write: key {key:?} not in grid {grid_index}");
                return WriteOutcome::Rejected(RejectReason::UnknownKey(key.to_string()));
            }
        };

        if cell.timestamp == timestamp && cell.value == value {
            return WriteOutcome::Unchanged;
        }
        if cell.timestamp >= timestamp {
            return WriteOutcome::Rejected(RejectReason::Stale {
                stored: cell.timestamp,
                candidate: timestamp,
            });
        }

        cell.value = value;
        cell.timestamp = timestamp;
        WriteOutcome::Applied
    }

    /// Immutable full copy of all grids, for broadcast and export.
    pub fn snapshot(&self) -> Vec<Grid> {
        let grids = match self.grids.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        grids.clone()
    }

    /// Replace every grid with its round-initial contents.
    ///
    /// Returns the fresh snapshot so the caller can broadcast it without
    /// a second lock acquisition.
    pub fn reset(&self) -> Vec<Grid> {
        let fresh: Vec<Grid> = self.specs.iter().map(GridSpec::blank_grid).collect();
        let mut grids = match self.grids.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *grids = fresh.clone();
        fresh
    }

    pub fn grid_count(&self) -> usize {
        self.specs.len()
    }

    pub fn specs(&self) -> &[GridSpec] {
        &self.specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridSpec, WHITE};

    fn small_store() -> StateStore {
        StateStore::new(vec![
            GridSpec::pixel_face("face-0", 20, 20, 10),
            GridSpec::note_row("sheet", 4),
        ])
    }

    #[test]
    fn test_apply_newer_wins() {
        let store = small_store();
        assert_eq!(store.apply(0, "pixel-0-0", 0xFF0000, 5), WriteOutcome::Applied);

        let snap = store.snapshot();
        let cell = snap[0].get("pixel-0-0").unwrap();
        assert_eq!(cell.value, 0xFF0000);
        assert_eq!(cell.timestamp, 5);
    }

    #[test]
    fn test_apply_stale_rejected() {
        let store = small_store();
        assert_eq!(store.apply(0, "pixel-0-0", 0xFF0000, 5), WriteOutcome::Applied);
        // Older write arriving late loses.
        assert_eq!(
            store.apply(0, "pixel-0-0", 0x0000FF, 3),
            WriteOutcome::Rejected(RejectReason::Stale { stored: 5, candidate: 3 })
        );

        let snap = store.snapshot();
        assert_eq!(snap[0].get("pixel-0-0").unwrap().value, 0xFF0000);
    }

    #[test]
    fn test_equal_timestamp_rejected() {
        let store = small_store();
        assert_eq!(store.apply(0, "pixel-0-0", 0xFF0000, 5), WriteOutcome::Applied);
        // Tie with a different value is rejected, no flip-flop.
        assert_eq!(
            store.apply(0, "pixel-0-0", 0x00FF00, 5),
            WriteOutcome::Rejected(RejectReason::Stale { stored: 5, candidate: 5 })
        );
        assert_eq!(store.snapshot()[0].get("pixel-0-0").unwrap().value, 0xFF0000);
    }

    #[test]
    fn test_idempotent_reapply() {
        let store = small_store();
        assert_eq!(store.apply(0, "pixel-0-0", 0xFF0000, 5), WriteOutcome::Applied);
        assert_eq!(store.apply(0, "pixel-0-0", 0xFF0000, 5), WriteOutcome::Unchanged);
        assert_eq!(store.snapshot()[0].get("pixel-0-0").unwrap().value, 0xFF0000);
    }

    #[test]
    fn test_convergence_order_independent() {
        // Same writes in different orders end in the same state.
        let writes = [
            (0xFF0000i64, 7u64),
            (0x00FF00, 3),
            (0x0000FF, 9),
            (0x123456, 1),
        ];

        let forward = small_store();
        for (value, ts) in writes {
            let _ = forward.apply(0, "pixel-10-10", value, ts);
        }

        let reversed = small_store();
        for (value, ts) in writes.iter().rev() {
            let _ = reversed.apply(0, "pixel-10-10", *value, *ts);
        }

        let a = forward.snapshot()[0].get("pixel-10-10").copied().unwrap();
        let b = reversed.snapshot()[0].get("pixel-10-10").copied().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.value, 0x0000FF); // max timestamp wins
        assert_eq!(a.timestamp, 9);
    }

    #[test]
    fn test_monotonicity() {
        let store = small_store();
        let _ = store.apply(1, "slot-2", 60, 100);
        for ts in 0..=100 {
            assert!(matches!(
                store.apply(1, "slot-2", 42, ts),
                WriteOutcome::Rejected(_)
            ));
        }
        assert_eq!(store.snapshot()[1].get("slot-2").unwrap().value, 60);
    }

    #[test]
    fn test_unknown_grid_rejected() {
        let store = small_store();
        assert_eq!(
            store.apply(99, "pixel-0-0", 0xFF0000, 5),
            WriteOutcome::Rejected(RejectReason::UnknownGrid(99))
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let store = small_store();
        assert_eq!(
            store.apply(0, "pixel-5-5", 0xFF0000, 5),
            WriteOutcome::Rejected(RejectReason::UnknownKey("pixel-5-5".into()))
        );
        // Membership is fixed: the bogus key was not inserted.
        assert!(store.snapshot()[0].get("pixel-5-5").is_none());
    }

    #[test]
    fn test_reset_completeness() {
        let store = small_store();
        let _ = store.apply(0, "pixel-0-0", 0xFF0000, 5);
        let _ = store.apply(0, "pixel-10-10", 0x00FF00, 6);
        let _ = store.apply(1, "slot-0", 60, 7);

        let fresh = store.reset();
        for (grid, spec) in fresh.iter().zip(store.specs()) {
            assert_eq!(grid.len(), spec.len());
            for key in &spec.keys {
                let cell = grid.get(key).unwrap();
                assert_eq!(cell.value, spec.initial_value);
                assert_eq!(cell.timestamp, 0);
            }
        }
        // And the live store agrees with the returned snapshot.
        assert_eq!(store.snapshot(), fresh);
    }

    #[test]
    fn test_write_after_reset_wins() {
        let store = small_store();
        let _ = store.apply(0, "pixel-0-0", 0xFF0000, 5);
        store.reset();
        // Reset zeroes timestamps, so even an old stamp lands again.
        assert_eq!(store.apply(0, "pixel-0-0", 0x0000FF, 1), WriteOutcome::Applied);
    }

    #[test]
    fn test_snapshot_is_copy() {
        let store = small_store();
        let before = store.snapshot();
        let _ = store.apply(0, "pixel-0-0", 0xFF0000, 5);
        // The earlier snapshot is unaffected by later writes.
        assert_eq!(before[0].get("pixel-0-0").unwrap().value, WHITE);
    }

    #[test]
    fn test_concurrent_writers_converge() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(small_store());
        let mut handles = Vec::new();
        for worker in 0..8u64 {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                for ts in 1..=50u64 {
                    let _ = store.apply(0, "pixel-0-0", worker as i64, ts);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Exactly one winner: the cell holds ts 50 and one worker's value.
        let cell = store.snapshot()[0].get("pixel-0-0").copied().unwrap();
        assert_eq!(cell.timestamp, 50);
        assert!((0..8).contains(&cell.value));
    }
}
