//! Grid data model: cells, fixed key universes, the stock board layout.
//!
//! A grid is a flat mapping from string key to `(value, timestamp)`.
//! Membership is fixed at construction from a [`GridSpec`]: writes can
//! only overwrite existing cells, never add or remove keys. Values are
//! plain `i64`: a 24-bit RGB color for canvas faces, a note number (or
//! [`NO_NOTE`]) for the sheet.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Round-initial color for canvas cells (white).
pub const WHITE: i64 = 0xFF_FFFF;

/// Round-initial value for note slots ("no note").
pub const NO_NOTE: i64 = -1;

/// One addressable slot of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub value: i64,
    /// Writer-supplied instant; only its ordering matters.
    pub timestamp: u64,
}

impl Cell {
    pub fn new(value: i64, timestamp: u64) -> Self {
        Self { value, timestamp }
    }
}

/// A grid's fixed key universe plus its round-initial value.
///
/// A `GridSpec` is immutable for the lifetime of the store; resets
/// rebuild every grid from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSpec {
    pub name: String,
    pub keys: Vec<String>,
    pub initial_value: i64,
}

impl GridSpec {
    /// A pixel canvas face: keys `pixel-{x}-{y}` for coordinates stepping
    /// by `cell_px` across a `width`×`height` area, white-initial.
    pub fn pixel_face(name: impl Into<String>, width: u32, height: u32, cell_px: u32) -> Self {
        let step = cell_px.max(1);
        let mut keys = Vec::new();
        let mut x = 0;
        while x < width {
            let mut y = 0;
            while y < height {
                keys.push(format!("pixel-{x}-{y}"));
                y += step;
            }
            x += step;
        }
        Self {
            name: name.into(),
            keys,
            initial_value: WHITE,
        }
    }

    /// A note sequence: keys `slot-{i}` for `i` in `[0, slots)`, each
    /// starting empty.
    pub fn note_row(name: impl Into<String>, slots: u32) -> Self {
        Self {
            name: name.into(),
            keys: (0..slots).map(|i| format!("slot-{i}")).collect(),
            initial_value: NO_NOTE,
        }
    }

    /// Build a fresh grid with every key at the initial value, timestamp 0.
    ///
    /// Timestamp 0 means any client write wins the first conflict.
    pub fn blank_grid(&self) -> Grid {
        Grid {
            cells: self
                .keys
                .iter()
                .map(|k| (k.clone(), Cell::new(self.initial_value, 0)))
                .collect(),
        }
    }

    /// Number of keys in this grid's universe.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// The stock board: six 200×200 canvas faces (10px cells) and one
/// 64-slot note sheet.
pub fn default_board() -> Vec<GridSpec> {
    let mut specs: Vec<GridSpec> = (0..6)
        .map(|i| GridSpec::pixel_face(format!("face-{i}"), 200, 200, 10))
        .collect();
    specs.push(GridSpec::note_row("sheet", 64));
    specs
}

/// A live grid: key → cell. Key set never changes between resets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    pub cells: HashMap<String, Cell>,
}

impl Grid {
    pub fn get(&self, key: &str) -> Option<&Cell> {
        self.cells.get(key)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_face_key_universe() {
        let spec = GridSpec::pixel_face("face-0", 200, 200, 10);
        // 20 × 20 cells
        assert_eq!(spec.len(), 400);
        assert!(spec.keys.contains(&"pixel-0-0".to_string()));
        assert!(spec.keys.contains(&"pixel-190-190".to_string()));
        assert!(!spec.keys.contains(&"pixel-200-0".to_string()));
        assert_eq!(spec.initial_value, WHITE);
    }

    #[test]
    fn test_note_row_key_universe() {
        let spec = GridSpec::note_row("sheet", 64);
        assert_eq!(spec.len(), 64);
        assert!(spec.keys.contains(&"slot-0".to_string()));
        assert!(spec.keys.contains(&"slot-63".to_string()));
        assert_eq!(spec.initial_value, NO_NOTE);
    }

    #[test]
    fn test_blank_grid_all_initial() {
        let spec = GridSpec::pixel_face("face-0", 20, 20, 10);
        let grid = spec.blank_grid();
        assert_eq!(grid.len(), 4);
        for key in &spec.keys {
            let cell = grid.get(key).unwrap();
            assert_eq!(cell.value, WHITE);
            assert_eq!(cell.timestamp, 0);
        }
    }

    #[test]
    fn test_default_board_layout() {
        let board = default_board();
        assert_eq!(board.len(), 7);
        assert_eq!(board[0].name, "face-0");
        assert_eq!(board[5].name, "face-5");
        assert_eq!(board[6].name, "sheet");
        assert_eq!(board[0].len(), 400);
        assert_eq!(board[6].len(), 64);
    }

    #[test]
    fn test_pixel_face_degenerate_step() {
        // cell_px of 0 must not loop forever; it clamps to 1.
        let spec = GridSpec::pixel_face("tiny", 2, 2, 0);
        assert_eq!(spec.len(), 4);
    }
}
