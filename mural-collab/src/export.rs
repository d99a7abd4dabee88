//! Round snapshot export.
//!
//! At each active->rest transition the round driver hands the frozen
//! board snapshot to a [`SnapshotExporter`], which derives an artifact
//! and returns a reference to it. The stock [`MeshExporter`] flattens
//! every grid to value-only cells in deterministic key order (the
//! texture data a mesh builder or image encoder consumes), LZ4-compresses
//! the encoded set, and writes it next to a small JSON manifest:
//!
//! ```text
//! snapshot ──► flatten ──► bincode ──► LZ4 ──► round-{seq}.mural
//!                                         └──► round-{seq}.json (manifest)
//! ```
//!
//! Export is strictly read-only over the snapshot: it never touches the
//! store and its failure never blocks the next round's reset.

use mural_core::{Clock, Grid, SystemClock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Derives a per-round artifact from a frozen snapshot.
///
/// Called once per round, after the scheduler enters `rest` and before
/// the store is cleared. Implementations must not block on the store.
pub trait SnapshotExporter: Send + Sync {
    /// Produce the artifact; the returned string locates it.
    fn export(&self, snapshot: &[Grid]) -> Result<String, ExportError>;
}

/// Export failures. Non-fatal to the core: reported, never propagated
/// into the phase machinery.
#[derive(Debug, Clone)]
pub enum ExportError {
    Io(String),
    Encode(String),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Export I/O error: {e}"),
            Self::Encode(e) => write!(f, "Export encode error: {e}"),
        }
    }
}

impl std::error::Error for ExportError {}

/// One grid flattened for export: values only, deterministic key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatGrid {
    pub name: String,
    /// `(key, value)` pairs sorted by key; timestamps are CRDT metadata
    /// and do not survive into the artifact.
    pub cells: Vec<(String, i64)>,
}

/// The export payload: one face per grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshArtifact {
    pub faces: Vec<FlatGrid>,
}

/// Sidecar manifest written next to each artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub artifact: String,
    pub grid_count: usize,
    pub cell_count: usize,
    pub original_bytes: usize,
    pub compressed_bytes: usize,
    pub created_at_ms: u64,
}

/// Flatten a snapshot into its export form.
pub fn flatten(snapshot: &[Grid], names: &[String]) -> MeshArtifact {
    let faces = snapshot
        .iter()
        .enumerate()
        .map(|(i, grid)| {
            let mut cells: Vec<(String, i64)> = grid
                .cells
                .iter()
                .map(|(key, cell)| (key.clone(), cell.value))
                .collect();
            cells.sort_by(|a, b| a.0.cmp(&b.0));
            FlatGrid {
                name: names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("grid-{i}")),
                cells,
            }
        })
        .collect();
    MeshArtifact { faces }
}

/// Decode an artifact file's bytes back into a [`MeshArtifact`].
pub fn decode_artifact(bytes: &[u8]) -> Result<MeshArtifact, ExportError> {
    let decompressed = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| ExportError::Encode(e.to_string()))?;
    let (artifact, _) =
        bincode::serde::decode_from_slice(&decompressed, bincode::config::standard())
            .map_err(|e| ExportError::Encode(e.to_string()))?;
    Ok(artifact)
}

/// The stock exporter: compressed flattened textures plus a manifest.
pub struct MeshExporter {
    out_dir: PathBuf,
    face_names: Vec<String>,
    seq: AtomicU64,
}

impl MeshExporter {
    pub fn new(out_dir: impl Into<PathBuf>, face_names: Vec<String>) -> Self {
        Self {
            out_dir: out_dir.into(),
            face_names,
            seq: AtomicU64::new(0),
        }
    }

    pub fn out_dir(&self) -> &PathBuf {
        &self.out_dir
    }
}

impl SnapshotExporter for MeshExporter {
    fn export(&self, snapshot: &[Grid]) -> Result<String, ExportError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);

        let artifact = flatten(snapshot, &self.face_names);
        let encoded = bincode::serde::encode_to_vec(&artifact, bincode::config::standard())
            .map_err(|e| ExportError::Encode(e.to_string()))?;
        let compressed = lz4_flex::compress_prepend_size(&encoded);

        std::fs::create_dir_all(&self.out_dir).map_err(|e| ExportError::Io(e.to_string()))?;

        let file_name = format!("round-{seq}.mural");
        let path = self.out_dir.join(&file_name);
        std::fs::write(&path, &compressed).map_err(|e| ExportError::Io(e.to_string()))?;

        let manifest = ExportManifest {
            artifact: file_name,
            grid_count: artifact.faces.len(),
            cell_count: artifact.faces.iter().map(|f| f.cells.len()).sum(),
            original_bytes: encoded.len(),
            compressed_bytes: compressed.len(),
            created_at_ms: SystemClock.now_ms(),
        };
        let manifest_json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| ExportError::Encode(e.to_string()))?;
        let manifest_path = self.out_dir.join(format!("round-{seq}.json"));
        std::fs::write(&manifest_path, manifest_json)
            .map_err(|e| ExportError::Io(e.to_string()))?;

        log::info!(
            "exported round artifact {} ({} grids, {} -> {} bytes)",
            path.display(),
            manifest.grid_count,
            manifest.original_bytes,
            manifest.compressed_bytes
        );
        Ok(path.display().to_string())
    }
}
