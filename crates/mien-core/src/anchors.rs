//! BlazeFace anchor table.
//!
//! The detector predicts offsets relative to 896 fixed reference boxes. Row `i`
//! of every raw output belongs to anchor `i`, so the table order is part of the
//! model contract. The table is built once and never mutated.

use crate::decoder::DetectorVariant;
use std::path::Path;
use thiserror::Error;

/// Number of anchors (and raw detector rows) for both BlazeFace variants.
pub const NUM_ANCHORS: usize = 896;

/// SSD anchor offset within a feature-map cell.
const ANCHOR_OFFSET: f32 = 0.5;

#[derive(Error, Debug)]
pub enum AnchorError {
    #[error("anchor table not found: {0}")]
    NotFound(String),
    #[error("reading anchor table {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing anchor table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("reading .npy anchor table: {0}")]
    Npy(String),
    #[error("unexpected anchor table shape: {rows} rows, row {row} has {cols} values (expected 896×4)")]
    Shape { rows: usize, row: usize, cols: usize },
}

/// Reference box in normalized `[0, 1]` image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

/// Ordered, immutable set of exactly [`NUM_ANCHORS`] anchors.
#[derive(Debug, Clone)]
pub struct AnchorTable {
    anchors: Vec<Anchor>,
}

impl AnchorTable {
    /// Build the table from raw `[cx, cy, w, h]` rows, rejecting any other shape.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, AnchorError> {
        if rows.len() != NUM_ANCHORS {
            return Err(AnchorError::Shape {
                rows: rows.len(),
                row: 0,
                cols: rows.first().map_or(0, Vec::len),
            });
        }
        let mut anchors = Vec::with_capacity(NUM_ANCHORS);
        for (i, row) in rows.iter().enumerate() {
            let &[cx, cy, w, h] = row.as_slice() else {
                return Err(AnchorError::Shape {
                    rows: rows.len(),
                    row: i,
                    cols: row.len(),
                });
            };
            anchors.push(Anchor { cx, cy, w, h });
        }
        Ok(Self { anchors })
    }

    /// Load a persisted table of `[cx, cy, w, h]` rows.
    ///
    /// Files ending in `.npy` are read as a `float32` or `float64` NumPy array
    /// of shape `(896, 4)`; anything else is parsed as a JSON array of rows.
    pub fn load(path: &Path) -> Result<Self, AnchorError> {
        if !path.exists() {
            return Err(AnchorError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read(path).map_err(|source| AnchorError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let rows = if path.extension().is_some_and(|ext| ext == "npy") {
            npy_rows(&raw)?
        } else {
            serde_json::from_slice::<Vec<Vec<f32>>>(&raw)?
        };
        let table = Self::from_rows(&rows)?;
        tracing::info!(path = %path.display(), anchors = table.len(), "loaded anchor table");
        Ok(table)
    }

    /// Generate the SSD anchors BlazeFace was trained with.
    ///
    /// Four layers whose later three share a stride; layers with the same
    /// stride collapse into one grid with two anchors per layer per cell.
    /// All anchors have unit size.
    pub fn generate(variant: DetectorVariant) -> Self {
        let input_size = variant.input_size() as usize;
        let strides = variant.anchor_strides();

        let mut anchors = Vec::with_capacity(NUM_ANCHORS);
        let mut layer = 0;
        while layer < strides.len() {
            let stride = strides[layer];
            let mut same_stride = 0;
            while layer < strides.len() && strides[layer] == stride {
                same_stride += 1;
                layer += 1;
            }
            let per_cell = same_stride * 2;

            let grid = input_size.div_ceil(stride);
            for y in 0..grid {
                for x in 0..grid {
                    let cx = (x as f32 + ANCHOR_OFFSET) / grid as f32;
                    let cy = (y as f32 + ANCHOR_OFFSET) / grid as f32;
                    for _ in 0..per_cell {
                        anchors.push(Anchor { cx, cy, w: 1.0, h: 1.0 });
                    }
                }
            }
        }

        debug_assert_eq!(anchors.len(), NUM_ANCHORS);
        Self { anchors }
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Anchor> {
        self.anchors.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.iter()
    }
}

fn npy_rows(bytes: &[u8]) -> Result<Vec<Vec<f32>>, AnchorError> {
    let npy_err = |e: std::io::Error| AnchorError::Npy(e.to_string());
    let npy = npyz::NpyFile::new(bytes).map_err(npy_err)?;
    let cols = match npy.shape() {
        &[rows, cols] if rows as usize == NUM_ANCHORS => cols as usize,
        shape => return Err(AnchorError::Npy(format!("expected shape (896, 4), got {shape:?}"))),
    };
    if cols == 0 {
        return Err(AnchorError::Shape { rows: NUM_ANCHORS, row: 0, cols });
    }
    let values: Vec<f32> = match npy.into_vec::<f32>() {
        Ok(values) => values,
        // float64 tables are narrowed; any other dtype fails here
        Err(_) => npyz::NpyFile::new(bytes)
            .and_then(|npy| npy.into_vec::<f64>())
            .map_err(npy_err)?
            .into_iter()
            .map(|v| v as f32)
            .collect(),
    };
    Ok(values.chunks(cols).map(<[f32]>::to_vec).collect())
}
