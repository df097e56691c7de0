//! BlazeFace anchor decoding and score filtering.
//!
//! Raw detector rows hold 16 offsets per anchor: box center (x, y), box size
//! (w, h) and six keypoint (x, y) pairs, all in detector-input pixel units.
//! Decoding maps them into normalized image fractions; scores go through a
//! clipped sigmoid and a confidence cut before suppression ever sees them.

use crate::anchors::AnchorTable;
use crate::types::NUM_KEYPOINTS;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Values per raw/decoded row: 4 box values + 6 keypoints × 2.
pub const ROW_WIDTH: usize = 4 + NUM_KEYPOINTS * 2;

/// Raw logits are clipped to ±this before the sigmoid.
const SCORE_CLIPPING_THRESHOLD: f32 = 100.0;

/// Default IoU threshold for weighted suppression (both variants).
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug, PartialEq)]
pub enum DecodeError {
    #[error("raw boxes have shape {rows}×{cols}, expected {anchors}×{ROW_WIDTH}", ROW_WIDTH = ROW_WIDTH)]
    BoxShape { rows: usize, cols: usize, anchors: usize },
    #[error("got {scores} scores for {rows} box rows")]
    ScoreCount { scores: usize, rows: usize },
}

/// BlazeFace model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorVariant {
    /// Front-camera model, 128×128 input.
    #[default]
    Front,
    /// Back-camera model, 256×256 input.
    Back,
}

impl DetectorVariant {
    /// Square model input side in pixels.
    pub fn input_size(self) -> u32 {
        match self {
            Self::Front => 128,
            Self::Back => 256,
        }
    }

    /// Divisor applied to raw offsets on every axis.
    pub fn scale(self) -> f32 {
        self.input_size() as f32
    }

    pub fn default_score_threshold(self) -> f32 {
        match self {
            Self::Front => 0.25,
            Self::Back => 0.65,
        }
    }

    pub fn default_nms_threshold(self) -> f32 {
        DEFAULT_NMS_THRESHOLD
    }

    /// SSD layer strides used to generate this variant's anchors.
    pub fn anchor_strides(self) -> [usize; 4] {
        match self {
            Self::Front => [8, 16, 16, 16],
            Self::Back => [16, 32, 32, 32],
        }
    }
}

/// A decoded, above-threshold detection awaiting suppression.
///
/// `coords` is `[ymin, xmin, ymax, xmax, kp0_x, kp0_y, ..., kp5_x, kp5_y]`
/// in normalized image fractions (not clamped).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub coords: [f32; ROW_WIDTH],
    pub score: f32,
}

impl Candidate {
    /// Box as `[ymin, xmin, ymax, xmax]`.
    pub fn bbox(&self) -> [f32; 4] {
        [self.coords[0], self.coords[1], self.coords[2], self.coords[3]]
    }

    /// Keypoint `k` as normalized `(x, y)`.
    pub fn keypoint(&self, k: usize) -> (f32, f32) {
        (self.coords[4 + k * 2], self.coords[5 + k * 2])
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Clip raw logits to ±100 and map them to confidences in `[0, 1]`.
pub fn scores_from_logits(raw: ArrayView1<f32>) -> Array1<f32> {
    raw.mapv(|x| sigmoid(x.clamp(-SCORE_CLIPPING_THRESHOLD, SCORE_CLIPPING_THRESHOLD)))
}

/// Decode raw `[N×16]` offsets against the anchor table.
///
/// For anchor `i`: center = `raw / scale · anchor_size + anchor_center`,
/// size = `raw / scale · anchor_size`; every keypoint decodes like the center.
/// Output rows are `(ymin, xmin, ymax, xmax, kp…)`.
pub fn decode_boxes(
    raw: ArrayView2<f32>,
    anchors: &AnchorTable,
    scale: f32,
) -> Result<Array2<f32>, DecodeError> {
    let (rows, cols) = raw.dim();
    if rows != anchors.len() || cols != ROW_WIDTH {
        return Err(DecodeError::BoxShape {
            rows,
            cols,
            anchors: anchors.len(),
        });
    }

    let mut boxes = Array2::<f32>::zeros((rows, ROW_WIDTH));
    for (i, anchor) in anchors.iter().enumerate() {
        let r = raw.row(i);
        let x_center = r[0] / scale * anchor.w + anchor.cx;
        let y_center = r[1] / scale * anchor.h + anchor.cy;
        let w = r[2] / scale * anchor.w;
        let h = r[3] / scale * anchor.h;

        boxes[[i, 0]] = y_center - h / 2.0;
        boxes[[i, 1]] = x_center - w / 2.0;
        boxes[[i, 2]] = y_center + h / 2.0;
        boxes[[i, 3]] = x_center + w / 2.0;

        for k in 0..NUM_KEYPOINTS {
            let offset = 4 + k * 2;
            boxes[[i, offset]] = r[offset] / scale * anchor.w + anchor.cx;
            boxes[[i, offset + 1]] = r[offset + 1] / scale * anchor.h + anchor.cy;
        }
    }

    Ok(boxes)
}

/// Keep rows whose confidence is at least `threshold`, in anchor order.
pub fn select_candidates(
    decoded: ArrayView2<f32>,
    scores: ArrayView1<f32>,
    threshold: f32,
) -> Result<Vec<Candidate>, DecodeError> {
    if decoded.nrows() != scores.len() {
        return Err(DecodeError::ScoreCount {
            scores: scores.len(),
            rows: decoded.nrows(),
        });
    }

    let candidates = decoded
        .outer_iter()
        .zip(scores.iter())
        .filter(|(_, &score)| score >= threshold)
        .map(|(row, &score)| {
            let mut coords = [0.0f32; ROW_WIDTH];
            for (dst, src) in coords.iter_mut().zip(row.iter()) {
                *dst = *src;
            }
            Candidate { coords, score }
        })
        .collect();

    Ok(candidates)
}
