//! Landmark-driven box refinement.
//!
//! BlazeFace boxes run loose horizontally on frontal faces. After suppression
//! each box is moved into pixel space and, unless the ear/eye spacing says the
//! face is strongly turned, its horizontal span is rebuilt from the ear anchors
//! and centered on the nose.

use crate::decoder::Candidate;
use crate::types::{
    Detection, Keypoint, PixelBox, KP_EAR_LEFT, KP_EAR_RIGHT, KP_EYE_A, KP_EYE_B, KP_NOSE,
    NUM_KEYPOINTS,
};

/// Fraction of the ear-to-ear span kept by the tightened box.
const EAR_SPAN_SHRINK: f32 = 0.95;

/// One gap exceeding this multiple of the other marks the face as tilted.
const TILT_GAP_RATIO: f32 = 2.0;

/// Measurements taken while refining one detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Refinement {
    pub anchor_width: f32,
    pub eye_width: f32,
    pub left_gap: i32,
    pub right_gap: i32,
    pub tilted: bool,
}

/// Scale a normalized coordinate to pixels, clamp to `[0, dim - 1]`, truncate.
fn to_pixel(v: f32, dim: u32) -> i32 {
    (v * dim as f32).clamp(0.0, dim.saturating_sub(1) as f32) as i32
}

/// Force `lo < hi` inside `[0, dim - 1]`, nudging the narrow side by one unit.
fn order_span(lo: i32, hi: i32, dim: u32) -> (i32, i32) {
    let max = dim as i32 - 1;
    let lo = lo.max(0);
    let hi = hi.max(lo + 1).min(max);
    let lo = lo.min(hi - 1).max(0);
    (lo, hi)
}

/// Tilt heuristic: both gaps nonzero and one more than twice the other.
pub fn is_highly_tilted(left_gap: i32, right_gap: i32) -> bool {
    if left_gap <= 0 || right_gap <= 0 {
        return false;
    }
    let (l, r) = (left_gap as f32, right_gap as f32);
    l > r * TILT_GAP_RATIO || r > l * TILT_GAP_RATIO
}

/// Rebuild the horizontal span from the ear anchors, centered on the nose.
fn tighten_horizontal(keypoints: &[Keypoint; NUM_KEYPOINTS], anchor_width: f32, width: u32) -> (i32, i32) {
    let max_x = width.saturating_sub(1) as f32;
    let ear_l = keypoints[KP_EAR_LEFT];
    let ear_r = keypoints[KP_EAR_RIGHT];

    let anchor_center_x = (ear_l.x + ear_r.x) as f32 / 2.0;
    let half_width = (anchor_width * EAR_SPAN_SHRINK * 0.5).max(1.0);
    let target_span = ((anchor_center_x + half_width) - (anchor_center_x - half_width)).max(1.0);

    let nose_x = keypoints[KP_NOSE].x as f32;
    let mut xmin = (nose_x - target_span / 2.0).max(0.0);
    let mut xmax = (nose_x + target_span / 2.0).min(max_x);

    let span = xmax - xmin;
    if span < target_span {
        let deficit = target_span - span;
        xmin = (xmin - deficit / 2.0).max(0.0);
        xmax = (xmax + deficit / 2.0).min(max_x);
    }

    (xmin.round_ties_even() as i32, xmax.round_ties_even() as i32)
}

/// Turn a suppressed, normalized candidate into a pixel-space detection.
pub fn refine(candidate: &Candidate, width: u32, height: u32) -> (Detection, Refinement) {
    let [ymin, xmin, ymax, xmax] = candidate.bbox();
    let raw_x = (to_pixel(xmin, width), to_pixel(xmax, width));
    let raw_y = (to_pixel(ymin, height), to_pixel(ymax, height));

    let keypoints: [Keypoint; NUM_KEYPOINTS] = std::array::from_fn(|k| {
        let (x, y) = candidate.keypoint(k);
        Keypoint {
            x: to_pixel(x, width),
            y: to_pixel(y, height),
        }
    });

    let eye_a = keypoints[KP_EYE_A];
    let eye_b = keypoints[KP_EYE_B];
    let ear_l = keypoints[KP_EAR_LEFT];
    let ear_r = keypoints[KP_EAR_RIGHT];

    let anchor_width = ((ear_r.x - ear_l.x).abs() as f32).max(1.0);
    let eye_width = ((eye_b.x - eye_a.x).abs() as f32).max(1.0);
    let left_gap = (ear_l.x - eye_a.x).abs();
    let right_gap = (ear_r.x - eye_b.x).abs();
    let tilted = is_highly_tilted(left_gap, right_gap);

    let (x_lo, x_hi) = if tilted {
        raw_x
    } else {
        tighten_horizontal(&keypoints, anchor_width, width)
    };

    let (xmin, xmax) = order_span(x_lo, x_hi, width);
    let (ymin, ymax) = order_span(raw_y.0, raw_y.1, height);

    let detection = Detection {
        bbox: PixelBox { xmin, ymin, xmax, ymax },
        score: candidate.score,
        keypoints,
    };
    let refinement = Refinement {
        anchor_width,
        eye_width,
        left_gap,
        right_gap,
        tilted,
    };
    (detection, refinement)
}
