//! Weighted non-maximum suppression.
//!
//! Unlike plain NMS, overlapping detections are not discarded: each cluster
//! collapses into one detection whose coordinates are the score-weighted mean
//! of its members and whose score is the members' mean score.

use crate::decoder::{Candidate, ROW_WIDTH};
use crate::geometry::iou;

/// Greedy weighted NMS over thresholded candidates.
///
/// Repeatedly takes the highest-scoring remaining candidate, gathers every
/// remaining candidate whose IoU with it exceeds `iou_threshold` (the
/// candidate itself always belongs to its own cluster) and emits the merged
/// result. Output is ordered by cluster seed score, descending.
pub fn weighted_nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut output = Vec::new();
    let mut remaining = candidates;

    while !remaining.is_empty() {
        let seed = remaining.remove(0);
        let seed_box = seed.bbox();

        let mut overlapping = vec![seed];
        remaining.retain(|other| {
            if iou(&seed_box, &other.bbox()) > iou_threshold {
                overlapping.push(*other);
                false
            } else {
                true
            }
        });

        output.push(merge(&seed, &overlapping));
    }

    output
}

fn merge(seed: &Candidate, cluster: &[Candidate]) -> Candidate {
    if cluster.len() <= 1 {
        return *seed;
    }

    let total_score: f32 = cluster.iter().map(|c| c.score).sum();
    // All-zero weights (underflowed sigmoids) have no weighted mean
    if total_score <= 0.0 {
        return *seed;
    }
    let mut coords = [0.0f32; ROW_WIDTH];
    for member in cluster {
        for (acc, value) in coords.iter_mut().zip(member.coords.iter()) {
            *acc += value * member.score;
        }
    }
    for acc in &mut coords {
        *acc /= total_score;
    }

    Candidate {
        coords,
        score: total_score / cluster.len() as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(bbox: [f32; 4], score: f32) -> Candidate {
        let mut coords = [0.0f32; ROW_WIDTH];
        coords[..4].copy_from_slice(&bbox);
        for k in 0..6 {
            coords[4 + 2 * k] = (bbox[1] + bbox[3]) / 2.0;
            coords[5 + 2 * k] = (bbox[0] + bbox[2]) / 2.0;
        }
        Candidate { coords, score }
    }

    #[test]
    fn test_empty() {
        assert!(weighted_nms(vec![], 0.3).is_empty());
    }

    #[test]
    fn test_single_passes_through_unchanged() {
        let c = candidate([0.1, 0.1, 0.3, 0.3], 0.8);
        let out = weighted_nms(vec![c], 0.3);
        assert_eq!(out, vec![c]);
    }

    #[test]
    fn test_two_overlapping_merge_weighted() {
        // Boxes with IoU 0.5: same rows, columns [0, 0.3] vs [0.1, 0.4] → 0.2 / 0.4
        let a = candidate([0.0, 0.0, 0.2, 0.3], 0.9);
        let b = candidate([0.0, 0.1, 0.2, 0.4], 0.7);
        assert!((iou(&a.bbox(), &b.bbox()) - 0.5).abs() < 1e-5);

        let out = weighted_nms(vec![b, a], 0.3);
        assert_eq!(out.len(), 1);
        let m = &out[0];
        assert!((m.score - (0.9 + 0.7) / 2.0).abs() < 1e-6);

        // xmin = (0.0·0.9 + 0.1·0.7) / 1.6
        assert!((m.coords[1] - 0.07 / 1.6).abs() < 1e-6);
        assert!((m.coords[3] - (0.3 * 0.9 + 0.4 * 0.7) / 1.6).abs() < 1e-6);
    }

    #[test]
    fn test_disjoint_kept_in_score_order() {
        let a = candidate([0.0, 0.0, 0.1, 0.1], 0.6);
        let b = candidate([0.5, 0.5, 0.6, 0.6], 0.95);
        let c = candidate([0.8, 0.0, 0.9, 0.1], 0.7);
        let out = weighted_nms(vec![a, b, c], 0.3);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], b);
        assert_eq!(out[1], c);
        assert_eq!(out[2], a);
    }

    #[test]
    fn test_overlap_at_threshold_not_merged() {
        // IoU exactly 1/3 with threshold 1/3: strict comparison keeps both
        let a = candidate([0.0, 0.0, 10.0, 10.0], 0.9);
        let b = candidate([0.0, 5.0, 10.0, 15.0], 0.8);
        let t = iou(&a.bbox(), &b.bbox());
        let out = weighted_nms(vec![a, b], t);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_never_increases_count_and_keeps_top() {
        let inputs = vec![
            candidate([0.0, 0.0, 0.2, 0.2], 0.5),
            candidate([0.01, 0.01, 0.21, 0.21], 0.99),
            candidate([0.02, 0.0, 0.22, 0.2], 0.7),
            candidate([0.6, 0.6, 0.8, 0.8], 0.4),
            candidate([0.61, 0.6, 0.81, 0.8], 0.45),
        ];
        let out = weighted_nms(inputs.clone(), 0.3);
        assert!(out.len() <= inputs.len());
        assert_eq!(out.len(), 2);
        // The top seed's cluster leads the output
        let top_box = inputs[1].bbox();
        assert!(iou(&out[0].bbox(), &top_box) > 0.8);
    }

    #[test]
    fn test_degenerate_seed_terminates() {
        // Zero-area box has IoU 0 with itself; it must still be consumed
        let a = candidate([0.5, 0.5, 0.5, 0.5], 0.9);
        let b = candidate([0.1, 0.1, 0.2, 0.2], 0.8);
        let out = weighted_nms(vec![a, b], 0.3);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], a);
    }

    #[test]
    fn test_zero_score_cluster_keeps_seed() {
        let a = candidate([0.0, 0.0, 0.2, 0.3], 0.0);
        let b = candidate([0.0, 0.1, 0.2, 0.4], 0.0);
        let out = weighted_nms(vec![a, b], 0.3);
        assert_eq!(out.len(), 1);
        assert!(out[0].coords.iter().all(|v| v.is_finite()));
        assert_eq!(out[0].score, 0.0);
        assert_eq!(out[0].bbox(), a.bbox());
    }
}
