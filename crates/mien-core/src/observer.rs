//! Pipeline observability hook.
//!
//! Stages report what they did through an injected [`AnalysisObserver`]
//! instead of printing. The default forwards to `tracing` at debug level.

use crate::refine::Refinement;
use crate::types::PixelBox;

/// One structured event emitted while analyzing a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Score filtering kept `kept` of `total` anchor slots.
    CandidatesDecoded { total: usize, kept: usize, threshold: f32 },
    /// Weighted suppression merged `input` candidates into `output`.
    Suppressed { input: usize, output: usize, iou_threshold: f32 },
    /// Face `index` was refined into `bbox`.
    FaceRefined {
        index: usize,
        bbox: PixelBox,
        refinement: Refinement,
    },
    /// An attribute classifier finished a batch.
    ClassifierCompleted {
        classifier: &'static str,
        faces: usize,
        results: usize,
    },
}

pub trait AnalysisObserver: Send {
    fn on_event(&self, event: &PipelineEvent);
}

/// Emits every event as a `tracing::debug!` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl AnalysisObserver for TracingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::CandidatesDecoded { total, kept, threshold } => {
                tracing::debug!(total, kept, threshold, "decoded detector candidates");
            }
            PipelineEvent::Suppressed { input, output, iou_threshold } => {
                tracing::debug!(input, output, iou_threshold, "weighted suppression");
            }
            PipelineEvent::FaceRefined { index, bbox, refinement } => {
                tracing::debug!(
                    index,
                    ?bbox,
                    left_gap = refinement.left_gap,
                    right_gap = refinement.right_gap,
                    eye_width = refinement.eye_width,
                    anchor_width = refinement.anchor_width,
                    tilted = refinement.tilted,
                    "refined face box"
                );
            }
            PipelineEvent::ClassifierCompleted { classifier, faces, results } => {
                tracing::debug!(classifier, faces, results, "classifier batch complete");
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AnalysisObserver for NoopObserver {
    fn on_event(&self, _event: &PipelineEvent) {}
}
