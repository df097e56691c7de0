//! BlazeFace face detector.
//!
//! Runs the detector model on a resized frame, then decodes, filters,
//! suppresses and refines the 896 anchor slots into pixel-space detections.

use crate::anchors::{AnchorError, AnchorTable};
use crate::decoder::{
    decode_boxes, scores_from_logits, select_candidates, DecodeError, DetectorVariant, ROW_WIDTH,
};
use crate::inference::{InferenceEngine, InferenceError, OrtEngine};
use crate::observer::{AnalysisObserver, PipelineEvent};
use crate::refine::refine;
use crate::suppression::weighted_nms;
use crate::types::{Detection, Thresholds};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array1, Array2, Array4, ArrayD};
use std::path::Path;
use thiserror::Error;

/// Detector input pixels are mapped to `px / 127.5 - 1`.
const DETECTOR_PIXEL_SCALE: f32 = 127.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("anchors: {0}")]
    Anchors(#[from] AnchorError),
    #[error("inference: {0}")]
    Inference(#[from] InferenceError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("detector model input {actual:?} does not match {variant:?} variant ({expected}×{expected})")]
    InputShape {
        variant: DetectorVariant,
        expected: u32,
        actual: Vec<Option<usize>>,
    },
    #[error("unexpected detector output: {0}")]
    OutputShape(String),
}

pub struct FaceDetector {
    engine: Box<dyn InferenceEngine>,
    anchors: AnchorTable,
    variant: DetectorVariant,
}

impl FaceDetector {
    /// Wrap an engine whose declared spatial size is static and matches the variant.
    pub fn new(
        engine: Box<dyn InferenceEngine>,
        anchors: AnchorTable,
        variant: DetectorVariant,
    ) -> Result<Self, DetectorError> {
        let shape = engine.input_shape();
        let expected = variant.input_size() as usize;
        let spatial_ok =
            shape.len() == 4 && shape[2] == Some(expected) && shape[3] == Some(expected);
        if !spatial_ok {
            return Err(DetectorError::InputShape {
                variant,
                expected: variant.input_size(),
                actual: shape.to_vec(),
            });
        }

        Ok(Self {
            engine,
            anchors,
            variant,
        })
    }

    /// Load the detector model, with a persisted anchor table or generated anchors.
    pub fn load(
        model_path: &Path,
        anchors_path: Option<&Path>,
        variant: DetectorVariant,
        intra_threads: usize,
    ) -> Result<Self, DetectorError> {
        let anchors = match anchors_path {
            Some(path) => AnchorTable::load(path)?,
            None => AnchorTable::generate(variant),
        };
        let engine = OrtEngine::load(model_path, intra_threads)?;
        tracing::info!(variant = ?variant, anchors = anchors.len(), "face detector ready");
        Self::new(Box::new(engine), anchors, variant)
    }

    pub fn variant(&self) -> DetectorVariant {
        self.variant
    }

    /// Resize to the model's square input and scale to `[-1, 1]`, NCHW.
    pub fn preprocess(&self, frame: &RgbImage) -> Array4<f32> {
        let size = self.variant.input_size();
        let resized = imageops::resize(frame, size, size, FilterType::Triangle);

        let side = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, px) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = px.0[c] as f32 / DETECTOR_PIXEL_SCALE - 1.0;
            }
        }
        tensor
    }

    /// Detect faces in one RGB frame.
    ///
    /// Thresholds left as `None` fall back to the variant defaults. Results are
    /// ordered by suppression cluster score, highest first.
    pub fn detect(
        &mut self,
        frame: &RgbImage,
        thresholds: Thresholds,
        observer: &dyn AnalysisObserver,
    ) -> Result<Vec<Detection>, DetectorError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let score_threshold = thresholds
            .score
            .unwrap_or_else(|| self.variant.default_score_threshold());
        let nms_threshold = thresholds
            .nms
            .unwrap_or_else(|| self.variant.default_nms_threshold());

        let input = self.preprocess(frame);
        let outputs = self.engine.run(input)?;
        let (raw_boxes, raw_scores) = split_outputs(outputs, self.anchors.len())?;

        let scores = scores_from_logits(raw_scores.view());
        let decoded = decode_boxes(raw_boxes.view(), &self.anchors, self.variant.scale())?;
        let candidates = select_candidates(decoded.view(), scores.view(), score_threshold)?;
        observer.on_event(&PipelineEvent::CandidatesDecoded {
            total: scores.len(),
            kept: candidates.len(),
            threshold: score_threshold,
        });

        let input_count = candidates.len();
        let merged = weighted_nms(candidates, nms_threshold);
        observer.on_event(&PipelineEvent::Suppressed {
            input: input_count,
            output: merged.len(),
            iou_threshold: nms_threshold,
        });

        let detections = merged
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                let (detection, refinement) = refine(candidate, width, height);
                observer.on_event(&PipelineEvent::FaceRefined {
                    index,
                    bbox: detection.bbox,
                    refinement,
                });
                detection
            })
            .collect();

        Ok(detections)
    }

    /// Run [`detect`](Self::detect) over each frame in order.
    pub fn detect_batch(
        &mut self,
        frames: &[RgbImage],
        thresholds: Thresholds,
        observer: &dyn AnalysisObserver,
    ) -> Result<Vec<Vec<Detection>>, DetectorError> {
        frames
            .iter()
            .map(|frame| self.detect(frame, thresholds, observer))
            .collect()
    }
}

/// Pick the box regressor (last dimension 16) and score tensor out of the
/// detector outputs and flatten them to `[rows, 16]` and `[rows]`.
fn split_outputs(
    outputs: Vec<ArrayD<f32>>,
    anchors: usize,
) -> Result<(Array2<f32>, Array1<f32>), DetectorError> {
    if outputs.len() < 2 {
        return Err(DetectorError::OutputShape(format!(
            "expected box and score outputs, got {}",
            outputs.len()
        )));
    }

    let box_idx = outputs
        .iter()
        .position(|o| o.shape().last() == Some(&ROW_WIDTH))
        .ok_or_else(|| {
            DetectorError::OutputShape(format!(
                "no output with last dimension {ROW_WIDTH}: {:?}",
                outputs.iter().map(|o| o.shape().to_vec()).collect::<Vec<_>>()
            ))
        })?;
    let score_idx = if box_idx == 0 { 1 } else { 0 };

    let boxes = &outputs[box_idx];
    let rows = boxes.len() / ROW_WIDTH;
    if rows != anchors {
        return Err(DetectorError::OutputShape(format!(
            "box output {:?} has {rows} rows for {anchors} anchors",
            boxes.shape()
        )));
    }
    let scores = &outputs[score_idx];
    if scores.len() != anchors {
        return Err(DetectorError::OutputShape(format!(
            "score output {:?} has {} values for {anchors} anchors",
            scores.shape(),
            scores.len()
        )));
    }

    let raw_boxes = Array2::from_shape_vec((rows, ROW_WIDTH), boxes.iter().copied().collect())
        .map_err(|e| DetectorError::OutputShape(e.to_string()))?;
    let raw_scores = Array1::from_iter(scores.iter().copied());
    Ok((raw_boxes, raw_scores))
}
