//! Seven-class facial emotion classifier.

use crate::alignment::{emotion_align, emotion_tensor};
use crate::classifier::{run_rows, ClassifierError, ModelInput};
use crate::inference::{InferenceEngine, OrtEngine};
use crate::types::{EmotionPrediction, Keypoint, PixelBox, EMOTION_UNKNOWN};
use image::RgbImage;
use ndarray::{Array3, ArrayView1, ArrayView2};
use std::path::Path;

const MODEL_NAME: &str = "emotion";

/// Class names in model output order.
pub const EMOTION_CLASSES: [&str; 7] = [
    "angry", "disgust", "fear", "happy", "sad", "surprise", "neutral",
];

/// Top-class probabilities below this are reported as [`EMOTION_UNKNOWN`].
pub const EMOTION_CONFIDENCE_FLOOR: f32 = 0.5;

pub struct EmotionClassifier {
    engine: Box<dyn InferenceEngine>,
    input: ModelInput,
}

impl EmotionClassifier {
    /// Wrap an engine whose input is `[N, 1, H, W]` with static C, H and W.
    pub fn new(engine: Box<dyn InferenceEngine>) -> Result<Self, ClassifierError> {
        let input = ModelInput::from_shape(MODEL_NAME, engine.input_shape())?;
        let reject = |reason: &'static str| ClassifierError::InputShape {
            model: MODEL_NAME,
            shape: engine.input_shape().to_vec(),
            reason,
        };
        match input.channels {
            None => return Err(reject("channel count must be static")),
            Some(1) => {}
            Some(_) => return Err(reject("expected a single grayscale channel")),
        }
        Ok(Self { engine, input })
    }

    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ClassifierError> {
        let engine = OrtEngine::load(model_path, intra_threads)?;
        tracing::info!(path = %model_path.display(), "emotion classifier ready");
        Self::new(Box::new(engine))
    }

    /// Align and pack one `[1, H, W]` tensor per face. Every box needs a
    /// landmark set; a set with fewer than two points falls back to
    /// synthesized eye positions.
    pub fn preprocess(
        &self,
        frame: &RgbImage,
        boxes: &[PixelBox],
        landmarks: &[&[Keypoint]],
    ) -> Result<Vec<Array3<f32>>, ClassifierError> {
        if boxes.len() != landmarks.len() {
            return Err(ClassifierError::MismatchedInputs {
                boxes: boxes.len(),
                landmarks: landmarks.len(),
            });
        }

        let (w, h) = (self.input.width as u32, self.input.height as u32);
        Ok(boxes
            .iter()
            .zip(landmarks)
            .map(|(bbox, kps)| {
                let aligned = emotion_align(frame, bbox, Some(*kps), w);
                emotion_tensor(&aligned, w, h)
            })
            .collect())
    }

    /// Classify every face; results follow box order.
    pub fn predict(
        &mut self,
        frame: &RgbImage,
        boxes: &[PixelBox],
        landmarks: &[&[Keypoint]],
    ) -> Result<Vec<EmotionPrediction>, ClassifierError> {
        let faces = self.preprocess(frame, boxes, landmarks)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let rows = run_rows(self.engine.as_mut(), &self.input, &faces)?;
        Ok(postprocess(rows.view()))
    }
}

/// Softmax with the row max subtracted first.
pub fn softmax(logits: ArrayView1<f32>) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

/// Argmax over the softmax distribution, demoted to [`EMOTION_UNKNOWN`] when
/// its probability is under [`EMOTION_CONFIDENCE_FLOOR`].
pub fn postprocess(logits: ArrayView2<f32>) -> Vec<EmotionPrediction> {
    logits
        .outer_iter()
        .map(|row| {
            let distribution = softmax(row);
            let (best, confidence) = distribution
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |acc, (i, p)| if p > acc.1 { (i, p) } else { acc });
            let class_index = if confidence < EMOTION_CONFIDENCE_FLOOR {
                EMOTION_UNKNOWN
            } else {
                best as i32
            };
            EmotionPrediction {
                class_index,
                confidence,
                distribution,
            }
        })
        .collect()
}
