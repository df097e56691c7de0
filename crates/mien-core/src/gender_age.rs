//! Gender and age-bucket classifier.
//!
//! Output rows are `[female, male, age / 100, ...]`.

use crate::alignment::{gender_age_blob, gender_age_crop, PixelNormalization};
use crate::classifier::{run_rows, ClassifierError, ModelInput};
use crate::inference::{InferenceEngine, OrtEngine};
use crate::normalization::{infer_pixel_normalization, read_node_names};
use crate::types::{AgeBucket, Gender, GenderAge, PixelBox};
use image::RgbImage;
use ndarray::{Array3, ArrayView2};
use std::path::Path;

const MODEL_NAME: &str = "gender/age";
const RGB_CHANNELS: usize = 3;
const MIN_OUTPUTS: usize = 3;
const AGE_SCALE: f32 = 100.0;

pub struct GenderAgeClassifier {
    engine: Box<dyn InferenceEngine>,
    input: ModelInput,
    normalization: PixelNormalization,
}

impl GenderAgeClassifier {
    pub fn new(
        engine: Box<dyn InferenceEngine>,
        normalization: PixelNormalization,
    ) -> Result<Self, ClassifierError> {
        let input = ModelInput::from_shape(MODEL_NAME, engine.input_shape())?;
        if input.channels.is_some_and(|c| c != RGB_CHANNELS) {
            return Err(ClassifierError::InputShape {
                model: MODEL_NAME,
                shape: engine.input_shape().to_vec(),
                reason: "expected 3 input channels",
            });
        }
        Ok(Self {
            engine,
            input,
            normalization,
        })
    }

    /// Load the model; pixel normalization is inferred from its graph.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ClassifierError> {
        let node_names = read_node_names(model_path)?;
        let normalization = infer_pixel_normalization(&node_names);
        let engine = OrtEngine::load(model_path, intra_threads)?;
        tracing::info!(
            path = %model_path.display(),
            mean = normalization.mean,
            std = normalization.std,
            "gender/age classifier ready"
        );
        Self::new(Box::new(engine), normalization)
    }

    pub fn normalization(&self) -> PixelNormalization {
        self.normalization
    }

    /// Crop and pack one `[3, H, W]` tensor per face.
    pub fn preprocess(&self, frame: &RgbImage, boxes: &[PixelBox]) -> Vec<Array3<f32>> {
        let (w, h) = (self.input.width as u32, self.input.height as u32);
        boxes
            .iter()
            .map(|bbox| {
                let crop = gender_age_crop(frame, bbox, w);
                gender_age_blob(&crop, w, h, self.normalization)
            })
            .collect()
    }

    /// Classify every face box; results follow box order.
    pub fn predict(
        &mut self,
        frame: &RgbImage,
        boxes: &[PixelBox],
    ) -> Result<Vec<GenderAge>, ClassifierError> {
        if boxes.is_empty() {
            return Ok(Vec::new());
        }
        let faces = self.preprocess(frame, boxes);
        let rows = run_rows(self.engine.as_mut(), &self.input, &faces)?;
        postprocess(rows.view())
    }
}

/// Decide gender (argmax of the first two values, ties to female) and age
/// bucket (`round(value * 100)`) per row.
pub fn postprocess(rows: ArrayView2<f32>) -> Result<Vec<GenderAge>, ClassifierError> {
    if rows.nrows() > 0 && rows.ncols() < MIN_OUTPUTS {
        return Err(ClassifierError::OutputShape(format!(
            "gender/age rows have {} values, need at least {MIN_OUTPUTS}",
            rows.ncols()
        )));
    }

    Ok(rows
        .outer_iter()
        .map(|pred| {
            let gender = if pred[1] > pred[0] {
                Gender::Male
            } else {
                Gender::Female
            };
            let age = (pred[2] * AGE_SCALE).round_ties_even() as i32;
            GenderAge {
                gender,
                age_bucket: AgeBucket::from_age(age),
            }
        })
        .collect())
}
