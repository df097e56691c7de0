//! Pipeline configuration: where the models live and how to run them.

use crate::decoder::DetectorVariant;
use crate::emotion::EMOTION_CLASSES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_DETECTOR_MODEL: &str = "blazeface_fp32.onnx";
const DEFAULT_GENDER_AGE_MODEL: &str = "genderage.onnx";
const DEFAULT_EMOTION_MODEL: &str = "mini_xception_fp32.onnx";

/// Directory the models are read from when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/var/lib/mien/models")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub gender_age_model: String,
    pub emotion_model: String,
    /// Anchor table (`.npy` or JSON); generated from the variant when unset.
    pub anchors: Option<PathBuf>,
    pub variant: DetectorVariant,
    /// Default score threshold; the variant's own default when unset.
    pub score_threshold: Option<f32>,
    /// Default NMS IoU threshold; the variant's own default when unset.
    pub nms_threshold: Option<f32>,
    /// Emotion class names. `None` reports raw class indices.
    pub emotion_labels: Option<Vec<String>>,
    pub intra_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            detector_model: DEFAULT_DETECTOR_MODEL.into(),
            gender_age_model: DEFAULT_GENDER_AGE_MODEL.into(),
            emotion_model: DEFAULT_EMOTION_MODEL.into(),
            anchors: None,
            variant: DetectorVariant::Front,
            score_threshold: None,
            nms_threshold: None,
            emotion_labels: Some(EMOTION_CLASSES.iter().map(|s| s.to_string()).collect()),
            intra_threads: 1,
        }
    }
}

impl PipelineConfig {
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = dir.into();
        self
    }

    pub fn detector_path(&self) -> PathBuf {
        self.resolve(&self.detector_model)
    }

    pub fn gender_age_path(&self) -> PathBuf {
        self.resolve(&self.gender_age_model)
    }

    pub fn emotion_path(&self) -> PathBuf {
        self.resolve(&self.emotion_model)
    }

    /// Relative anchor paths resolve against the model directory too.
    pub fn anchors_path(&self) -> Option<PathBuf> {
        self.anchors.as_deref().map(|p| self.resolve(p))
    }

    fn resolve(&self, file: impl AsRef<Path>) -> PathBuf {
        let file = file.as_ref();
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.model_dir.join(file)
        }
    }
}
