//! End-to-end face analysis: detect, classify, aggregate.

use crate::aggregate::aggregate;
use crate::alignment::PixelNormalization;
use crate::classifier::ClassifierError;
use crate::config::PipelineConfig;
use crate::decoder::DetectorVariant;
use crate::detector::{DetectorError, FaceDetector};
use crate::emotion::{EmotionClassifier, EMOTION_CLASSES};
use crate::gender_age::GenderAgeClassifier;
use crate::observer::{AnalysisObserver, PipelineEvent, TracingObserver};
use crate::types::{FaceAnalysis, Keypoint, PixelBox, Thresholds};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("{name} threshold {value} is outside [0, 1]")]
    InvalidThreshold { name: &'static str, value: f32 },
}

/// Owns the three models and runs them over single frames.
pub struct FaceAnalyzer {
    detector: FaceDetector,
    gender_age: GenderAgeClassifier,
    emotion: EmotionClassifier,
    emotion_labels: Option<Vec<String>>,
    defaults: Thresholds,
    observer: Box<dyn AnalysisObserver>,
}

impl FaceAnalyzer {
    pub fn new(
        detector: FaceDetector,
        gender_age: GenderAgeClassifier,
        emotion: EmotionClassifier,
    ) -> Self {
        Self {
            detector,
            gender_age,
            emotion,
            emotion_labels: Some(EMOTION_CLASSES.iter().map(|s| s.to_string()).collect()),
            defaults: Thresholds::default(),
            observer: Box::new(TracingObserver),
        }
    }

    /// Load every model named by `config`. Any missing or malformed artifact
    /// fails the whole load.
    pub fn load(config: &PipelineConfig) -> Result<Self, AnalyzeError> {
        let anchors = config.anchors_path();
        let detector = FaceDetector::load(
            &config.detector_path(),
            anchors.as_deref(),
            config.variant,
            config.intra_threads,
        )?;
        let gender_age = GenderAgeClassifier::load(&config.gender_age_path(), config.intra_threads)?;
        let emotion = EmotionClassifier::load(&config.emotion_path(), config.intra_threads)?;

        tracing::info!(
            model_dir = %config.model_dir.display(),
            variant = ?config.variant,
            "face analyzer ready"
        );

        Ok(Self::new(detector, gender_age, emotion)
            .with_emotion_labels(config.emotion_labels.clone())
            .with_default_thresholds(Thresholds {
                score: config.score_threshold,
                nms: config.nms_threshold,
            }))
    }

    /// Emotion class names; `None` reports raw class indices.
    pub fn with_emotion_labels(mut self, labels: Option<Vec<String>>) -> Self {
        self.emotion_labels = labels;
        self
    }

    /// Thresholds used when a call leaves them unset.
    pub fn with_default_thresholds(mut self, defaults: Thresholds) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn AnalysisObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn variant(&self) -> DetectorVariant {
        self.detector.variant()
    }

    pub fn gender_age_normalization(&self) -> PixelNormalization {
        self.gender_age.normalization()
    }

    /// Analyze one RGB frame.
    pub fn analyze(
        &mut self,
        frame: &RgbImage,
        thresholds: Thresholds,
    ) -> Result<FaceAnalysis, AnalyzeError> {
        let thresholds = Thresholds {
            score: thresholds.score.or(self.defaults.score),
            nms: thresholds.nms.or(self.defaults.nms),
        };
        check_threshold("score", thresholds.score)?;
        check_threshold("nms", thresholds.nms)?;

        let observer = self.observer.as_ref();
        let detections = self.detector.detect(frame, thresholds, observer)?;
        if detections.is_empty() {
            return Ok(FaceAnalysis::default());
        }

        let boxes: Vec<PixelBox> = detections.iter().map(|d| d.bbox).collect();
        let landmarks: Vec<&[Keypoint]> = detections.iter().map(|d| &d.keypoints[..]).collect();

        let gender_age = self.gender_age.predict(frame, &boxes)?;
        observer.on_event(&PipelineEvent::ClassifierCompleted {
            classifier: "gender_age",
            faces: boxes.len(),
            results: gender_age.len(),
        });

        let emotions = self.emotion.predict(frame, &boxes, &landmarks)?;
        observer.on_event(&PipelineEvent::ClassifierCompleted {
            classifier: "emotion",
            faces: boxes.len(),
            results: emotions.len(),
        });

        let faces = aggregate(
            &detections,
            &gender_age,
            &emotions,
            self.emotion_labels.as_deref(),
        );
        Ok(FaceAnalysis { faces })
    }
}

fn check_threshold(name: &'static str, value: Option<f32>) -> Result<(), AnalyzeError> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(AnalyzeError::InvalidThreshold { name, value: v }),
        _ => Ok(()),
    }
}
