//! mien-core: single-frame face analysis.
//!
//! BlazeFace detection (anchor decoding, weighted suppression, box
//! refinement) followed by gender/age and emotion classification, all
//! running via ONNX Runtime on the CPU.

pub mod aggregate;
pub mod alignment;
pub mod anchors;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod detector;
pub mod emotion;
pub mod gender_age;
pub mod geometry;
pub mod inference;
pub mod normalization;
pub mod observer;
pub mod pipeline;
pub mod refine;
pub mod suppression;
pub mod types;

pub use config::{default_model_dir, PipelineConfig};
pub use decoder::DetectorVariant;
pub use inference::{InferenceEngine, InferenceError};
pub use observer::{AnalysisObserver, NoopObserver, PipelineEvent, TracingObserver};
pub use pipeline::{AnalyzeError, FaceAnalyzer};
pub use types::{
    AgeBucket, AggregatedFaceResult, AnalysisReport, Detection, Emotion, EmotionLabel, FaceAnalysis, Gender,
    Keypoint, PixelBox, Thresholds,
};
