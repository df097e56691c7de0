use crate::engine::{EngineError, EngineHandle};
use image::RgbImage;
use mien_core::{AnalyzeError, Thresholds};
use std::collections::HashMap;
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.mien.Analyzer1";
pub const OBJECT_PATH: &str = "/org/mien/Analyzer1";

const SCORE_THRESHOLD_KEY: &str = "score_threshold";
const NMS_THRESHOLD_KEY: &str = "nms_threshold";

/// D-Bus interface for the mien face analysis daemon.
///
/// Bus name: org.mien.Analyzer1
/// Object path: /org/mien/Analyzer1
pub struct AnalyzerService {
    engine: EngineHandle,
}

impl AnalyzerService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.mien.Analyzer1")]
impl AnalyzerService {
    /// Detect faces in an encoded image and classify each one.
    ///
    /// `options` may carry `score_threshold` and `nms_threshold`, both in
    /// `[0, 1]`. Returns `{filename, face_count, faces}` as JSON.
    async fn analyze(
        &self,
        filename: &str,
        image: Vec<u8>,
        options: HashMap<String, f64>,
    ) -> fdo::Result<String> {
        let thresholds = parse_thresholds(&options)?;
        let frame = decode_frame(&image)?;
        tracing::info!(
            filename,
            bytes = image.len(),
            width = frame.width(),
            height = frame.height(),
            "analyze requested"
        );

        let analysis = self
            .engine
            .analyze(frame, thresholds)
            .await
            .map_err(engine_error)?;
        let report = analysis.into_report(filename);
        tracing::info!(filename, faces = report.face_count, "analyze complete");

        serde_json::to_string(&report).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    async fn health(&self) -> fdo::Result<String> {
        Ok(serde_json::json!({ "status": "ok" }).to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let info = self.engine.info();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "models_loaded": true,
            "model_dir": info.model_dir.display().to_string(),
            "detector_variant": info.variant,
            "gender_age_normalization": {
                "mean": info.gender_age_mean,
                "std": info.gender_age_std,
            },
            "emotion_labels": info.emotion_labels,
        })
        .to_string())
    }
}

/// Read the optional threshold overrides. Unknown keys are ignored.
fn parse_thresholds(options: &HashMap<String, f64>) -> fdo::Result<Thresholds> {
    let read = |key: &str| -> fdo::Result<Option<f32>> {
        match options.get(key) {
            None => Ok(None),
            Some(v) if (0.0..=1.0).contains(v) => Ok(Some(*v as f32)),
            Some(v) => Err(fdo::Error::InvalidArgs(format!(
                "{key} must be between 0 and 1, got {v}"
            ))),
        }
    };
    Ok(Thresholds {
        score: read(SCORE_THRESHOLD_KEY)?,
        nms: read(NMS_THRESHOLD_KEY)?,
    })
}

fn decode_frame(bytes: &[u8]) -> fdo::Result<RgbImage> {
    if bytes.is_empty() {
        return Err(fdo::Error::InvalidArgs("Uploaded file is empty.".into()));
    }
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| {
            tracing::debug!(error = %e, "image decode failed");
            fdo::Error::InvalidArgs("Unable to decode image content.".into())
        })
}

fn engine_error(err: EngineError) -> fdo::Error {
    match err {
        EngineError::Analyze(e @ AnalyzeError::InvalidThreshold { .. }) => {
            fdo::Error::InvalidArgs(e.to_string())
        }
        other => fdo::Error::Failed(other.to_string()),
    }
}
