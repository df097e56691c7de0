use image::RgbImage;
use mien_core::{AnalyzeError, DetectorVariant, FaceAnalysis, FaceAnalyzer, PipelineConfig, Thresholds};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("analysis error: {0}")]
    Analyze(#[from] AnalyzeError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// What the engine loaded, reported by `Status()`.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub model_dir: PathBuf,
    pub variant: DetectorVariant,
    pub gender_age_mean: f32,
    pub gender_age_std: f32,
    pub emotion_labels: Option<Vec<String>>,
}

impl ModelInfo {
    fn describe(config: &PipelineConfig, analyzer: &FaceAnalyzer) -> Self {
        let norm = analyzer.gender_age_normalization();
        Self {
            model_dir: config.model_dir.clone(),
            variant: analyzer.variant(),
            gender_age_mean: norm.mean,
            gender_age_std: norm.std,
            emotion_labels: config.emotion_labels.clone(),
        }
    }
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Analyze {
        frame: RgbImage,
        thresholds: Thresholds,
        reply: oneshot::Sender<Result<FaceAnalysis, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    info: Arc<ModelInfo>,
}

impl EngineHandle {
    /// Run the full pipeline on one decoded frame.
    pub async fn analyze(
        &self,
        frame: RgbImage,
        thresholds: Thresholds,
    ) -> Result<FaceAnalysis, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze {
                frame,
                thresholds,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }
}

/// Load every model and spawn the engine on a dedicated OS thread.
///
/// Fails fast at startup if any model or the anchor table is unusable.
pub fn spawn_engine(config: &PipelineConfig) -> Result<EngineHandle, EngineError> {
    let analyzer = FaceAnalyzer::load(config)?;
    let info = ModelInfo::describe(config, &analyzer);
    spawn_with(analyzer, info)
}

fn spawn_with(mut analyzer: FaceAnalyzer, info: ModelInfo) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("mien-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze {
                        frame,
                        thresholds,
                        reply,
                    } => {
                        let result = analyzer.analyze(&frame, thresholds).map_err(EngineError::from);
                        match &result {
                            Ok(analysis) => tracing::debug!(
                                width = frame.width(),
                                height = frame.height(),
                                faces = analysis.faces.len(),
                                "frame analyzed"
                            ),
                            Err(err) => tracing::warn!(error = %err, "analysis failed"),
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        tx,
        info: Arc::new(info),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mien_core::anchors::{AnchorTable, NUM_ANCHORS};
    use mien_core::detector::FaceDetector;
    use mien_core::emotion::EmotionClassifier;
    use mien_core::gender_age::GenderAgeClassifier;
    use mien_core::normalization::DEFAULT_NORMALIZATION;
    use mien_core::{InferenceEngine, InferenceError};
    use ndarray::{Array4, ArrayD, IxDyn};

    /// Every anchor slot scores far below any threshold.
    struct EmptyScene;

    impl InferenceEngine for EmptyScene {
        fn input_shape(&self) -> &[Option<usize>] {
            &[Some(1), Some(3), Some(128), Some(128)]
        }

        fn run(&mut self, _input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, InferenceError> {
            Ok(vec![
                ArrayD::zeros(IxDyn(&[1, NUM_ANCHORS, 16])),
                ArrayD::from_elem(IxDyn(&[1, NUM_ANCHORS, 1]), -50.0),
            ])
        }
    }

    struct Unused(Vec<Option<usize>>);

    impl InferenceEngine for Unused {
        fn input_shape(&self) -> &[Option<usize>] {
            &self.0
        }

        fn run(&mut self, _input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, InferenceError> {
            Err(InferenceError::InferenceFailed("classifier should not run".into()))
        }
    }

    fn handle() -> EngineHandle {
        let detector = FaceDetector::new(
            Box::new(EmptyScene),
            AnchorTable::generate(DetectorVariant::Front),
            DetectorVariant::Front,
        )
        .unwrap();
        let gender_age = GenderAgeClassifier::new(
            Box::new(Unused(vec![None, Some(3), Some(96), Some(96)])),
            DEFAULT_NORMALIZATION,
        )
        .unwrap();
        let emotion =
            EmotionClassifier::new(Box::new(Unused(vec![None, Some(1), Some(48), Some(48)]))).unwrap();
        let analyzer = FaceAnalyzer::new(detector, gender_age, emotion);
        let info = ModelInfo::describe(&PipelineConfig::default(), &analyzer);
        spawn_with(analyzer, info).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_round_trip() {
        let engine = handle();
        let analysis = engine
            .analyze(RgbImage::new(32, 32), Thresholds::default())
            .await
            .unwrap();
        assert!(analysis.faces.is_empty());
        assert_eq!(engine.info().variant, DetectorVariant::Front);
        assert_eq!(engine.info().gender_age_mean, DEFAULT_NORMALIZATION.mean);
    }

    #[tokio::test]
    async fn test_pipeline_errors_propagate() {
        let engine = handle();
        let result = engine
            .analyze(
                RgbImage::new(32, 32),
                Thresholds { score: None, nms: Some(2.0) },
            )
            .await;
        assert!(matches!(
            result,
            Err(EngineError::Analyze(AnalyzeError::InvalidThreshold { .. }))
        ));
    }

    #[tokio::test]
    async fn test_handle_clones_share_thread() {
        let engine = handle();
        let other = engine.clone();
        let (a, b) = tokio::join!(
            engine.analyze(RgbImage::new(8, 8), Thresholds::default()),
            other.analyze(RgbImage::new(8, 8), Thresholds::default()),
        );
        assert!(a.is_ok() && b.is_ok());
    }
}
