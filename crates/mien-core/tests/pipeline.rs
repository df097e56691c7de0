//! End-to-end analyzer runs over scripted inference engines.

use image::RgbImage;
use mien_core::anchors::{AnchorTable, NUM_ANCHORS};
use mien_core::decoder::ROW_WIDTH;
use mien_core::detector::FaceDetector;
use mien_core::emotion::EmotionClassifier;
use mien_core::gender_age::GenderAgeClassifier;
use mien_core::normalization::DEFAULT_NORMALIZATION;
use mien_core::{
    AgeBucket, AnalysisObserver, AnalyzeError, DetectorVariant, EmotionLabel, FaceAnalyzer, Gender,
    InferenceEngine, InferenceError, PipelineEvent, Thresholds,
};
use ndarray::{Array4, ArrayD, IxDyn};
use std::sync::{Arc, Mutex};

/// Replays fixed detector outputs.
struct DetectorOutputs(Vec<ArrayD<f32>>);

impl InferenceEngine for DetectorOutputs {
    fn input_shape(&self) -> &[Option<usize>] {
        &[None, Some(3), Some(128), Some(128)]
    }

    fn run(&mut self, _input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, InferenceError> {
        Ok(self.0.clone())
    }
}

/// Emits `rows` copies of `row` regardless of batch size.
struct RowEngine {
    shape: Vec<Option<usize>>,
    row: Vec<f32>,
    rows: Option<usize>,
}

impl InferenceEngine for RowEngine {
    fn input_shape(&self) -> &[Option<usize>] {
        &self.shape
    }

    fn run(&mut self, input: Array4<f32>) -> Result<Vec<ArrayD<f32>>, InferenceError> {
        let n = self.rows.unwrap_or(input.dim().0);
        let flat: Vec<f32> = (0..n).flat_map(|_| self.row.iter().copied()).collect();
        ArrayD::from_shape_vec(IxDyn(&[n, self.row.len()]), flat)
            .map(|out| vec![out])
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))
    }
}

#[derive(Clone, Default)]
struct SharedLog(Arc<Mutex<Vec<PipelineEvent>>>);

impl AnalysisObserver for SharedLog {
    fn on_event(&self, event: &PipelineEvent) {
        if let Ok(mut log) = self.0.lock() {
            log.push(event.clone());
        }
    }
}

/// Two well-separated frontal faces in anchor slots 0 and 1, each anchored
/// at the frame center with offsets in 128-px units.
fn detector_outputs(face_count: usize) -> Vec<ArrayD<f32>> {
    let mut boxes = ArrayD::<f32>::zeros(IxDyn(&[1, NUM_ANCHORS, ROW_WIDTH]));
    let mut scores = ArrayD::<f32>::from_elem(IxDyn(&[1, NUM_ANCHORS, 1]), -100.0);
    let centers_x = [-32.0f32, 32.0];
    for (slot, cx) in centers_x.iter().take(face_count).enumerate() {
        boxes[[0, slot, 0]] = *cx;
        boxes[[0, slot, 2]] = 40.0;
        boxes[[0, slot, 3]] = 40.0;
        let kp_x = [-8.0, 8.0, 0.0, 0.0, -18.0, 18.0];
        let kp_y = [-6.0, -6.0, 2.0, 10.0, -2.0, -2.0];
        for k in 0..6 {
            boxes[[0, slot, 4 + 2 * k]] = cx + kp_x[k];
            boxes[[0, slot, 5 + 2 * k]] = kp_y[k];
        }
        scores[[0, slot, 0]] = 8.0;
    }
    vec![boxes, scores]
}

fn analyzer(face_count: usize, gender_rows: Option<usize>) -> FaceAnalyzer {
    let anchors = AnchorTable::from_rows(&vec![vec![0.5, 0.5, 1.0, 1.0]; NUM_ANCHORS]).unwrap();
    let detector = FaceDetector::new(
        Box::new(DetectorOutputs(detector_outputs(face_count))),
        anchors,
        DetectorVariant::Front,
    )
    .unwrap();

    let gender_age = GenderAgeClassifier::new(
        Box::new(RowEngine {
            shape: vec![None, Some(3), Some(96), Some(96)],
            row: vec![0.1, 0.9, 0.45],
            rows: gender_rows,
        }),
        DEFAULT_NORMALIZATION,
    )
    .unwrap();

    let mut logits = vec![0.0f32; 7];
    logits[3] = 4.0;
    let emotion = EmotionClassifier::new(Box::new(RowEngine {
        shape: vec![Some(1), Some(1), Some(48), Some(48)],
        row: logits,
        rows: None,
    }))
    .unwrap();

    FaceAnalyzer::new(detector, gender_age, emotion)
}

#[test]
fn test_two_faces_fully_attributed() {
    let mut analyzer = analyzer(2, None);
    let analysis = analyzer
        .analyze(&RgbImage::new(256, 128), Thresholds::default())
        .unwrap();

    assert_eq!(analysis.faces.len(), 2);
    for face in &analysis.faces {
        assert_eq!(face.gender, Some(Gender::Male));
        assert_eq!(face.age_bucket, Some(AgeBucket::Adult));
        let emotion = face.emotion.as_ref().unwrap();
        assert_eq!(emotion.label, EmotionLabel::Known("happy".into()));
        assert!(emotion.confidence > 0.5);
        assert_eq!(emotion.distribution.len(), 7);
        assert_eq!(face.keypoints.len(), 6);
        assert!(face.bbox.xmin < face.bbox.xmax);
        assert!(face.bbox.ymin < face.bbox.ymax);
    }

    let json = serde_json::to_value(&analysis).unwrap();
    assert_eq!(json["faces"][0]["gender"], "male");
    assert_eq!(json["faces"][0]["age_bucket"], "37-60");
    assert_eq!(json["faces"][1]["emotion"]["label"], "happy");
}

#[test]
fn test_no_detections_short_circuits() {
    let mut analyzer = analyzer(0, None);
    let analysis = analyzer
        .analyze(&RgbImage::new(64, 64), Thresholds::default())
        .unwrap();
    assert_eq!(serde_json::to_string(&analysis).unwrap(), r#"{"faces":[]}"#);
}

#[test]
fn test_short_classifier_output_leaves_face_bare() {
    let mut analyzer = analyzer(2, Some(1));
    let analysis = analyzer
        .analyze(&RgbImage::new(256, 128), Thresholds::default())
        .unwrap();
    assert_eq!(analysis.faces.len(), 2);
    assert!(analysis.faces[0].gender.is_some());
    assert!(analysis.faces[1].gender.is_none());
    assert!(analysis.faces[1].emotion.is_some());

    let json = serde_json::to_value(&analysis.faces[1]).unwrap();
    assert!(json.get("age_bucket").is_none());
}

#[test]
fn test_raw_indices_without_labels() {
    let mut analyzer = analyzer(1, None).with_emotion_labels(None);
    let analysis = analyzer
        .analyze(&RgbImage::new(256, 128), Thresholds::default())
        .unwrap();
    let emotion = analysis.faces[0].emotion.as_ref().unwrap();
    assert_eq!(emotion.label, EmotionLabel::Index(3));
}

#[test]
fn test_invalid_threshold_rejected() {
    let mut analyzer = analyzer(1, None);
    let result = analyzer.analyze(
        &RgbImage::new(64, 64),
        Thresholds { score: Some(1.2), nms: None },
    );
    assert!(matches!(
        result,
        Err(AnalyzeError::InvalidThreshold { name: "score", .. })
    ));
}

#[test]
fn test_default_thresholds_apply() {
    let mut analyzer = analyzer(2, None).with_default_thresholds(Thresholds {
        score: Some(1.0),
        nms: None,
    });
    let analysis = analyzer
        .analyze(&RgbImage::new(256, 128), Thresholds::default())
        .unwrap();
    assert!(analysis.faces.is_empty());

    let analysis = analyzer
        .analyze(
            &RgbImage::new(256, 128),
            Thresholds { score: Some(0.5), nms: None },
        )
        .unwrap();
    assert_eq!(analysis.faces.len(), 2);
}

#[test]
fn test_observer_reports_classifiers() {
    let log = SharedLog::default();
    let mut analyzer = analyzer(2, None).with_observer(Box::new(log.clone()));
    analyzer
        .analyze(&RgbImage::new(256, 128), Thresholds::default())
        .unwrap();

    let events = log.0.lock().unwrap();
    let refined = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::FaceRefined { .. }))
        .count();
    assert_eq!(refined, 2);
    let classifiers: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::ClassifierCompleted { classifier, results, .. } => {
                Some((*classifier, *results))
            }
            _ => None,
        })
        .collect();
    assert_eq!(classifiers, vec![("gender_age", 2), ("emotion", 2)]);
}
