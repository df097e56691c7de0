//! Merge detections with attribute-classifier results by position.

use crate::types::{AggregatedFaceResult, Detection, Emotion, EmotionLabel, EmotionPrediction, GenderAge};

/// Resolve a class index against an optional name list. Indices outside the
/// list, including the unknown sentinel, stay numeric.
pub fn resolve_label<S: AsRef<str>>(class_index: i32, labels: Option<&[S]>) -> EmotionLabel {
    labels
        .and_then(|names| usize::try_from(class_index).ok().and_then(|i| names.get(i)))
        .map(|name| EmotionLabel::Known(name.as_ref().to_string()))
        .unwrap_or(EmotionLabel::Index(class_index))
}

/// Zip detections with classifier outputs by index.
///
/// Classifiers that returned fewer rows than there are detections leave the
/// trailing faces without that attribute; extra rows are ignored.
pub fn aggregate<S: AsRef<str>>(
    detections: &[Detection],
    gender_age: &[GenderAge],
    emotions: &[EmotionPrediction],
    emotion_labels: Option<&[S]>,
) -> Vec<AggregatedFaceResult> {
    detections
        .iter()
        .enumerate()
        .map(|(i, det)| {
            let attrs = gender_age.get(i);
            let emotion = emotions.get(i).map(|pred| Emotion {
                label: resolve_label(pred.class_index, emotion_labels),
                confidence: pred.confidence,
                distribution: pred.distribution.clone(),
            });
            AggregatedFaceResult {
                bbox: det.bbox,
                score: det.score,
                keypoints: det.keypoints.to_vec(),
                gender: attrs.map(|a| a.gender),
                age_bucket: attrs.map(|a| a.age_bucket),
                emotion,
            }
        })
        .collect()
}
