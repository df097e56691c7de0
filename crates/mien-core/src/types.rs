use serde::{Deserialize, Serialize};

/// Number of BlazeFace keypoints per detection.
pub const NUM_KEYPOINTS: usize = 6;

/// Keypoint roles in detector output order.
pub const KP_EYE_A: usize = 0;
pub const KP_EYE_B: usize = 1;
pub const KP_NOSE: usize = 2;
pub const KP_EAR_LEFT: usize = 4;
pub const KP_EAR_RIGHT: usize = 5;

/// Integer pixel box, corners inclusive and clamped to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl PixelBox {
    pub fn width(&self) -> i32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> i32 {
        self.ymax - self.ymin
    }
}

/// Integer pixel keypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: i32,
    pub y: i32,
}

/// A refined face detection in frame pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: PixelBox,
    pub score: f32,
    /// Six keypoints: two eyes (detector order), nose, mouth, two ear anchors.
    pub keypoints: [Keypoint; NUM_KEYPOINTS],
}

/// Score and NMS overrides for a single `analyze` call.
///
/// `None` falls back to the detector variant's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Thresholds {
    pub score: Option<f32>,
    pub nms: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeBucket {
    #[serde(rename = "0-18")]
    Child,
    #[serde(rename = "19-36")]
    YoungAdult,
    #[serde(rename = "37-60")]
    Adult,
    #[serde(rename = "60+")]
    Senior,
}

impl AgeBucket {
    /// Bucket an age in whole years.
    pub fn from_age(age: i32) -> Self {
        match age {
            i32::MIN..=18 => Self::Child,
            19..=36 => Self::YoungAdult,
            37..=60 => Self::Adult,
            _ => Self::Senior,
        }
    }
}

/// One gender/age classifier output row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenderAge {
    pub gender: Gender,
    pub age_bucket: AgeBucket,
}

/// Emotion class index reported for low-confidence predictions.
pub const EMOTION_UNKNOWN: i32 = -1;

/// One emotion classifier output row.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionPrediction {
    /// Predicted class, or [`EMOTION_UNKNOWN`] when below the confidence floor.
    pub class_index: i32,
    /// Probability of the top class (reported even when the class is unknown).
    pub confidence: f32,
    pub distribution: Vec<f32>,
}

/// Emotion label after resolution against an optional name list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmotionLabel {
    Known(String),
    Index(i32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emotion {
    pub label: EmotionLabel,
    pub confidence: f32,
    pub distribution: Vec<f32>,
}

/// Detection merged with whatever attribute classifiers produced for it.
///
/// Attributes are `None` when the matching classifier returned fewer rows than
/// there were detections; they are omitted from serialized output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedFaceResult {
    pub bbox: PixelBox,
    pub score: f32,
    pub keypoints: Vec<Keypoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_bucket: Option<AgeBucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,
}

/// Result of one `analyze` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceAnalysis {
    pub faces: Vec<AggregatedFaceResult>,
}

impl FaceAnalysis {
    pub fn into_report(self, filename: impl Into<String>) -> AnalysisReport {
        AnalysisReport {
            filename: filename.into(),
            face_count: self.faces.len(),
            faces: self.faces,
        }
    }
}

/// Response body for an analyzed upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub filename: String,
    pub face_count: usize,
    pub faces: Vec<AggregatedFaceResult>,
}
