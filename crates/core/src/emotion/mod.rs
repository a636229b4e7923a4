mod deepface;
mod detector;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use deepface::{parse_analyze_response, DeepFaceDetector};
pub use detector::{DetectionError, EmotionDetector};

/// Facial emotion label as reported by the analysis service.
///
/// Input is case- and whitespace-insensitive. Labels outside the seven known
/// ones are kept (normalized) in `Unknown` so that two different unknown
/// labels still compare as different emotions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EmotionLabel {
    Happy,
    Sad,
    Angry,
    Surprise,
    Neutral,
    Fear,
    Disgust,
    Unknown(String),
}

impl EmotionLabel {
    pub const KNOWN: [EmotionLabel; 7] = [
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Angry,
        EmotionLabel::Surprise,
        EmotionLabel::Neutral,
        EmotionLabel::Fear,
        EmotionLabel::Disgust,
    ];

    pub fn normalize(raw: &str) -> String {
        raw.trim().to_lowercase()
    }

    pub fn parse(raw: &str) -> Self {
        let key = Self::normalize(raw);
        match key.as_str() {
            "happy" => Self::Happy,
            "sad" => Self::Sad,
            "angry" => Self::Angry,
            "surprise" => Self::Surprise,
            "neutral" => Self::Neutral,
            "fear" => Self::Fear,
            "disgust" => Self::Disgust,
            _ => Self::Unknown(key),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Surprise => "surprise",
            Self::Neutral => "neutral",
            Self::Fear => "fear",
            Self::Disgust => "disgust",
            Self::Unknown(key) => key,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// `Sad` -> `"Sad"`, for status lines.
    pub fn title(&self) -> String {
        let mut chars = self.as_str().chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EmotionLabel {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for EmotionLabel {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<EmotionLabel> for String {
    fn from(label: EmotionLabel) -> Self {
        label.as_str().to_owned()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub region: Region,
    pub dominant_emotion: EmotionLabel,
    /// Score of `dominant_emotion`, 0..=100.
    pub confidence: f32,
    pub all_scores: BTreeMap<EmotionLabel, f32>,
}

impl FaceObservation {
    /// Builds an observation whose confidence is the dominant label's own
    /// score, or 0 when the score table does not mention it.
    pub fn new(
        region: Region,
        dominant_emotion: EmotionLabel,
        all_scores: BTreeMap<EmotionLabel, f32>,
    ) -> Self {
        let confidence = all_scores.get(&dominant_emotion).copied().unwrap_or(0.0);
        Self {
            region,
            dominant_emotion,
            confidence,
            all_scores,
        }
    }
}

/// Faces found by one analysis call, in the order the service reported them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub faces: Vec<FaceObservation>,
}

impl DetectionResult {
    pub fn new(faces: Vec<FaceObservation>) -> Self {
        Self { faces }
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn first(&self) -> Option<&FaceObservation> {
        self.faces.first()
    }
}
