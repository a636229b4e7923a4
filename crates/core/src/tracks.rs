//! Emotion to audio track lookup.
//!
//! Every mapping carries a `happy` entry, which doubles as the fallback for
//! unmapped labels and for mapped files that are missing on disk.

use crate::emotion::EmotionLabel;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "tracks";

/// Built-in assignments, relative to the music directory.
const BUILTIN_TABLE: [(EmotionLabel, &str); 7] = [
    (EmotionLabel::Happy, "happy.mp3"),
    (EmotionLabel::Sad, "sad.mp3"),
    (EmotionLabel::Angry, "anger.mp3"),
    (EmotionLabel::Surprise, "happy.mp3"),
    (EmotionLabel::Neutral, "neutral.mp3"),
    (EmotionLabel::Fear, "fear.mp3"),
    (EmotionLabel::Disgust, "anger.mp3"),
];

#[derive(thiserror::Error, Debug)]
pub enum TrackError {
    #[error("no playable track for emotion {emotion} (fallback {} is missing too)", .fallback.display())]
    NoTrackAvailable {
        emotion: EmotionLabel,
        fallback: PathBuf,
    },

    #[error("track mapping has no \"happy\" entry")]
    MissingFallback,

    #[error("failed to read track mapping {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid track mapping {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackMapping {
    tracks: BTreeMap<EmotionLabel, PathBuf>,
    fallback: PathBuf,
    icon_dir: Option<PathBuf>,
}

impl TrackMapping {
    pub fn new(tracks: BTreeMap<EmotionLabel, PathBuf>) -> Result<Self, TrackError> {
        let fallback = tracks
            .get(&EmotionLabel::Happy)
            .cloned()
            .ok_or(TrackError::MissingFallback)?;
        Ok(Self {
            tracks,
            fallback,
            icon_dir: None,
        })
    }

    pub fn builtin(music_dir: &Path) -> Self {
        let tracks: BTreeMap<EmotionLabel, PathBuf> = BUILTIN_TABLE
            .into_iter()
            .map(|(label, file)| (label, music_dir.join(file)))
            .collect();
        let fallback = music_dir.join("happy.mp3");
        Self {
            tracks,
            fallback,
            icon_dir: None,
        }
    }

    /// Loads a `{"<emotion>": "<file>"}` table. Relative files are resolved
    /// against `music_dir`.
    pub fn from_json_file(path: &Path, music_dir: &Path) -> Result<Self, TrackError> {
        let raw = std::fs::read_to_string(path).map_err(|source| TrackError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let table: BTreeMap<String, PathBuf> =
            serde_json::from_str(&raw).map_err(|source| TrackError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let tracks = table
            .into_iter()
            .map(|(label, file)| (EmotionLabel::parse(&label), music_dir.join(file)))
            .collect();
        Self::new(tracks)
    }

    pub fn with_icon_dir(mut self, icon_dir: impl Into<PathBuf>) -> Self {
        self.icon_dir = Some(icon_dir.into());
        self
    }

    pub fn fallback(&self) -> &Path {
        &self.fallback
    }

    pub fn get(&self, label: &EmotionLabel) -> Option<&Path> {
        self.tracks.get(label).map(PathBuf::as_path)
    }

    /// Mapped path for `label`, or the happy fallback when the label is
    /// unmapped or its file does not exist. Always returns a path; the
    /// fallback itself may still be missing.
    pub fn resolve(&self, label: &str) -> PathBuf {
        self.resolve_label(&EmotionLabel::parse(label))
    }

    pub fn resolve_label(&self, label: &EmotionLabel) -> PathBuf {
        match self.tracks.get(label) {
            Some(path) if path.exists() => path.clone(),
            Some(path) => {
                tracing::info!(
                    target: LOG_TARGET,
                    emotion = %label,
                    missing = %path.display(),
                    "mapped track missing, using fallback"
                );
                self.fallback.clone()
            }
            None => {
                tracing::info!(
                    target: LOG_TARGET,
                    emotion = %label,
                    "no mapping for emotion, using fallback"
                );
                self.fallback.clone()
            }
        }
    }

    /// Like [`resolve_label`](Self::resolve_label), but also verifies the
    /// result exists.
    pub fn resolve_playable(&self, label: &EmotionLabel) -> Result<PathBuf, TrackError> {
        let path = self.resolve_label(label);
        if path.exists() {
            Ok(path)
        } else {
            Err(TrackError::NoTrackAvailable {
                emotion: label.clone(),
                fallback: path,
            })
        }
    }

    /// `<icon_dir>/<emotion>.png`, when present.
    pub fn icon_for(&self, label: &EmotionLabel) -> Option<PathBuf> {
        let icon = self
            .icon_dir
            .as_ref()?
            .join(format!("{}.png", label.as_str()));
        icon.exists().then_some(icon)
    }
}
