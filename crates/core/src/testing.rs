//! Fakes shared by the unit tests.

use crate::capture::{CaptureError, Frame, FrameSource};
use crate::emotion::{
    DetectionError, DetectionResult, EmotionDetector, EmotionLabel, FaceObservation, Region,
};
use crate::playback::{AudioEngine, PlaybackError, PlaybackState};
use crate::present::{Command, Presenter};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn face(emotion: &str, confidence: f32) -> FaceObservation {
    let label = EmotionLabel::parse(emotion);
    FaceObservation::new(
        Region {
            x: 10,
            y: 10,
            w: 50,
            h: 50,
        },
        label.clone(),
        BTreeMap::from([(label, confidence)]),
    )
}

pub fn faces(observations: Vec<FaceObservation>) -> Result<DetectionResult, DetectionError> {
    Ok(DetectionResult::new(observations))
}

#[derive(Debug, Default)]
pub struct CountingEngine {
    pub loads: Vec<PathBuf>,
    pub pauses: usize,
    pub resumes: usize,
    pub halts: usize,
    pub shutdowns: usize,
    pub elapsed: Duration,
    pub drained: bool,
    pub drain_on_start: bool,
    pub fail_next: bool,
}

impl CountingEngine {
    pub fn loads(&self) -> Vec<PathBuf> {
        self.loads.clone()
    }
}

impl AudioEngine for CountingEngine {
    fn start(&mut self, path: &Path) -> Result<(), PlaybackError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(PlaybackError::Decode {
                path: path.to_path_buf(),
                details: "scripted failure".to_owned(),
            });
        }
        self.loads.push(path.to_path_buf());
        self.elapsed = Duration::ZERO;
        self.drained = self.drain_on_start;
        Ok(())
    }

    fn pause(&mut self) {
        self.pauses += 1;
    }

    fn resume(&mut self) {
        self.resumes += 1;
    }

    fn halt(&mut self) {
        self.halts += 1;
    }

    fn elapsed(&self) -> Duration {
        self.elapsed
    }

    fn is_drained(&self) -> bool {
        self.drained
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
    }
}

/// Replays canned results, one per call; empty once the script runs out.
#[derive(Clone, Default)]
pub struct ScriptedDetector {
    script: Arc<Mutex<VecDeque<Result<DetectionResult, DetectionError>>>>,
    seen: Arc<Mutex<Vec<PathBuf>>>,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Result<DetectionResult, DetectionError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            seen: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn images(&self) -> Vec<PathBuf> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl EmotionDetector for ScriptedDetector {
    fn analyze(&self, image: PathBuf) -> BoxFuture<'_, Result<DetectionResult, DetectionError>> {
        async move {
            self.seen.lock().expect("seen lock").push(image);
            self.script
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or_else(|| Ok(DetectionResult::default()))
        }
        .boxed()
    }
}

/// Yields `remaining` small frames, then fails like an unplugged camera.
pub struct FakeFrames {
    pub remaining: usize,
    pub grabbed: usize,
}

impl FakeFrames {
    pub fn new(remaining: usize) -> Self {
        Self {
            remaining,
            grabbed: 0,
        }
    }
}

impl FrameSource for FakeFrames {
    fn grab(&mut self) -> Result<Frame, CaptureError> {
        if self.remaining == 0 {
            return Err(CaptureError::Frame("camera unplugged".to_owned()));
        }
        self.remaining -= 1;
        self.grabbed += 1;
        let shade = (self.grabbed % 256) as u8;
        Ok(Frame::filled(4, 4, [shade, shade, shade]))
    }
}

#[derive(Default)]
pub struct RecordingPresenter {
    pub commands: VecDeque<Command>,
    pub renders: usize,
    pub last_overlay: Vec<FaceObservation>,
    pub last_playback: PlaybackState,
    pub announced: Vec<EmotionLabel>,
    pub messages: Vec<String>,
}

impl RecordingPresenter {
    pub fn with_commands(commands: impl IntoIterator<Item = Command>) -> Self {
        Self {
            commands: commands.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl Presenter for RecordingPresenter {
    fn render(&mut self, _frame: &Frame, faces: &[FaceObservation], playback: &PlaybackState) {
        self.renders += 1;
        self.last_overlay = faces.to_vec();
        self.last_playback = playback.clone();
    }

    fn announce(&mut self, emotion: &EmotionLabel, _icon: Option<&Path>) {
        self.announced.push(emotion.clone());
    }

    fn show_message(&mut self, message: &str) {
        self.messages.push(message.to_owned());
    }

    fn poll_command(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }
}
