//! Capture once, classify once, play one track to the end.

use crate::capture::{CaptureError, FrameSource, ScratchImage};
use crate::emotion::{DetectionResult, EmotionDetector, EmotionLabel};
use crate::playback::{AudioEngine, PlaybackController, PlaybackState};
use crate::present::{Command, Presenter};
use crate::tracks::TrackMapping;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

const LOG_TARGET: &str = "single_shot";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShotOutcome {
    /// The track played out.
    Finished,
    /// The user stopped or quit before the end.
    Stopped,
    /// Neither the mapped track nor the fallback exists.
    NoTrack,
    PlaybackFailed,
}

pub struct SingleShot<E: AudioEngine, P: Presenter> {
    detector: Arc<dyn EmotionDetector>,
    tracks: TrackMapping,
    player: PlaybackController<E>,
    presenter: P,
    poll_interval: Duration,
}

impl<E: AudioEngine, P: Presenter> SingleShot<E, P> {
    pub fn new(
        detector: Arc<dyn EmotionDetector>,
        tracks: TrackMapping,
        player: PlaybackController<E>,
        presenter: P,
    ) -> Self {
        Self {
            detector,
            tracks,
            player,
            presenter,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn player(&self) -> &PlaybackController<E> {
        &self.player
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// Shows a live preview until the user asks for a capture, then writes
    /// that frame to `scratch`. `None` means the user quit instead.
    pub async fn capture<S: FrameSource>(
        &mut self,
        source: &mut S,
        scratch: &ScratchImage,
        tick: Duration,
    ) -> Result<Option<PathBuf>, CaptureError> {
        self.presenter
            .show_message("Press Enter to capture image, q to quit.");
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let idle = PlaybackState::default();

        loop {
            ticker.tick().await;
            let frame = source.grab()?;
            self.presenter.render(&frame, &[], &idle);

            while let Some(cmd) = self.presenter.poll_command() {
                match cmd {
                    Command::Capture => {
                        let path = scratch.write(&frame)?;
                        tracing::info!(target: LOG_TARGET, path = %path.display(), "captured image");
                        return Ok(Some(path.to_path_buf()));
                    }
                    Command::Quit => return Ok(None),
                    Command::Pause | Command::Resume | Command::Stop => {}
                }
            }
        }
    }

    /// Dominant emotion of the first reported face. Falls back to happy when
    /// analysis fails or finds nobody.
    pub async fn classify(&mut self, image: PathBuf) -> EmotionLabel {
        match self.detector.analyze(image).await {
            Ok(result) => self.first_emotion(result),
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "emotion analysis failed");
                self.presenter
                    .show_message(&format!("Error detecting emotion: {e}"));
                self.presenter
                    .show_message("Falling back to 'happy' emotion.");
                EmotionLabel::Happy
            }
        }
    }

    fn first_emotion(&mut self, result: DetectionResult) -> EmotionLabel {
        match result.first() {
            Some(face) => {
                tracing::info!(
                    target: LOG_TARGET,
                    emotion = %face.dominant_emotion,
                    confidence = face.confidence,
                    faces = result.faces.len(),
                    "detected emotion"
                );
                face.dominant_emotion.clone()
            }
            None => {
                self.presenter
                    .show_message("No face detected. Falling back to 'happy' emotion.");
                EmotionLabel::Happy
            }
        }
    }

    /// Plays the track for `emotion` and waits until it ends or the user
    /// stops it. Playback is released before returning.
    pub async fn play(&mut self, emotion: &EmotionLabel) -> ShotOutcome {
        let icon = self.tracks.icon_for(emotion);
        self.presenter.announce(emotion, icon.as_deref());

        let outcome = match self.tracks.resolve_playable(emotion) {
            Ok(path) => match self.player.load_and_play(&path) {
                Ok(()) => {
                    self.presenter
                        .show_message("Enter q or s to stop before the music ends.");
                    self.wait_for_end().await
                }
                Err(e) => {
                    self.presenter
                        .show_message(&format!("Error playing music: {e}"));
                    ShotOutcome::PlaybackFailed
                }
            },
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "no playable track");
                self.presenter
                    .show_message(&format!("No music file for emotion: {emotion}"));
                ShotOutcome::NoTrack
            }
        };

        self.player.shutdown();
        outcome
    }

    /// Classifies `image` and plays the matching track.
    pub async fn run(&mut self, image: PathBuf) -> ShotOutcome {
        let emotion = self.classify(image).await;
        self.play(&emotion).await
    }

    async fn wait_for_end(&mut self) -> ShotOutcome {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            while let Some(cmd) = self.presenter.poll_command() {
                match cmd {
                    Command::Pause => self.player.pause(),
                    Command::Resume => self.player.resume(),
                    Command::Stop | Command::Quit => {
                        self.player.stop();
                        self.presenter.show_message("Music stopped by user.");
                        return ShotOutcome::Stopped;
                    }
                    Command::Capture => {}
                }
            }
            if self.player.is_finished() {
                tracing::info!(target: LOG_TARGET, "track finished");
                return ShotOutcome::Finished;
            }
        }
    }
}
