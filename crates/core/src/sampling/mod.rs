//! The continuous webcam loop: a steady preview tick with emotion analysis
//! throttled to a fixed cadence, gated on confidence and debounced on the
//! last emotion that changed the music.

#[cfg(test)]
mod tests;

use crate::capture::{CaptureError, Frame, FrameSource, ScratchImage};
use crate::config::{ConfidenceGate, DispatchMode, SamplingConfig};
use crate::emotion::{DetectionError, DetectionResult, EmotionDetector, EmotionLabel, FaceObservation};
use crate::playback::{AudioEngine, PlaybackController};
use crate::present::{Command, Presenter};
use crate::tracks::TrackMapping;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

const LOG_TARGET: &str = "sampling";

#[derive(thiserror::Error, Debug)]
pub enum SamplingError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Mutable loop bookkeeping, owned by the loop and only touched from its task.
///
/// `analyzing` is set between dispatching an analysis and applying its
/// result, so at most one analysis is in flight.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SamplingState {
    pub last_emotion: Option<EmotionLabel>,
    pub last_analysis: Option<Instant>,
    pub analyzing: bool,
}

impl SamplingState {
    pub fn analysis_due(&self, now: Instant, cadence: std::time::Duration) -> bool {
        if self.analyzing {
            return false;
        }
        match self.last_analysis {
            None => true,
            Some(last) => now.saturating_duration_since(last) > cadence,
        }
    }
}

/// First face, in reported order, whose dominant emotion clears the gate and
/// differs from `last_emotion`. Later faces are not considered once one
/// qualifies, even if they score higher.
pub fn select_face<'a>(
    faces: &'a [FaceObservation],
    last_emotion: Option<&EmotionLabel>,
    gate: ConfidenceGate,
) -> Option<&'a FaceObservation> {
    faces
        .iter()
        .find(|face| gate.admits(face.confidence) && Some(&face.dominant_emotion) != last_emotion)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "detector panicked".to_owned())
}

struct AnalysisDone {
    result: Result<DetectionResult, DetectionError>,
    finished_at: Instant,
}

pub struct SamplingLoop<S: FrameSource, E: AudioEngine, P: Presenter> {
    source: S,
    detector: Arc<dyn EmotionDetector>,
    tracks: TrackMapping,
    player: PlaybackController<E>,
    presenter: P,
    scratch: ScratchImage,
    config: SamplingConfig,
    state: SamplingState,
    overlay: DetectionResult,
    results_tx: mpsc::Sender<AnalysisDone>,
    results_rx: mpsc::Receiver<AnalysisDone>,
    active: Arc<AtomicBool>,
    shut_down: bool,
}

impl<S: FrameSource, E: AudioEngine, P: Presenter> SamplingLoop<S, E, P> {
    pub fn new(
        source: S,
        detector: Arc<dyn EmotionDetector>,
        tracks: TrackMapping,
        player: PlaybackController<E>,
        presenter: P,
        scratch: ScratchImage,
        config: SamplingConfig,
    ) -> Self {
        // One analysis in flight at most, so one slot is enough.
        let (results_tx, results_rx) = mpsc::channel(1);
        Self {
            source,
            detector,
            tracks,
            player,
            presenter,
            scratch,
            config,
            state: SamplingState::default(),
            overlay: DetectionResult::default(),
            results_tx,
            results_rx,
            active: Arc::new(AtomicBool::new(true)),
            shut_down: false,
        }
    }

    pub fn state(&self) -> &SamplingState {
        &self.state
    }

    pub fn player(&self) -> &PlaybackController<E> {
        &self.player
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn overlay(&self) -> &DetectionResult {
        &self.overlay
    }

    /// Runs until the user quits or the camera fails. Playback is shut down
    /// on every exit; the camera is released when the loop is dropped.
    pub async fn run(mut self) -> Result<(), SamplingError> {
        tracing::info!(
            target: LOG_TARGET,
            tick_ms = self.config.tick.as_millis() as u64,
            interval_ms = self.config.cadence.interval_ms,
            threshold = self.config.gate.threshold(),
            dispatch = ?self.config.dispatch,
            "sampling loop started"
        );

        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let outcome = loop {
            ticker.tick().await;
            match self.step(Instant::now()).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        match &outcome {
            Ok(()) => tracing::info!(target: LOG_TARGET, "sampling loop stopped by user"),
            Err(e) => {
                tracing::error!(target: LOG_TARGET, error = %e, "sampling loop aborted");
                self.presenter.show_message("Failed to grab frame.");
            }
        }
        self.shutdown();
        outcome
    }

    /// One preview tick.
    pub async fn step(&mut self, now: Instant) -> Result<Flow, SamplingError> {
        let frame = self.source.grab()?;

        if let Ok(done) = self.results_rx.try_recv() {
            self.complete(done.result, done.finished_at);
        }

        if self.player.is_finished() {
            tracing::info!(target: LOG_TARGET, "track finished");
            self.player.stop();
        }

        let playback = self.player.snapshot();
        self.presenter.render(&frame, &self.overlay.faces, &playback);

        if self
            .state
            .analysis_due(now, self.config.cadence.duration())
        {
            self.dispatch(&frame, now).await;
        }

        while let Some(cmd) = self.presenter.poll_command() {
            if self.handle_command(cmd) == Flow::Quit {
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    /// Stops playback, releases the audio device and makes any in-flight
    /// analysis drop its result. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.active.store(false, Ordering::Release);
        self.player.shutdown();
    }

    async fn dispatch(&mut self, frame: &Frame, now: Instant) {
        let image = match self.scratch.write(frame) {
            Ok(path) => path.to_path_buf(),
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "failed to snapshot frame");
                self.presenter
                    .show_message(&format!("Error detecting emotion: {e}"));
                self.state.last_analysis = Some(now);
                return;
            }
        };

        self.state.analyzing = true;
        match self.config.dispatch {
            DispatchMode::Inline => {
                let result = self.detector.analyze(image).await;
                self.complete(result, now);
            }
            DispatchMode::Worker => {
                let detector = Arc::clone(&self.detector);
                let tx = self.results_tx.clone();
                let active = Arc::clone(&self.active);
                tokio::spawn(async move {
                    // A panicking detector still has to clear `analyzing`.
                    let result = AssertUnwindSafe(detector.analyze(image))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            tracing::error!(target: LOG_TARGET, "emotion detector panicked");
                            Err(DetectionError::Aborted(panic_message(panic.as_ref())))
                        });
                    if !active.load(Ordering::Acquire) {
                        tracing::debug!(target: LOG_TARGET, "discarding analysis finished after shutdown");
                        return;
                    }
                    let done = AnalysisDone {
                        result,
                        finished_at: Instant::now(),
                    };
                    if tx.send(done).await.is_err() {
                        tracing::debug!(target: LOG_TARGET, "loop gone before analysis finished");
                    }
                });
            }
        }
    }

    fn complete(&mut self, result: Result<DetectionResult, DetectionError>, finished_at: Instant) {
        self.state.analyzing = false;
        self.state.last_analysis = Some(finished_at);

        let detection = match result {
            Ok(detection) => detection,
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "emotion analysis failed");
                self.presenter
                    .show_message(&format!("Error detecting emotion: {e}"));
                return;
            }
        };

        for face in &detection.faces {
            tracing::debug!(
                target: LOG_TARGET,
                emotion = %face.dominant_emotion,
                confidence = face.confidence,
                "detected emotion"
            );
        }

        let selected = select_face(
            &detection.faces,
            self.state.last_emotion.as_ref(),
            self.config.gate,
        )
        .map(|face| face.dominant_emotion.clone());
        self.overlay = detection;

        if let Some(emotion) = selected {
            self.play_for(emotion);
        }
    }

    fn play_for(&mut self, emotion: EmotionLabel) {
        let icon = self.tracks.icon_for(&emotion);
        self.presenter.announce(&emotion, icon.as_deref());

        match self.tracks.resolve_playable(&emotion) {
            Ok(path) => {
                if let Err(e) = self.player.load_and_play(&path) {
                    self.presenter
                        .show_message(&format!("Error playing music: {e}"));
                }
            }
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "no playable track");
                self.presenter
                    .show_message(&format!("No music file for emotion: {emotion}"));
            }
        }

        // Recorded even when playback failed, so a broken track is not
        // retried on every cycle.
        self.state.last_emotion = Some(emotion);
    }

    fn handle_command(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::Quit => return Flow::Quit,
            Command::Pause => self.player.pause(),
            Command::Resume => self.player.resume(),
            // `last_emotion` survives, so only a new emotion restarts music.
            Command::Stop => self.player.stop(),
            Command::Capture => {
                tracing::debug!(target: LOG_TARGET, "capture has no effect in continuous mode");
            }
        }
        Flow::Continue
    }
}

impl<S: FrameSource, E: AudioEngine, P: Presenter> Drop for SamplingLoop<S, E, P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
