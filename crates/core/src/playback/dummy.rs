use crate::media::probe_duration;
use crate::playback::{AudioEngine, PlaybackError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Silent engine for `--mute` runs and machines without an output device.
///
/// Keeps a pause-aware clock per track and reports the track as drained once
/// its probed length has elapsed. Tracks of unknown length never drain.
#[derive(Debug, Default)]
pub struct DummyAudioEngine {
    current: Option<PathBuf>,
    length: Option<Duration>,
    started_at: Option<Instant>,
    played_before_pause: Duration,
}

impl DummyAudioEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_track(&self) -> Option<&Path> {
        self.current.as_deref()
    }
}

impl AudioEngine for DummyAudioEngine {
    fn start(&mut self, path: &Path) -> Result<(), PlaybackError> {
        if !path.exists() {
            return Err(PlaybackError::Open {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        self.current = Some(path.to_path_buf());
        self.length = probe_duration(path);
        self.started_at = Some(Instant::now());
        self.played_before_pause = Duration::ZERO;
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(started) = self.started_at.take() {
            self.played_before_pause += started.elapsed();
        }
    }

    fn resume(&mut self) {
        if self.current.is_some() && self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    fn halt(&mut self) {
        *self = Self::default();
    }

    fn elapsed(&self) -> Duration {
        self.played_before_pause
            + self
                .started_at
                .map(|started| started.elapsed())
                .unwrap_or(Duration::ZERO)
    }

    fn is_drained(&self) -> bool {
        match (&self.current, self.length) {
            (None, _) => true,
            (Some(_), Some(length)) => self.elapsed() >= length,
            (Some(_), None) => false,
        }
    }

    fn shutdown(&mut self) {
        self.halt();
    }
}
