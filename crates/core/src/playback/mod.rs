mod audio;
mod dummy;

use crate::media::{format_clock, probe_duration};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use audio::RodioAudioEngine;
pub use dummy::DummyAudioEngine;

#[cfg(feature = "playback-device-enum")]
pub use audio::enumerate_output_device_names;

#[derive(thiserror::Error, Debug)]
pub enum PlaybackError {
    #[error("audio output unavailable: {details}")]
    AudioOutputUnavailable { details: String },

    #[error("failed to open track {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode track {}: {details}", .path.display())]
    Decode { path: PathBuf, details: String },
}

/// The device side of playback. One engine per process.
pub trait AudioEngine {
    /// Replaces whatever is playing with `path`, starting from the beginning.
    fn start(&mut self, path: &Path) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn halt(&mut self);
    /// Position within the current track.
    fn elapsed(&self) -> Duration;
    /// True when the current track has played out.
    fn is_drained(&self) -> bool;
    /// Releases the output device. Safe to call more than once.
    fn shutdown(&mut self);
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
    Paused,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaybackState {
    pub current_track: Option<PathBuf>,
    pub status: PlaybackStatus,
    pub position: Duration,
    pub duration: Duration,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        self.status != PlaybackStatus::Idle
    }

    pub fn is_paused(&self) -> bool {
        self.status == PlaybackStatus::Paused
    }

    pub fn format_timeline(&self) -> String {
        if self.status == PlaybackStatus::Idle {
            return "00:00 / 00:00".to_owned();
        }
        format!(
            "{} / {}",
            format_clock(self.position),
            format_clock(self.duration)
        )
    }
}

/// Idle -> Playing -> {Paused <-> Playing} -> Idle.
pub struct PlaybackController<E> {
    engine: E,
    state: PlaybackState,
    placeholder_duration: Duration,
}

impl<E: AudioEngine> PlaybackController<E> {
    pub fn new(engine: E, placeholder_duration: Duration) -> Self {
        Self {
            engine,
            state: PlaybackState::default(),
            placeholder_duration,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    #[cfg(test)]
    pub(crate) fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status
    }

    /// Stops any current track and starts `path`. On failure the controller
    /// is left Idle.
    pub fn load_and_play(&mut self, path: &Path) -> Result<(), PlaybackError> {
        self.stop();

        if let Err(e) = self.engine.start(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to start track");
            return Err(e);
        }

        let duration = probe_duration(path).unwrap_or_else(|| {
            tracing::debug!(
                path = %path.display(),
                placeholder_secs = self.placeholder_duration.as_secs(),
                "track length unknown, using placeholder"
            );
            self.placeholder_duration
        });

        self.state = PlaybackState {
            current_track: Some(path.to_path_buf()),
            status: PlaybackStatus::Playing,
            position: Duration::ZERO,
            duration,
        };
        tracing::info!(path = %path.display(), duration_secs = duration.as_secs(), "playing");
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state.status == PlaybackStatus::Playing {
            self.engine.pause();
            self.state.status = PlaybackStatus::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state.status == PlaybackStatus::Paused {
            self.engine.resume();
            self.state.status = PlaybackStatus::Playing;
        }
    }

    pub fn stop(&mut self) {
        self.engine.halt();
        self.state = PlaybackState::default();
    }

    pub fn query_position(&self) -> Duration {
        match self.state.status {
            PlaybackStatus::Idle => Duration::ZERO,
            PlaybackStatus::Playing | PlaybackStatus::Paused => self.engine.elapsed(),
        }
    }

    /// True once the track has played out on its own. An explicit `stop`
    /// leaves the controller Idle, which never counts as finished.
    pub fn is_finished(&self) -> bool {
        self.state.status == PlaybackStatus::Playing && self.engine.is_drained()
    }

    /// Current state with a fresh position.
    pub fn snapshot(&self) -> PlaybackState {
        PlaybackState {
            position: self.query_position(),
            ..self.state.clone()
        }
    }

    pub fn shutdown(&mut self) {
        self.stop();
        self.engine.shutdown();
    }
}
