mod console;

use crate::capture::Frame;
use crate::emotion::{EmotionLabel, FaceObservation};
use crate::playback::PlaybackState;
use std::path::Path;

pub use console::ConsolePresenter;

/// User input relayed from the presentation layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Quit,
    Pause,
    Resume,
    Stop,
    Capture,
}

impl Command {
    /// Short console words: `q`, `p`, `r`, `s`, `c`. An empty line captures.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "q" | "quit" | "exit" => Some(Self::Quit),
            "p" | "pause" => Some(Self::Pause),
            "r" | "resume" => Some(Self::Resume),
            "s" | "stop" => Some(Self::Stop),
            "" | "c" | "capture" => Some(Self::Capture),
            _ => None,
        }
    }
}

/// Renders frames and status, and forwards user commands.
///
/// Implementations are driven from the loop's thread only.
pub trait Presenter {
    /// Called once per preview tick with the latest frame and the most recent
    /// (possibly stale) face overlay.
    fn render(&mut self, frame: &Frame, faces: &[FaceObservation], playback: &PlaybackState);

    fn announce(&mut self, emotion: &EmotionLabel, icon: Option<&Path>);

    fn show_message(&mut self, message: &str);

    fn poll_command(&mut self) -> Option<Command>;
}
