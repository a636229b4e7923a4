use crate::capture::Frame;
use crate::emotion::{EmotionLabel, FaceObservation};
use crate::playback::{PlaybackState, PlaybackStatus};
use crate::present::{Command, Presenter};
use std::fmt::Write as _;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tokio::sync::mpsc;

/// Terminal front end: a single rewritten status line plus commands typed on
/// stdin, one per line.
pub struct ConsolePresenter<W = io::Stderr> {
    out: W,
    commands: mpsc::UnboundedReceiver<Command>,
    last_status: String,
}

impl ConsolePresenter<io::Stderr> {
    /// Reads stdin on a dedicated thread and hands commands to the loop
    /// through a channel. The thread is detached; it ends with the process or
    /// when stdin closes.
    pub fn spawn_stdin() -> io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("console-input".to_owned())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    match Command::parse(&line) {
                        Some(cmd) => {
                            if tx.send(cmd).is_err() {
                                break;
                            }
                        }
                        None => tracing::debug!(input = %line.trim(), "ignoring unknown command"),
                    }
                }
            })?;
        Ok(Self::with_channel(io::stderr(), rx))
    }
}

impl<W: Write> ConsolePresenter<W> {
    pub fn with_channel(out: W, commands: mpsc::UnboundedReceiver<Command>) -> Self {
        Self {
            out,
            commands,
            last_status: String::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn print_help(&mut self, capture_enabled: bool) {
        let capture = if capture_enabled {
            ", Enter = capture"
        } else {
            ""
        };
        let _ = writeln!(
            self.out,
            "Commands: q = quit, p = pause, r = resume, s = stop{capture}"
        );
    }

    fn write_line(&mut self, text: &str) {
        if !self.last_status.is_empty() {
            let _ = writeln!(self.out);
            self.last_status.clear();
        }
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

fn status_line(faces: &[FaceObservation], playback: &PlaybackState) -> String {
    let mut line = String::new();
    if faces.is_empty() {
        line.push_str("no face");
    } else {
        for (i, face) in faces.iter().enumerate() {
            if i > 0 {
                line.push_str(", ");
            }
            let r = face.region;
            let _ = write!(
                line,
                "{} {:.0}% [{},{} {}x{}]",
                face.dominant_emotion, face.confidence, r.x, r.y, r.w, r.h
            );
        }
    }

    let marker = match playback.status {
        PlaybackStatus::Idle => "■",
        PlaybackStatus::Playing => "▶",
        PlaybackStatus::Paused => "⏸",
    };
    let _ = write!(line, " | {marker} {}", playback.format_timeline());
    if let Some(name) = playback
        .current_track
        .as_deref()
        .and_then(Path::file_name)
    {
        let _ = write!(line, " {}", name.to_string_lossy());
    }
    line
}

impl<W: Write> Presenter for ConsolePresenter<W> {
    fn render(&mut self, _frame: &Frame, faces: &[FaceObservation], playback: &PlaybackState) {
        let status = status_line(faces, playback);
        if status == self.last_status {
            return;
        }
        let _ = write!(self.out, "\r\x1b[2K{status}");
        let _ = self.out.flush();
        self.last_status = status;
    }

    fn announce(&mut self, emotion: &EmotionLabel, icon: Option<&Path>) {
        let text = match icon {
            Some(icon) => format!(
                "Detected Emotion: {} ({})",
                emotion.title(),
                icon.display()
            ),
            None => format!("Detected Emotion: {}", emotion.title()),
        };
        self.write_line(&text);
    }

    fn show_message(&mut self, message: &str) {
        self.write_line(message);
    }

    fn poll_command(&mut self) -> Option<Command> {
        self.commands.try_recv().ok()
    }
}
