#[cfg(feature = "webcam")]
mod webcam;

use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

#[cfg(feature = "webcam")]
pub use webcam::WebcamSource;

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("failed to open camera: {0}")]
    Open(String),

    #[error("failed to grab frame: {0}")]
    Frame(String),

    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("failed to write snapshot {}: {details}", .path.display())]
    Snapshot { path: PathBuf, details: String },
}

/// Packed RGB8 image, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Uniform-colour frame; handy for placeholders and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = (width as usize) * (height as usize);
        Self::new(rgb.repeat(pixels), width, height)
    }
}

/// A camera, or anything else that yields frames on demand.
pub trait FrameSource {
    fn grab(&mut self) -> Result<Frame, CaptureError>;
}

/// Fixed on-disk location the detector reads frames from.
///
/// Each write encodes to a temporary sibling and renames it into place, so
/// only the latest frame is ever on disk and a reader never sees a partially
/// written file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScratchImage {
    path: PathBuf,
}

impl ScratchImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, frame: &Frame) -> Result<&Path, CaptureError> {
        let snapshot_err = |details: String| CaptureError::Snapshot {
            path: self.path.clone(),
            details,
        };

        let image = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| {
                snapshot_err(format!(
                    "frame buffer of {} bytes does not match {}x{} RGB",
                    frame.data.len(),
                    frame.width,
                    frame.height
                ))
            })?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut encoded = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)
            .map_err(|e| snapshot_err(e.to_string()))?;

        std::fs::write(&tmp, &encoded)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                snapshot_err(e.to_string())
            })?;

        Ok(self.path.as_path())
    }
}
