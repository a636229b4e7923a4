use crate::capture::{CaptureError, Frame, FrameSource};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

/// The system's default camera (index 0).
///
/// The stream is opened on construction and stopped when the source is
/// dropped, so every exit path of the owning loop releases the device.
pub struct WebcamSource {
    camera: Camera,
}

impl WebcamSource {
    pub fn open_default() -> Result<Self, CaptureError> {
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(0), requested).map_err(|e| {
            CaptureError::Open(format!(
                "{e}. Make sure a camera is connected, not used by another app, and permitted"
            ))
        })?;
        camera
            .open_stream()
            .map_err(|e| CaptureError::Open(e.to_string()))?;

        let res = camera.resolution();
        tracing::info!(
            camera = %camera.info().human_name(),
            width = res.width(),
            height = res.height(),
            "camera stream opened"
        );
        Ok(Self { camera })
    }
}

impl FrameSource for WebcamSource {
    fn grab(&mut self) -> Result<Frame, CaptureError> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| CaptureError::Frame(e.to_string()))?;
        let image = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::Decode(e.to_string()))?;

        let (width, height) = (image.width(), image.height());
        Ok(Frame::new(image.into_raw(), width, height))
    }
}

impl Drop for WebcamSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!(error = %e, "error stopping camera stream");
        } else {
            tracing::debug!("camera stream released");
        }
    }
}
