use crate::emotion::DetectionResult;
use futures::future::BoxFuture;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum DetectionError {
    #[error("failed to read image {}: {source}", .path.display())]
    ReadImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid detector endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("detector request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("detector returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid detector response: {0}")]
    InvalidResponse(String),

    #[error("analysis aborted: {0}")]
    Aborted(String),
}

/// Facial emotion analysis over an image on disk.
///
/// Implementations should degrade to an empty result for faceless or
/// low-quality input. Callers treat `Err` and an empty face list alike: no
/// usable observation this cycle.
pub trait EmotionDetector: Send + Sync {
    fn analyze(&self, image: PathBuf) -> BoxFuture<'_, Result<DetectionResult, DetectionError>>;
}
