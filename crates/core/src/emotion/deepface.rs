use crate::config::{ApiToken, DetectorConfig};
use crate::emotion::{
    DetectionError, DetectionResult, EmotionDetector, EmotionLabel, FaceObservation, Region,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for a DeepFace REST service (`POST /analyze`).
#[derive(Clone)]
pub struct DeepFaceDetector {
    client: Client,
    analyze_url: Url,
    token: Option<ApiToken>,
}

impl DeepFaceDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectionError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        // Appended as a segment so a path prefix like `/deepface` survives.
        let mut analyze_url = config.endpoint.clone();
        analyze_url
            .path_segments_mut()
            .map_err(|()| DetectionError::InvalidEndpoint(config.endpoint.to_string()))?
            .pop_if_empty()
            .push("analyze");

        Ok(Self {
            client,
            analyze_url,
            token: config.token.clone(),
        })
    }

    pub fn analyze_url(&self) -> &Url {
        &self.analyze_url
    }
}

#[derive(Serialize)]
struct AnalyzeRequest {
    img: String,
    actions: [&'static str; 1],
    enforce_detection: bool,
}

/// The service has answered with each of these shapes across versions.
#[derive(Deserialize)]
#[serde(untagged)]
enum AnalyzeResponse {
    Wrapped { results: Vec<RawFace> },
    Many(Vec<RawFace>),
    One(RawFace),
}

#[derive(Deserialize)]
struct RawFace {
    dominant_emotion: String,
    #[serde(default)]
    emotion: HashMap<String, f32>,
    #[serde(default)]
    region: RawRegion,
}

#[derive(Deserialize, Default)]
struct RawRegion {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    w: f64,
    #[serde(default)]
    h: f64,
}

impl From<RawFace> for FaceObservation {
    fn from(raw: RawFace) -> Self {
        let scores: BTreeMap<EmotionLabel, f32> = raw
            .emotion
            .into_iter()
            .map(|(label, score)| (EmotionLabel::parse(&label), score))
            .collect();
        let region = Region {
            x: raw.region.x.round() as i32,
            y: raw.region.y.round() as i32,
            w: raw.region.w.round() as i32,
            h: raw.region.h.round() as i32,
        };
        FaceObservation::new(region, EmotionLabel::parse(&raw.dominant_emotion), scores)
    }
}

pub fn parse_analyze_response(body: &str) -> Result<DetectionResult, DetectionError> {
    let response: AnalyzeResponse = serde_json::from_str(body)
        .map_err(|e| DetectionError::InvalidResponse(format!("failed to parse JSON: {e}")))?;

    let faces = match response {
        AnalyzeResponse::Wrapped { results } | AnalyzeResponse::Many(results) => results,
        AnalyzeResponse::One(face) => vec![face],
    };

    Ok(DetectionResult::new(
        faces.into_iter().map(FaceObservation::from).collect(),
    ))
}

fn image_data_uri(path: &Path, bytes: &[u8]) -> String {
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    };
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

impl EmotionDetector for DeepFaceDetector {
    fn analyze(&self, image: PathBuf) -> BoxFuture<'_, Result<DetectionResult, DetectionError>> {
        async move {
            let bytes = tokio::fs::read(&image)
                .await
                .map_err(|source| DetectionError::ReadImage {
                    path: image.clone(),
                    source,
                })?;

            let request = AnalyzeRequest {
                img: image_data_uri(&image, &bytes),
                actions: ["emotion"],
                enforce_detection: false,
            };

            let mut builder = self.client.post(self.analyze_url.clone()).json(&request);
            if let Some(token) = &self.token {
                builder = builder.bearer_auth(token.expose());
            }

            let response = builder.send().await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(DetectionError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let result = parse_analyze_response(&body)?;
            tracing::debug!(
                faces = result.faces.len(),
                image = %image.display(),
                "deepface analysis finished"
            );
            Ok(result)
        }
        .boxed()
    }
}
