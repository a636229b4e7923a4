use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};
use url::Url;

pub const DEFAULT_MUSIC_DIR: &str = "musics";
pub const DEFAULT_ICON_DIR: &str = "icons";
pub const DEFAULT_SCRATCH_IMAGE: &str = "captured_face.jpg";
pub const DEFAULT_DETECTOR_URL: &str = "http://127.0.0.1:5005";
pub const DEFAULT_ANALYSIS_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 50.0;
pub const DEFAULT_TICK_MS: u64 = 30;
pub const DEFAULT_PLACEHOLDER_DURATION_SECS: u64 = 100;
pub const ENV_MUSIC_DIR: &str = "MOODPLAYER_MUSIC_DIR";
pub const ENV_ICON_DIR: &str = "MOODPLAYER_ICON_DIR";
pub const ENV_MAPPING: &str = "MOODPLAYER_MAPPING";
pub const ENV_DETECTOR_URL: &str = "MOODPLAYER_DETECTOR_URL";
pub const ENV_DETECTOR_TOKEN: &str = "MOODPLAYER_DETECTOR_TOKEN";
pub const ENV_OUTPUT_DEVICE: &str = "MOODPLAYER_OUTPUT_DEVICE";

/// Which of the two front-end flows to run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Mode {
    Continuous,
    SingleShot,
}

impl Mode {
    /// Maps the menu answer (`1` or `2`) to a mode. Anything else is `None`.
    pub fn from_choice(choice: &str) -> Option<Self> {
        match choice.trim() {
            "1" => Some(Self::Continuous),
            "2" => Some(Self::SingleShot),
            _ => None,
        }
    }
}

/// Where emotion analysis runs relative to the preview loop.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum DispatchMode {
    /// Analysis blocks the loop for its full duration.
    #[default]
    Inline,
    /// Analysis runs on a background task; results are handed back to the loop.
    Worker,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        Ok(Self(v))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(**redacted**)")
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisCadence {
    pub interval_ms: u64,
}

impl AnalysisCadence {
    pub fn new(interval_ms: u64) -> Result<Self, ConfigError> {
        if interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(Self { interval_ms })
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for AnalysisCadence {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_ANALYSIS_INTERVAL_MS,
        }
    }
}

/// Minimum dominant-emotion score (0..=100) an observation must exceed.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceGate(f32);

impl ConfidenceGate {
    pub fn new(threshold: f32) -> Result<Self, ConfigError> {
        if !threshold.is_finite() || !(0.0..=100.0).contains(&threshold) {
            return Err(ConfigError::ThresholdOutOfRange(threshold));
        }
        Ok(Self(threshold))
    }

    pub fn threshold(&self) -> f32 {
        self.0
    }

    /// Strictly greater than the threshold.
    pub fn admits(&self, confidence: f32) -> bool {
        confidence > self.0
    }
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SamplingConfig {
    pub cadence: AnalysisCadence,
    pub gate: ConfidenceGate,
    pub tick: Duration,
    pub dispatch: DispatchMode,
}

impl SamplingConfig {
    pub fn with_tick_ms(mut self, tick_ms: u64) -> Result<Self, ConfigError> {
        if tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        self.tick = Duration::from_millis(tick_ms);
        Ok(self)
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            cadence: AnalysisCadence::default(),
            gate: ConfidenceGate::default(),
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            dispatch: DispatchMode::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectorConfig {
    pub endpoint: Url,
    pub token: Option<ApiToken>,
}

impl DetectorConfig {
    pub fn new(endpoint: &str, token: Option<ApiToken>) -> Result<Self, ConfigError> {
        let endpoint = Url::parse(endpoint).map_err(|e| ConfigError::InvalidDetectorUrl {
            url: endpoint.to_owned(),
            details: e.to_string(),
        })?;
        Ok(Self { endpoint, token })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Track length reported when the file carries no usable length metadata.
    pub placeholder_duration: Duration,
    pub output_device: Option<String>,
    pub mute: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            placeholder_duration: Duration::from_secs(DEFAULT_PLACEHOLDER_DURATION_SECS),
            output_device: None,
            mute: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryConfig {
    pub music_dir: PathBuf,
    pub icon_dir: PathBuf,
    pub mapping_file: Option<PathBuf>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            music_dir: PathBuf::from(DEFAULT_MUSIC_DIR),
            icon_dir: PathBuf::from(DEFAULT_ICON_DIR),
            mapping_file: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub mode: Option<Mode>,
    pub library: LibraryConfig,
    pub detector: DetectorConfig,
    pub sampling: SamplingConfig,
    pub playback: PlaybackConfig,
    pub scratch_image: PathBuf,
    pub still_image: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("api token must not be empty")]
    EmptyToken,
    #[error("analysis interval must be > 0 ms")]
    ZeroInterval,
    #[error("preview tick must be > 0 ms")]
    ZeroTick,
    #[error("confidence threshold must be within 0..=100, got {0}")]
    ThresholdOutOfRange(f32),
    #[error("invalid detector url {url}: {details}")]
    InvalidDetectorUrl { url: String, details: String },
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_token(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Result<Option<ApiToken>, ConfigError> {
    match cli_value {
        Some(v) => Ok(Some(ApiToken::new(v)?)),
        None => match env.var(env_key) {
            Some(v) => Ok(Some(ApiToken::new(v)?)),
            None => Ok(None),
        },
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match cli_value {
        Some(v) => Some(v),
        None => env.var(env_key),
    }
}

pub fn resolve_path_with_default(
    cli_value: Option<PathBuf>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> PathBuf {
    match cli_value {
        Some(p) => p,
        None => PathBuf::from(env.var(env_key).unwrap_or_else(|| default.to_owned())),
    }
}
