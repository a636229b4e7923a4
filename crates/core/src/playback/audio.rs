use crate::playback::{AudioEngine, PlaybackError};
use rodio::cpal::traits::DeviceTrait;
use rodio::cpal::traits::HostTrait;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, StreamError};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

/// A value created on first use and kept until explicitly taken.
///
/// [`rodio::OutputStream`] must outlive every sink connected to it, and opening
/// a second stream per track makes Rodio tear down the first one mid-playback.
/// `init` therefore runs at most once per open/close cycle.
struct LazyInit<T> {
    value: Option<T>,
}

impl<T> LazyInit<T> {
    fn new() -> Self {
        Self { value: None }
    }

    fn get_or_try_init<E>(&mut self, init: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        let value = match self.value.take() {
            Some(v) => v,
            None => init()?,
        };
        Ok(&*self.value.insert(value))
    }

    fn is_initialized(&self) -> bool {
        self.value.is_some()
    }

    fn take(&mut self) -> Option<T> {
        self.value.take()
    }
}

/// Plays tracks from disk through Rodio. One sink per track on a shared,
/// lazily opened output stream.
pub struct RodioAudioEngine {
    output_device_name: Option<String>,
    output_stream: LazyInit<OutputStream>,
    output_stream_open_attempts: usize,
    disabled_details: Option<String>,
    sink: Option<Sink>,
}

impl RodioAudioEngine {
    pub fn new() -> Self {
        Self {
            output_device_name: None,
            output_stream: LazyInit::new(),
            output_stream_open_attempts: 0,
            disabled_details: None,
            sink: None,
        }
    }

    pub fn with_output_device_name<S: Into<String>>(mut self, name: S) -> Self {
        self.output_device_name = Some(name.into());
        self
    }

    fn open_output_stream(
        output_device_name: Option<&str>,
        attempt: usize,
    ) -> Result<OutputStream, PlaybackError> {
        tracing::debug!(
            attempt,
            device = %output_device_name.unwrap_or("<default>"),
            "opening audio output"
        );

        let Some(wanted) = output_device_name else {
            return open_default_stream(None, "open default output stream");
        };

        let failure = match open_named_output_stream(wanted) {
            Ok(stream) => return Ok(stream),
            Err(failure) => failure,
        };
        let (reason, available) = match &failure {
            NamedDeviceStreamError::DeviceNotFound { available } => {
                ("device not found".to_owned(), available)
            }
            NamedDeviceStreamError::OpenFailed { error, available } => {
                (error.to_string(), available)
            }
        };
        tracing::warn!(
            wanted_device = %wanted,
            reason = %reason,
            available_devices = %format_device_list(available),
            "configured output device unusable, playing through the default device"
        );
        open_default_stream(Some(wanted), "default device fallback")
    }

    fn connect_sink(&mut self) -> Result<Sink, PlaybackError> {
        if let Some(details) = &self.disabled_details {
            return Err(PlaybackError::AudioOutputUnavailable {
                details: details.clone(),
            });
        }

        let device = self.output_device_name.clone();
        let attempts = &mut self.output_stream_open_attempts;
        let result = self.output_stream.get_or_try_init(|| {
            *attempts += 1;
            Self::open_output_stream(device.as_deref(), *attempts)
        });

        match result {
            Ok(stream) => Ok(Sink::connect_new(stream.mixer())),
            Err(e) => {
                if let PlaybackError::AudioOutputUnavailable { details } = &e {
                    if details.contains("NoDevice") {
                        self.disabled_details = Some(details.clone());
                    }
                }
                Err(e)
            }
        }
    }
}

impl Default for RodioAudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEngine for RodioAudioEngine {
    fn start(&mut self, path: &Path) -> Result<(), PlaybackError> {
        self.halt();

        let file = File::open(path).map_err(|source| PlaybackError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| PlaybackError::Decode {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;

        let sink = self.connect_sink()?;
        sink.append(source);
        sink.play();
        self.sink = Some(sink);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn resume(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    fn halt(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }

    fn elapsed(&self) -> Duration {
        self.sink
            .as_ref()
            .map(Sink::get_pos)
            .unwrap_or(Duration::ZERO)
    }

    fn is_drained(&self) -> bool {
        self.sink.as_ref().map(Sink::empty).unwrap_or(true)
    }

    fn shutdown(&mut self) {
        self.halt();
        if self.output_stream.is_initialized() {
            tracing::debug!("closing Rodio OutputStream");
        }
        drop(self.output_stream.take());
    }
}

#[derive(Debug)]
enum NamedDeviceStreamError {
    DeviceNotFound { available: Vec<String> },
    OpenFailed { error: StreamError, available: Vec<String> },
}

fn open_default_stream(wanted: Option<&str>, context: &str) -> Result<OutputStream, PlaybackError> {
    OutputStreamBuilder::open_default_stream().map_err(|e| PlaybackError::AudioOutputUnavailable {
        details: format_stream_error_details(e, wanted, context),
    })
}

fn normalize_device_name(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

fn open_named_output_stream(wanted: &str) -> Result<OutputStream, NamedDeviceStreamError> {
    let wanted_norm = normalize_device_name(wanted);

    let host = rodio::cpal::default_host();
    let devices = host.output_devices().ok();
    let mut available: Vec<String> = Vec::new();
    let mut selected = None;

    if let Some(devices) = devices {
        for d in devices {
            let name = d.name().unwrap_or_else(|_| "<unnamed>".to_owned());
            if selected.is_none() && normalize_device_name(&name) == wanted_norm {
                selected = Some(d);
            }
            available.push(name);
        }
    }

    let Some(device) = selected else {
        return Err(NamedDeviceStreamError::DeviceNotFound { available });
    };

    OutputStreamBuilder::from_device(device)
        .and_then(|builder| builder.open_stream_or_fallback())
        .map_err(|error| NamedDeviceStreamError::OpenFailed { error, available })
}

fn format_device_list(devices: &[String]) -> String {
    if devices.is_empty() {
        return "<unknown>".to_owned();
    }
    devices.join(", ")
}

fn format_stream_error_details(err: StreamError, wanted: Option<&str>, context: &str) -> String {
    let mut s = format!("{context}: {err}");
    if let Some(w) = wanted {
        s.push_str(&format!(" (configured_device={w})"));
    }
    #[cfg(feature = "playback-device-enum")]
    {
        if let Ok(devices) = enumerate_output_device_names() {
            if devices.is_empty() {
                s.push_str("; available_output_devices=<none>");
            } else {
                s.push_str("; available_output_devices=");
                s.push_str(&devices.join(", "));
            }
        }
    }
    s
}

#[cfg(feature = "playback-device-enum")]
pub fn enumerate_output_device_names() -> Result<Vec<String>, PlaybackError> {
    let host = rodio::cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| PlaybackError::AudioOutputUnavailable {
            details: format!("failed to list output devices: {e}"),
        })?;

    Ok(devices
        .map(|d| d.name().unwrap_or_else(|_| "<unnamed>".to_owned()))
        .collect())
}
