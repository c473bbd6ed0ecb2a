use crate::format::{EncoderConfig, EncodingFormat, EncodingParamKey};
use anyhow::{Context, anyhow};
use std::env;
use std::path::PathBuf;

pub use common::Environment;

const DEVICE_PREFIX: &str = "device:";
const DEFAULT_JPEG_QUALITY: i32 = 95;

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    File(PathBuf),
    Device(usize),
}

impl SourceSpec {
    /// `device:<index>` selects a camera, anything else is a file path.
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().strip_prefix(DEVICE_PREFIX) {
            Some(index) => index
                .parse()
                .map(SourceSpec::Device)
                .with_context(|| format!("invalid device index in CAPTURE_SOURCE: {value}")),
            None if value.trim().is_empty() => Err(anyhow!("CAPTURE_SOURCE is empty")),
            None => Ok(SourceSpec::File(PathBuf::from(value.trim()))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub environment: Environment,
    pub source: SourceSpec,
    pub format: EncodingFormat,
    pub jpeg_quality: i32,
    pub looping: bool,
    pub emulate_device: bool,
    pub output_path: Option<PathBuf>,
    pub record_path: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag(name: &str, default: bool) -> bool {
    match var(name).map(|v| v.trim().to_lowercase()) {
        Some(v) => matches!(v.as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

impl CaptureConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let source = match var("CAPTURE_SOURCE") {
            Some(value) => SourceSpec::parse(&value)?,
            None => SourceSpec::Device(0),
        };

        let format = match var("ENCODING_FORMAT") {
            Some(value) => value.parse().map_err(|e: String| anyhow!(e))?,
            None => EncodingFormat::default(),
        };

        let jpeg_quality = var("JPEG_QUALITY")
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or(DEFAULT_JPEG_QUALITY)
            .clamp(0, 100);

        Ok(Self {
            environment,
            source,
            format,
            jpeg_quality,
            looping: flag("PLAYBACK_LOOP", true),
            emulate_device: flag("EMULATE_DEVICE", false),
            output_path: var("OUTPUT_PATH").map(PathBuf::from),
            record_path: var("RECORD_PATH").map(PathBuf::from),
            otel_endpoint: var("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig::new(self.format).with_param(EncodingParamKey::JpegQuality, self.jpeg_quality)
    }
}
