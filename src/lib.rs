pub mod capture;
pub mod detect;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod processors;
pub mod recording;

use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use color_eyre::{eyre::eyre, Result};
use recording::EncoderKind;
use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameMetadata, RawFrame, Rotation};
pub use pipeline::{FramePipeline, ProcessorRegistry, SavePath};
pub use processors::{ProcessorKind, StageContext};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix for environment overrides, e.g. `ANYCAM__RECORDING__FPS=15`
const ENV_PREFIX: &str = "ANYCAM";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub processors: ProcessorsConfig,
    pub save: SaveConfig,
    pub recording: RecordingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// Sensor mounting, clockwise degrees
    pub rotation: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long the host waits for a display update before redrawing the old one
    pub display_wait_ms: u64,
    /// Host logs the per-stage timings of every display update
    pub enable_profiling: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorsConfig {
    /// Registry order; kinds not listed are registered disabled after these
    pub order: Vec<ProcessorSetting>,
    /// Image shown in the review list for stages with dummy preview on
    pub placeholder_image: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorSetting {
    pub key: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub dummy_preview: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl ProcessorSetting {
    pub fn new(key: impl Into<String>, enabled: bool) -> Self {
        Self {
            key: key.into(),
            enabled,
            dummy_preview: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    pub output_dir: PathBuf,
    /// File name prefix; blank means `capture_<unix millis>`
    pub base_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub output_dir: PathBuf,
    pub encoder: EncoderKind,
    pub jpeg_quality: u8,
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Rgba8,
            rotation: 0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            display_wait_ms: 100,
            enable_profiling: false,
        }
    }
}

impl Default for ProcessorsConfig {
    fn default() -> Self {
        Self {
            order: vec![
                ProcessorSetting::new("raw", true),
                ProcessorSetting::new("face", false),
                ProcessorSetting::new("pose", false),
                ProcessorSetting::new("tongue", false),
                ProcessorSetting::new("wink", false),
            ],
            placeholder_image: None,
        }
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("captures"),
            base_name: String::new(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            encoder: EncoderKind::Avi,
            jpeg_quality: 85,
            fps: 30,
        }
    }
}

impl Config {
    /// Defaults, then `path` if it exists, then `ANYCAM__SECTION__KEY`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| eyre!("failed to read configuration: {e}"))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| eyre!("invalid configuration: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        capture::Rotation::from_degrees(self.capture.rotation)?;
        if self.recording.fps == 0 {
            return Err(eyre!("recording.fps must be positive"));
        }
        if !(1..=100).contains(&self.recording.jpeg_quality) {
            return Err(eyre!("recording.jpeg_quality must be within 1..=100"));
        }
        Ok(())
    }
}
