//! Error taxonomy for the frame pipeline.
//!
//! Per-frame and per-stage errors are contained where they happen and turned
//! into a status signal; only recording start/stop failures reach the host as
//! explicit results.

use std::path::PathBuf;

use thiserror::Error;

use crate::capture::frame::PixelFormat;

/// The raw sensor buffer could not be turned into an upright RGBA frame.
/// Fatal for that frame only; the next frame is processed independently.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unsupported pixel layout: {0}")]
    Unsupported(String),
    #[error("{format:?} buffer holds {actual} bytes, expected {expected}")]
    BufferSize {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
    #[error("{format:?} requires even dimensions, got {width}x{height}")]
    Dimensions {
        format: PixelFormat,
        width: u32,
        height: u32,
    },
    #[error("unsupported rotation: {0} degrees")]
    Rotation(i32),
    #[error("failed to decode frame: {0}")]
    Decode(String),
}

/// Failure inside one processor stage. The chain executor recovers by
/// treating the stage as a pass-through with status `false`.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage {stage} is not ready: {reason}")]
    NotReady { stage: &'static str, reason: String },
    #[error("stage {stage} panicked: {message}")]
    Panicked {
        stage: &'static str,
        message: String,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Region extraction could not produce a sample. Dependent classification is
/// treated as "unknown".
#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("landmark set has no index {index} (len {len})")]
    MissingLandmark { index: usize, len: usize },
    #[error("reference points coincide, region has no extent")]
    Degenerate,
    #[error("crop {size}x{size} at ({x}, {y}) exceeds {width}x{height} frame")]
    OutOfBounds {
        x: i64,
        y: i64,
        size: u32,
        width: u32,
        height: u32,
    },
}

/// Failure reported by an external landmark or classification engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine not initialized")]
    Unavailable,
    #[error("engine lock poisoned")]
    Poisoned,
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Encoder or container failure on start, draw or finalize.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("no frames were written to {0}")]
    Empty(PathBuf),
    #[error("frame is {got_width}x{got_height}, recording is {width}x{height}")]
    FrameSize {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
    #[error("encoder error: {0}")]
    Encoder(String),
    #[error("pipeline worker is not running")]
    WorkerGone,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A registry operation referred to a processor key that is not registered.
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("unknown processor key: {0}")]
    UnknownKey(String),
    #[error("processor {0} is not registered")]
    NotRegistered(&'static str),
}

/// Writing captured stills to disk failed.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("save task did not complete: {0}")]
    Join(String),
}
