use bytes::Bytes;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::FormatError;

/// Raw sensor frame as delivered by the camera source.
///
/// The pixel data is shared (`Bytes`), so ingestion can read it without
/// copying or mutating the caller's buffer.
#[derive(Clone)]
pub struct RawFrame {
    pub data: Bytes,
    pub meta: FrameMetadata,
    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

impl RawFrame {
    pub fn new(data: impl Into<Bytes>, meta: FrameMetadata) -> Self {
        Self {
            data: data.into(),
            meta,
            timestamp: Instant::now(),
        }
    }

    /// Wrap an already decoded RGBA buffer.
    pub fn from_rgba(image: RgbaImage, sequence: u64, rotation: Rotation) -> Self {
        let meta = FrameMetadata {
            sequence,
            width: image.width(),
            height: image.height(),
            format: PixelFormat::Rgba8,
            rotation,
        };
        Self::new(image.into_raw(), meta)
    }
}

/// Frame metadata
#[derive(Debug, Clone, Copy)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub rotation: Rotation,
}

/// Pixel formats we ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8,
    Rgb24,
    Bgr24,
    Yuyv4,
    Nv12,
    Nv21,
    Mjpeg,
}

/// Clockwise sensor rotation needed to make the frame upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Result<Self, FormatError> {
        match degrees.rem_euclid(360) {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            _ => Err(FormatError::Rotation(degrees)),
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

/// Upright RGBA frame owned by whichever stage currently holds it.
///
/// Buffers are released when the owning value drops; stages that hand back
/// a new buffer never need to free the old one by hand.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbaImage,
    pub sequence: u64,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(image: RgbaImage, sequence: u64, timestamp: Instant) -> Self {
        Self {
            image,
            sequence,
            timestamp,
        }
    }

    /// Same metadata, different pixels. Used by stages that draw on a copy.
    pub fn with_image(&self, image: RgbaImage) -> Self {
        Self {
            image,
            sequence: self.sequence,
            timestamp: self.timestamp,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_accepts_only_quarter_turns() {
        assert_eq!(Rotation::from_degrees(0).unwrap(), Rotation::Deg0);
        assert_eq!(Rotation::from_degrees(270).unwrap(), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(-90).unwrap(), Rotation::Deg270);
        assert!(matches!(
            Rotation::from_degrees(45),
            Err(FormatError::Rotation(45))
        ));
    }
}
