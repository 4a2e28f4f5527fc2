//! Motion-JPEG elementary stream: one baseline JPEG per frame, back to back.
//! No container; see [`super::avi`] for the playable variant.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage, RgbaImage};

use super::{EncoderSink, SinkFactory};
use crate::error::RecordingError;

pub struct MjpegFileSink {
    writer: BufWriter<File>,
    quality: u8,
}

impl MjpegFileSink {
    pub fn create(path: &Path, quality: u8) -> Result<Self, RecordingError> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
            quality: quality.clamp(1, 100),
        })
    }
}

/// Encode one frame as a baseline JPEG into `out`.
pub(crate) fn encode_jpeg<W: Write>(
    frame: &RgbaImage,
    quality: u8,
    out: &mut W,
) -> Result<(), RecordingError> {
    // JPEG has no alpha channel
    let rgb: RgbImage = frame.convert();
    JpegEncoder::new_with_quality(out, quality)
        .encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| RecordingError::Encoder(e.to_string()))
}

impl EncoderSink for MjpegFileSink {
    fn draw(&mut self, frame: &RgbaImage) -> Result<(), RecordingError> {
        encode_jpeg(frame, self.quality, &mut self.writer)
    }

    fn finish(self: Box<Self>) -> Result<(), RecordingError> {
        let file = self
            .writer
            .into_inner()
            .map_err(|e| RecordingError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MjpegSinkFactory {
    quality: u8,
}

impl MjpegSinkFactory {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

impl Default for MjpegSinkFactory {
    fn default() -> Self {
        Self::new(85)
    }
}

impl SinkFactory for MjpegSinkFactory {
    fn extension(&self) -> &'static str {
        "mjpeg"
    }

    fn create(
        &self,
        _width: u32,
        _height: u32,
        path: &Path,
    ) -> Result<Box<dyn EncoderSink>, RecordingError> {
        Ok(Box::new(MjpegFileSink::create(path, self.quality)?))
    }
}

/// Split an MJPEG stream back into its frames by start-of-image markers.
pub fn frame_offsets(stream: &[u8]) -> Vec<usize> {
    stream
        .windows(3)
        .enumerate()
        .filter(|(_, w)| *w == [0xFF, 0xD8, 0xFF])
        .map(|(i, _)| i)
        .collect()
}
