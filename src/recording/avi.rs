//! Motion-JPEG in an AVI (RIFF) container.
//!
//! Layout: `RIFF AVI { LIST hdrl { avih, LIST strl { strh, strf } }, LIST movi
//! { 00dc* }, idx1 }`. Sizes and frame counts are unknown until the last frame,
//! so `finish` seeks back and patches them.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use image::RgbaImage;
use tracing::debug;

use super::mjpeg::encode_jpeg;
use super::{EncoderSink, SinkFactory};
use crate::error::RecordingError;

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const VIDEO_CHUNK: &[u8; 4] = b"00dc";
const INDEX_ENTRY_LEN: u32 = 16;

/// File offsets of header fields that are filled in on `finish`
#[derive(Debug, Clone, Copy)]
struct Patches {
    riff_size: u64,
    total_frames: u64,
    suggested_buffer: u64,
    stream_length: u64,
    stream_buffer: u64,
    movi_size: u64,
    /// Position of the `movi` fourcc; index offsets are relative to it
    movi_start: u64,
}

struct IndexEntry {
    offset: u32,
    size: u32,
}

pub struct AviMjpegSink {
    writer: BufWriter<File>,
    quality: u8,
    patches: Patches,
    /// Bytes written so far
    position: u64,
    index: Vec<IndexEntry>,
    largest_frame: u32,
    jpeg: Vec<u8>,
}

impl AviMjpegSink {
    pub fn create(
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
        quality: u8,
    ) -> Result<Self, RecordingError> {
        if width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(RecordingError::Encoder(format!(
                "AVI cannot hold {width}x{height} frames"
            )));
        }
        let (header, patches) = header(width, height, fps.max(1));
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&header)?;

        Ok(Self {
            writer,
            quality: quality.clamp(1, 100),
            patches,
            position: header.len() as u64,
            index: Vec::new(),
            largest_frame: 0,
            jpeg: Vec::new(),
        })
    }

    fn patch(&mut self, at: u64, value: u32) -> Result<(), RecordingError> {
        self.writer.seek(SeekFrom::Start(at))?;
        self.writer.write_all(&value.to_le_bytes())?;
        Ok(())
    }
}

impl EncoderSink for AviMjpegSink {
    fn draw(&mut self, frame: &RgbaImage) -> Result<(), RecordingError> {
        self.jpeg.clear();
        encode_jpeg(frame, self.quality, &mut self.jpeg)?;

        let size = u32::try_from(self.jpeg.len())
            .map_err(|_| RecordingError::Encoder("JPEG frame too large".into()))?;
        let padded = 8 + size as u64 + (size as u64 & 1);
        let offset = u32::try_from(self.position - self.patches.movi_start)
            .ok()
            .filter(|o| (*o as u64) + padded < u32::MAX as u64)
            .ok_or_else(|| RecordingError::Encoder("AVI file would exceed 4 GiB".into()))?;

        self.writer.write_all(VIDEO_CHUNK)?;
        self.writer.write_all(&size.to_le_bytes())?;
        self.writer.write_all(&self.jpeg)?;
        // Chunks are word aligned
        if size & 1 == 1 {
            self.writer.write_all(&[0])?;
        }

        self.index.push(IndexEntry { offset, size });
        self.largest_frame = self.largest_frame.max(size);
        self.position += padded;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), RecordingError> {
        let index_start = self.position;
        let index_len = INDEX_ENTRY_LEN * self.index.len() as u32;
        let mut index = Vec::with_capacity(8 + index_len as usize);
        index.extend_from_slice(b"idx1");
        put_u32(&mut index, index_len);
        for entry in &self.index {
            index.extend_from_slice(VIDEO_CHUNK);
            put_u32(&mut index, AVIIF_KEYFRAME);
            put_u32(&mut index, entry.offset);
            put_u32(&mut index, entry.size);
        }
        self.writer.write_all(&index)?;
        let end = index_start + index.len() as u64;

        let frames = self.index.len() as u32;
        let largest = self.largest_frame;
        let p = self.patches;
        self.patch(p.riff_size, (end - 8) as u32)?;
        self.patch(p.total_frames, frames)?;
        self.patch(p.suggested_buffer, largest)?;
        self.patch(p.stream_length, frames)?;
        self.patch(p.stream_buffer, largest)?;
        self.patch(p.movi_size, (index_start - p.movi_start) as u32)?;
        debug!(frames, bytes = end, "avi finalized");

        let file = self
            .writer
            .into_inner()
            .map_err(|e| RecordingError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Open a chunk or list, returning the position of its size field.
fn open(buf: &mut Vec<u8>, tag: &[u8; 4]) -> usize {
    buf.extend_from_slice(tag);
    let at = buf.len();
    put_u32(buf, 0);
    at
}

/// Fill in the size of a chunk opened at `at`.
fn close(buf: &mut [u8], at: usize) {
    let size = (buf.len() - at - 4) as u32;
    buf[at..at + 4].copy_from_slice(&size.to_le_bytes());
}

fn header(width: u32, height: u32, fps: u32) -> (Vec<u8>, Patches) {
    let mut h = Vec::with_capacity(256);

    let riff_size = open(&mut h, b"RIFF");
    h.extend_from_slice(b"AVI ");

    let hdrl = open(&mut h, b"LIST");
    h.extend_from_slice(b"hdrl");

    let avih = open(&mut h, b"avih");
    put_u32(&mut h, 1_000_000 / fps);
    put_u32(&mut h, 0); // max bytes per second
    put_u32(&mut h, 0); // padding granularity
    put_u32(&mut h, AVIF_HASINDEX);
    let total_frames = h.len();
    put_u32(&mut h, 0);
    put_u32(&mut h, 0); // initial frames
    put_u32(&mut h, 1); // streams
    let suggested_buffer = h.len();
    put_u32(&mut h, 0);
    put_u32(&mut h, width);
    put_u32(&mut h, height);
    for _ in 0..4 {
        put_u32(&mut h, 0);
    }
    close(&mut h, avih);

    let strl = open(&mut h, b"LIST");
    h.extend_from_slice(b"strl");

    let strh = open(&mut h, b"strh");
    h.extend_from_slice(b"vids");
    h.extend_from_slice(b"MJPG");
    put_u32(&mut h, 0); // flags
    put_u16(&mut h, 0); // priority
    put_u16(&mut h, 0); // language
    put_u32(&mut h, 0); // initial frames
    put_u32(&mut h, 1); // scale
    put_u32(&mut h, fps); // rate
    put_u32(&mut h, 0); // start
    let stream_length = h.len();
    put_u32(&mut h, 0);
    let stream_buffer = h.len();
    put_u32(&mut h, 0);
    put_u32(&mut h, u32::MAX); // default quality
    put_u32(&mut h, 0); // sample size, varies
    put_u16(&mut h, 0);
    put_u16(&mut h, 0);
    put_u16(&mut h, width as u16);
    put_u16(&mut h, height as u16);
    close(&mut h, strh);

    // BITMAPINFOHEADER
    let strf = open(&mut h, b"strf");
    put_u32(&mut h, 40);
    put_u32(&mut h, width);
    put_u32(&mut h, height);
    put_u16(&mut h, 1); // planes
    put_u16(&mut h, 24); // bits per pixel
    h.extend_from_slice(b"MJPG");
    put_u32(&mut h, width * height * 3);
    for _ in 0..4 {
        put_u32(&mut h, 0);
    }
    close(&mut h, strf);

    close(&mut h, strl);
    close(&mut h, hdrl);

    let movi_size = open(&mut h, b"LIST");
    let movi_start = h.len();
    h.extend_from_slice(b"movi");

    let patches = Patches {
        riff_size: riff_size as u64,
        total_frames: total_frames as u64,
        suggested_buffer: suggested_buffer as u64,
        stream_length: stream_length as u64,
        stream_buffer: stream_buffer as u64,
        movi_size: movi_size as u64,
        movi_start: movi_start as u64,
    };
    (h, patches)
}

/// The JPEG frames of an AVI file, in index order.
pub fn indexed_frames(avi: &[u8]) -> Result<Vec<&[u8]>, RecordingError> {
    let malformed = |what: &str| RecordingError::Encoder(format!("malformed AVI: {what}"));
    if avi.len() < 12 || &avi[0..4] != b"RIFF" || &avi[8..12] != b"AVI " {
        return Err(malformed("not a RIFF AVI file"));
    }
    let read_u32 = |at: usize| -> Result<usize, RecordingError> {
        avi.get(at..at + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
            .ok_or_else(|| malformed("truncated"))
    };

    let mut movi_start = None;
    let mut pos = 12;
    while pos + 8 <= avi.len() {
        let tag = &avi[pos..pos + 4];
        let size = read_u32(pos + 4)?;
        if tag == b"LIST" && avi.get(pos + 8..pos + 12) == Some(b"movi".as_slice()) {
            movi_start = Some(pos + 8);
        }
        if tag == b"idx1" {
            let movi = movi_start.ok_or_else(|| malformed("index before movi"))?;
            let entries = avi
                .get(pos + 8..pos + 8 + size)
                .ok_or_else(|| malformed("truncated index"))?;
            return entries
                .chunks_exact(INDEX_ENTRY_LEN as usize)
                .map(|entry| {
                    let offset = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]);
                    let len = u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]);
                    let data = movi + offset as usize + 8;
                    avi.get(data..data + len as usize)
                        .ok_or_else(|| malformed("index points past the end"))
                })
                .collect();
        }
        pos += 8 + size + (size & 1);
    }
    Err(malformed("no index"))
}

#[derive(Debug, Clone, Copy)]
pub struct AviSinkFactory {
    quality: u8,
    fps: u32,
}

impl AviSinkFactory {
    pub fn new(quality: u8, fps: u32) -> Self {
        Self { quality, fps }
    }
}

impl Default for AviSinkFactory {
    fn default() -> Self {
        Self::new(85, 30)
    }
}

impl SinkFactory for AviSinkFactory {
    fn extension(&self) -> &'static str {
        "avi"
    }

    fn create(
        &self,
        width: u32,
        height: u32,
        path: &Path,
    ) -> Result<Box<dyn EncoderSink>, RecordingError> {
        Ok(Box::new(AviMjpegSink::create(
            path,
            width,
            height,
            self.fps,
            self.quality,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn u32_at(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn record(frames: &[Rgba<u8>], width: u32, height: u32) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        let mut sink = AviSinkFactory::new(90, 25)
            .create(width, height, &path)
            .unwrap();
        for &color in frames {
            sink.draw(&RgbaImage::from_pixel(width, height, color))
                .unwrap();
        }
        sink.finish().unwrap();
        std::fs::read(&path).unwrap()
    }

    #[test]
    fn header_describes_the_stream() {
        let bytes = record(&[Rgba([0, 0, 0, 255]); 3], 16, 8);

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32_at(&bytes, 4) as usize, bytes.len() - 8);
        assert_eq!(&bytes[8..12], b"AVI ");
        assert_eq!(&bytes[20..24], b"hdrl");
        assert_eq!(&bytes[24..28], b"avih");
        assert_eq!(u32_at(&bytes, 32), 40_000); // 25 fps
        assert_eq!(u32_at(&bytes, 48), 3); // total frames
        assert_eq!((u32_at(&bytes, 64), u32_at(&bytes, 68)), (16, 8));

        let strh = bytes.windows(4).position(|w| w == b"strh").unwrap();
        assert_eq!(&bytes[strh + 8..strh + 16], b"vidsMJPG");
        assert_eq!(u32_at(&bytes, strh + 8 + 32), 3); // stream length
    }

    #[test]
    fn index_points_at_decodable_frames() {
        let colors = [Rgba([255, 0, 0, 255]), Rgba([0, 0, 255, 255])];
        let bytes = record(&colors, 16, 16);

        let frames = indexed_frames(&bytes).unwrap();
        assert_eq!(frames.len(), 2);
        for (jpeg, expected) in frames.iter().zip(colors) {
            let mut decoder = jpeg_decoder::Decoder::new(*jpeg);
            let pixels = decoder.decode().unwrap();
            let centre = (8 * 16 + 8) * 3;
            for c in 0..3 {
                assert!(pixels[centre + c].abs_diff(expected[c]) < 24);
            }
        }
    }

    #[test]
    fn empty_recording_still_closes_cleanly() {
        let bytes = record(&[], 4, 4);
        assert_eq!(u32_at(&bytes, 48), 0);
        assert!(indexed_frames(&bytes).unwrap().is_empty());
    }

    #[test]
    fn raw_jpeg_stream_is_not_an_avi() {
        assert!(indexed_frames(&[0xFF, 0xD8, 0xFF, 0xE0]).is_err());
    }
}
