//! Frame ingestion: raw sensor buffer + rotation hint -> upright RGBA frame.

use image::{imageops, RgbaImage};
use tracing::instrument;

use super::decoder::decode_frame;
use super::frame::{Frame, RawFrame, Rotation};
use crate::error::FormatError;

/// Decode and rotate a raw frame. The caller's buffer is never mutated;
/// a frame that fails here is dropped and the next one is handled on its own.
#[instrument(skip(raw), fields(seq = raw.meta.sequence))]
pub fn normalize(raw: &RawFrame) -> Result<Frame, FormatError> {
    let decoded = decode_frame(&raw.data, &raw.meta)?;
    let upright = orient(decoded, raw.meta.rotation);
    Ok(Frame::new(upright, raw.meta.sequence, raw.timestamp))
}

/// Rotate clockwise by `rotation`. `Deg0` hands the same buffer back untouched.
pub fn orient(image: RgbaImage, rotation: Rotation) -> RgbaImage {
    match rotation {
        Rotation::Deg0 => image,
        Rotation::Deg90 => imageops::rotate90(&image),
        Rotation::Deg180 => imageops::rotate180(&image),
        Rotation::Deg270 => imageops::rotate270(&image),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameMetadata, PixelFormat};
    use bytes::Bytes;
    use image::Rgba;
    use std::time::Instant;

    fn marked() -> RgbaImage {
        // 3x2, red marker in the top-left corner
        let mut img = RgbaImage::from_pixel(3, 2, Rgba([0, 0, 0, 255]));
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img
    }

    #[test]
    fn zero_rotation_keeps_the_buffer() {
        let img = marked();
        let ptr = img.as_raw().as_ptr();
        let out = orient(img, Rotation::Deg0);
        assert_eq!(out.as_raw().as_ptr(), ptr);
    }

    #[test]
    fn quarter_turn_moves_marker_to_top_right() {
        let out = orient(marked(), Rotation::Deg90);
        assert_eq!(out.dimensions(), (2, 3));
        assert_eq!(out.get_pixel(1, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn half_turn_moves_marker_to_bottom_right() {
        let out = orient(marked(), Rotation::Deg180);
        assert_eq!(out.get_pixel(2, 1).0, [255, 0, 0, 255]);
    }

    #[test]
    fn normalize_leaves_source_bytes_alone() {
        let data = Bytes::from(vec![10u8, 20, 30, 40, 50, 60]);
        let raw = RawFrame {
            data: data.clone(),
            meta: FrameMetadata {
                sequence: 7,
                width: 2,
                height: 1,
                format: PixelFormat::Rgb24,
                rotation: Rotation::Deg270,
            },
            timestamp: Instant::now(),
        };
        let frame = normalize(&raw).unwrap();
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.image.dimensions(), (1, 2));
        assert_eq!(raw.data, data);
    }
}
