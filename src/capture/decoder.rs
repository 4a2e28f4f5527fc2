use image::RgbaImage;
use jpeg_decoder::Decoder;

use super::frame::{FrameMetadata, PixelFormat};
use crate::error::FormatError;

/// Convert a raw sensor buffer into packed RGBA. The source slice is only read.
pub fn decode_frame(data: &[u8], meta: &FrameMetadata) -> Result<RgbaImage, FormatError> {
    let (width, height) = (meta.width, meta.height);
    let pixels = (width as usize) * (height as usize);

    let rgba = match meta.format {
        PixelFormat::Mjpeg => return decode_mjpeg(data),
        PixelFormat::Rgba8 => {
            expect_len(meta.format, data, pixels * 4)?;
            data.to_vec()
        }
        PixelFormat::Rgb24 => {
            expect_len(meta.format, data, pixels * 3)?;
            let mut rgba = Vec::with_capacity(pixels * 4);
            for chunk in data.chunks_exact(3) {
                rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
            }
            rgba
        }
        PixelFormat::Bgr24 => {
            expect_len(meta.format, data, pixels * 3)?;
            let mut rgba = Vec::with_capacity(pixels * 4);
            for chunk in data.chunks_exact(3) {
                rgba.extend_from_slice(&[chunk[2], chunk[1], chunk[0], 255]);
            }
            rgba
        }
        PixelFormat::Yuyv4 => {
            expect_even_width(meta)?;
            expect_len(meta.format, data, pixels * 2)?;
            let mut rgba = Vec::with_capacity(pixels * 4);
            for chunk in data.chunks_exact(4) {
                let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
                rgba.extend_from_slice(&yuv_to_rgba(y0, u, v));
                rgba.extend_from_slice(&yuv_to_rgba(y1, u, v));
            }
            rgba
        }
        PixelFormat::Nv12 | PixelFormat::Nv21 => {
            expect_even_width(meta)?;
            if height % 2 != 0 {
                return Err(FormatError::Dimensions {
                    format: meta.format,
                    width,
                    height,
                });
            }
            expect_len(meta.format, data, pixels + pixels / 2)?;
            let (luma, chroma) = data.split_at(pixels);
            let w = width as usize;
            let mut rgba = Vec::with_capacity(pixels * 4);
            for row in 0..height as usize {
                let chroma_row = &chroma[(row / 2) * w..(row / 2) * w + w];
                for col in 0..w {
                    let y = luma[row * w + col];
                    let pair = &chroma_row[(col / 2) * 2..(col / 2) * 2 + 2];
                    let (u, v) = match meta.format {
                        PixelFormat::Nv12 => (pair[0], pair[1]),
                        _ => (pair[1], pair[0]),
                    };
                    rgba.extend_from_slice(&yuv_to_rgba(y, u, v));
                }
            }
            rgba
        }
    };

    RgbaImage::from_raw(width, height, rgba).ok_or(FormatError::BufferSize {
        format: meta.format,
        expected: pixels * 4,
        actual: data.len(),
    })
}

fn decode_mjpeg(data: &[u8]) -> Result<RgbaImage, FormatError> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| FormatError::Decode(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| FormatError::Decode("missing JPEG header".into()))?;

    let rgba: Vec<u8> = match info.pixel_format {
        jpeg_decoder::PixelFormat::RGB24 => pixels
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        jpeg_decoder::PixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l, 255]).collect(),
        other => return Err(FormatError::Unsupported(format!("JPEG {other:?}"))),
    };

    RgbaImage::from_raw(info.width as u32, info.height as u32, rgba)
        .ok_or_else(|| FormatError::Decode("JPEG size mismatch".into()))
}

fn expect_len(format: PixelFormat, data: &[u8], expected: usize) -> Result<(), FormatError> {
    if data.len() != expected {
        return Err(FormatError::BufferSize {
            format,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn expect_even_width(meta: &FrameMetadata) -> Result<(), FormatError> {
    if meta.width % 2 != 0 {
        return Err(FormatError::Dimensions {
            format: meta.format,
            width: meta.width,
            height: meta.height,
        });
    }
    Ok(())
}

/// BT.601 limited-range YUV to RGBA
fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let r = c + 1.596 * e;
    let g = c - 0.391 * d - 0.813 * e;
    let b = c + 2.018 * d;
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
        255,
    ]
}
