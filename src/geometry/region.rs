//! Rotation-corrected region extraction.
//!
//! Two reference landmarks (e.g. the mouth corners) define the top edge of a
//! square tilted with the face. Cropping warps the whole frame so that edge is
//! horizontal and then cuts an axis-aligned square hanging below it.

use image::{imageops, Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};

use super::{LandmarkSet, Point2};
use crate::error::GeometryError;

/// Tilted square in pixel space.
///
/// Points are ordered left corner, right corner, bottom-right, bottom-left so
/// polygon winding stays stable for drawing and for the crop transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionQuad {
    pub points: [Point2; 4],
    /// Midpoint of the two reference points; the crop hangs below it.
    pub center: Point2,
    /// Tilt of the reference edge; rotating by the negative undoes it.
    pub angle_degrees: f32,
    pub side_length: f32,
}

impl RegionQuad {
    pub fn from_reference_points(left: Point2, right: Point2) -> Result<Self, GeometryError> {
        let dx = right.x - left.x;
        let dy = right.y - left.y;
        let length = dx.hypot(dy);
        if length < 1.0 {
            return Err(GeometryError::Degenerate);
        }
        let angle = dy.atan2(dx);
        let (sin, cos) = angle.sin_cos();

        // Perpendicular offset pointing "down" relative to the tilted edge
        let off_x = -sin * length;
        let off_y = cos * length;

        Ok(Self {
            points: [
                left,
                right,
                Point2::new(right.x + off_x, right.y + off_y),
                Point2::new(left.x + off_x, left.y + off_y),
            ],
            center: Point2::new((left.x + right.x) / 2.0, (left.y + right.y) / 2.0),
            angle_degrees: angle.to_degrees(),
            side_length: length,
        })
    }

    /// Build the quad from two indexed landmarks scaled to a `width`x`height` frame.
    pub fn from_landmarks(
        landmarks: &LandmarkSet,
        left_index: usize,
        right_index: usize,
        width: u32,
        height: u32,
    ) -> Result<Self, GeometryError> {
        let missing = |index| GeometryError::MissingLandmark {
            index,
            len: landmarks.len(),
        };
        let left = landmarks
            .pixel(left_index, width, height)
            .ok_or_else(|| missing(left_index))?;
        let right = landmarks
            .pixel(right_index, width, height)
            .ok_or_else(|| missing(right_index))?;
        Self::from_reference_points(left, right)
    }

    /// Top-left corner and side of the crop window in the de-rotated frame.
    pub fn crop_window(&self) -> (i64, i64, u32) {
        let x = (self.center.x - self.side_length / 2.0).floor() as i64;
        let y = self.center.y.floor() as i64;
        (x, y, self.side_length as u32)
    }

    /// Forward transform that rotates the frame about `center` by `-angle`.
    fn derotation(&self) -> Projection {
        let theta = -self.angle_degrees.to_radians();
        Projection::translate(self.center.x, self.center.y)
            * Projection::rotate(theta)
            * Projection::translate(-self.center.x, -self.center.y)
    }
}

/// Cut the quad out of `image` as an axis-aligned square.
///
/// A window that leaves the frame yields [`GeometryError::OutOfBounds`]; the
/// window is never clamped, since that would change what the classifier sees.
pub fn extract_region(image: &RgbaImage, quad: &RegionQuad) -> Result<RgbaImage, GeometryError> {
    let (width, height) = image.dimensions();
    let (x, y, size) = quad.crop_window();
    if size == 0 {
        return Err(GeometryError::Degenerate);
    }
    if x < 0 || y < 0 || x + size as i64 > width as i64 || y + size as i64 > height as i64 {
        return Err(GeometryError::OutOfBounds {
            x,
            y,
            size,
            width,
            height,
        });
    }

    // The warped frame keeps the source dimensions, so the bounds above hold.
    let warped = warp(
        image,
        &quad.derotation(),
        Interpolation::Bilinear,
        Rgba([0, 0, 0, 0]),
    );
    Ok(imageops::crop_imm(&warped, x as u32, y as u32, size, size).to_image())
}
