//! Overlay helpers shared by the stages.

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};

use crate::geometry::Point2;

pub const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const YELLOW: Rgba<u8> = Rgba([255, 255, 0, 255]);
pub const CYAN: Rgba<u8> = Rgba([0, 255, 255, 255]);

pub fn dot(image: &mut RgbaImage, at: Point2, radius: i32, color: Rgba<u8>) {
    draw_filled_circle_mut(
        image,
        (at.x.round() as i32, at.y.round() as i32),
        radius,
        color,
    );
}

/// Segment `width` pixels wide, drawn as parallel one pixel lines.
pub fn line(image: &mut RgbaImage, from: Point2, to: Point2, width: u32, color: Rgba<u8>) {
    let half = (width / 2) as i32;
    for dy in -half..=half {
        for dx in -half..=half {
            let (ox, oy) = (dx as f32, dy as f32);
            draw_line_segment_mut(image, (from.x + ox, from.y + oy), (to.x + ox, to.y + oy), color);
        }
    }
}

/// Closed outline through `points` in order.
pub fn polygon(image: &mut RgbaImage, points: &[Point2], width: u32, color: Rgba<u8>) {
    if points.len() < 2 {
        return;
    }
    for (i, &from) in points.iter().enumerate() {
        let to = points[(i + 1) % points.len()];
        line(image, from, to, width, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_closes_the_outline() {
        let mut img = RgbaImage::new(20, 20);
        let square = [
            Point2::new(2.0, 2.0),
            Point2::new(12.0, 2.0),
            Point2::new(12.0, 12.0),
            Point2::new(2.0, 12.0),
        ];
        polygon(&mut img, &square, 1, GREEN);
        // left edge only exists if the last point joins the first
        assert_eq!(*img.get_pixel(2, 7), GREEN);
        assert_eq!(*img.get_pixel(7, 7), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn dots_off_canvas_are_clipped() {
        let mut img = RgbaImage::new(4, 4);
        dot(&mut img, Point2::new(-10.0, -10.0), 2, RED);
        assert!(img.pixels().all(|p| p.0[3] == 0));
    }
}
