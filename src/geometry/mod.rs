pub mod region;

pub use region::{extract_region, RegionQuad};

use serde::{Deserialize, Serialize};

/// Pixel-space point
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point2) -> f32 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// Normalized landmark in [0, 1] with optional visibility / confidence.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub visibility: Option<f32>,
}

impl Landmark {
    pub const fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            visibility: None,
        }
    }

    pub const fn with_visibility(x: f32, y: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            visibility: Some(visibility),
        }
    }

    pub fn to_pixel(&self, width: u32, height: u32) -> Point2 {
        Point2::new(self.x * width as f32, self.y * height as f32)
    }

    /// Missing visibility counts as invisible.
    pub fn is_visible(&self, threshold: f32) -> bool {
        self.visibility.unwrap_or(0.0) > threshold
    }
}

/// Ordered landmarks; the index is the model-defined meaning of each point.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.points.iter()
    }

    /// Pixel coordinates of `index`, or `None` if the model did not emit it.
    pub fn pixel(&self, index: usize, width: u32, height: u32) -> Option<Point2> {
        self.get(index).map(|l| l.to_pixel(width, height))
    }
}
