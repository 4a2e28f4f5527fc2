//! Detector facade over a landmark engine.
//!
//! Live-stream results are handed off over a channel instead of a callback,
//! so the consumer decides on which thread it looks at them.

use std::borrow::Cow;

use flume::Sender;
use image::RgbaImage;
use tracing::{debug, info, instrument, warn};

use super::{run_landmarks, SharedLandmarkEngine};
use crate::capture::orientation::orient;
use crate::capture::Rotation;
use crate::error::{EngineError, GeometryError};
use crate::geometry::{LandmarkSet, Point2, RegionQuad};

/// MediaPipe face mesh mouth corners
pub const MOUTH_LEFT: usize = 61;
pub const MOUTH_RIGHT: usize = 291;

/// First face an engine found and the mouth square spanned by its corners.
#[derive(Debug)]
pub struct MouthLocation {
    pub face: LandmarkSet,
    /// `Err` when the corners are missing or coincide
    pub region: Result<RegionQuad, GeometryError>,
}

/// Run `engine` on `image` and locate the mouth of the first face.
/// `Ok(None)` when no face was found.
pub fn locate_mouth(
    engine: &SharedLandmarkEngine,
    image: &RgbaImage,
) -> Result<Option<MouthLocation>, EngineError> {
    let faces = run_landmarks(engine, image)?;
    let Some(face) = faces.into_iter().next() else {
        return Ok(None);
    };
    let (w, h) = image.dimensions();
    let region = RegionQuad::from_landmarks(&face, MOUTH_LEFT, MOUTH_RIGHT, w, h);
    Ok(Some(MouthLocation { face, region }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningMode {
    Image,
    LiveStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStatus {
    NotDetected,
    Detecting,
    Unknown,
}

impl DetectionStatus {
    pub fn label(self) -> &'static str {
        match self {
            DetectionStatus::NotDetected => "not detected",
            DetectionStatus::Detecting => "detecting",
            DetectionStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    /// Ordered outline of the detected region, pixel space
    pub boundary: Vec<Point2>,
    pub status: DetectionStatus,
    pub rotation_angle: f32,
    pub landmarks: Option<Vec<Point2>>,
}

impl DetectionResult {
    fn empty(status: DetectionStatus) -> Self {
        Self {
            boundary: Vec::new(),
            status,
            rotation_angle: 0.0,
            landmarks: None,
        }
    }
}

/// One live-stream result together with the size of the frame it came from.
#[derive(Debug, Clone)]
pub struct LiveDetection {
    pub result: DetectionResult,
    pub height: u32,
    pub width: u32,
}

pub trait Detector: Send {
    fn name(&self) -> &'static str;

    /// `results` receives live-stream detections; ignored in image mode.
    fn setup(
        &mut self,
        mode: RunningMode,
        results: Option<Sender<LiveDetection>>,
    ) -> Result<(), EngineError>;

    /// Synchronous detection on a still. `None` until `setup` has run.
    fn detect(&mut self, image: &RgbaImage, rotation: Rotation) -> Option<DetectionResult>;

    /// Detection on a live frame; the result is published on the channel
    /// given to `setup`.
    fn detect_live_stream(&mut self, image: &RgbaImage, height: u32, width: u32);

    fn close(&mut self);
}

/// Reports the mouth region of the first detected face.
pub struct RegionDetector {
    engine: Option<SharedLandmarkEngine>,
    mode: Option<RunningMode>,
    results: Option<Sender<LiveDetection>>,
}

impl RegionDetector {
    pub fn new(engine: Option<SharedLandmarkEngine>) -> Self {
        Self {
            engine,
            mode: None,
            results: None,
        }
    }

    fn run(&self, image: &RgbaImage) -> DetectionResult {
        let Some(engine) = &self.engine else {
            return DetectionResult::empty(DetectionStatus::Unknown);
        };
        let location = match locate_mouth(engine, image) {
            Ok(Some(location)) => location,
            Ok(None) => return DetectionResult::empty(DetectionStatus::NotDetected),
            Err(e) => {
                warn!("landmark engine failed: {e}");
                return DetectionResult::empty(DetectionStatus::Unknown);
            }
        };

        let (w, h) = image.dimensions();
        let landmarks = location.face.iter().map(|l| l.to_pixel(w, h)).collect();
        match location.region {
            Ok(quad) => DetectionResult {
                boundary: quad.points.to_vec(),
                status: DetectionStatus::Detecting,
                rotation_angle: quad.angle_degrees,
                landmarks: Some(landmarks),
            },
            Err(e) => {
                debug!("no mouth region: {e}");
                DetectionResult {
                    landmarks: Some(landmarks),
                    ..DetectionResult::empty(DetectionStatus::Unknown)
                }
            }
        }
    }
}

impl Detector for RegionDetector {
    fn name(&self) -> &'static str {
        "region"
    }

    fn setup(
        &mut self,
        mode: RunningMode,
        results: Option<Sender<LiveDetection>>,
    ) -> Result<(), EngineError> {
        if mode == RunningMode::LiveStream && results.is_none() {
            warn!("live stream detector set up without a result channel");
        }
        self.mode = Some(mode);
        self.results = results;
        info!(?mode, "region detector ready");
        if self.engine.is_none() {
            return Err(EngineError::Unavailable);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(rotation = rotation.degrees()))]
    fn detect(&mut self, image: &RgbaImage, rotation: Rotation) -> Option<DetectionResult> {
        self.mode?;
        let upright = match rotation {
            Rotation::Deg0 => Cow::Borrowed(image),
            r => Cow::Owned(orient(image.clone(), r)),
        };
        Some(self.run(&upright))
    }

    fn detect_live_stream(&mut self, image: &RgbaImage, height: u32, width: u32) {
        if self.mode != Some(RunningMode::LiveStream) {
            warn!("detect_live_stream called outside live stream mode");
            return;
        }
        let result = self.run(image);
        if let Some(tx) = &self.results {
            // A full or closed channel drops the result; the next frame brings a fresh one
            if tx
                .try_send(LiveDetection {
                    result,
                    height,
                    width,
                })
                .is_err()
            {
                debug!("live detection dropped");
            }
        }
    }

    fn close(&mut self) {
        self.mode = None;
        self.results = None;
        info!("region detector closed");
    }
}
