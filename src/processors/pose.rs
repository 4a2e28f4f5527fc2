use image::RgbaImage;
use tracing::warn;

use super::draw::{dot, line, GREEN, RED};
use super::{Processor, ProcessorKind, StageContext, StageResult};
use crate::capture::Frame;
use crate::detect::{run_landmarks, SharedLandmarkEngine};
use crate::error::StageError;
use crate::geometry::LandmarkSet;

/// BlazePose 33-point skeleton
pub const POSE_CONNECTIONS: [(usize, usize); 35] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    (11, 23),
    (12, 24),
    (23, 24),
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

const VISIBILITY_THRESHOLD: f32 = 0.5;
const LANDMARK_RADIUS: i32 = 5;
const CONNECTION_WIDTH: u32 = 2;

/// Skeleton overlay. Informational only, so it never blocks capture.
#[derive(Default)]
pub struct PoseStage {
    engine: Option<SharedLandmarkEngine>,
}

impl PoseStage {
    pub fn new(engine: SharedLandmarkEngine) -> Self {
        Self {
            engine: Some(engine),
        }
    }

    /// `None` when there is no engine or it failed.
    fn annotate(&self, image: &RgbaImage) -> Option<RgbaImage> {
        let engine = self.engine.as_ref()?;
        let poses = match run_landmarks(engine, image) {
            Ok(poses) => poses,
            Err(e) => {
                warn!("pose engine failed: {e}");
                return None;
            }
        };
        let mut out = image.clone();
        for pose in &poses {
            draw_pose(&mut out, pose);
        }
        Some(out)
    }
}

fn draw_pose(image: &mut RgbaImage, pose: &LandmarkSet) {
    let (w, h) = image.dimensions();
    for &(a, b) in &POSE_CONNECTIONS {
        let (Some(start), Some(end)) = (pose.get(a), pose.get(b)) else {
            continue;
        };
        if start.is_visible(VISIBILITY_THRESHOLD) && end.is_visible(VISIBILITY_THRESHOLD) {
            line(
                image,
                start.to_pixel(w, h),
                end.to_pixel(w, h),
                CONNECTION_WIDTH,
                RED,
            );
        }
    }
    for landmark in pose.iter().filter(|l| l.is_visible(VISIBILITY_THRESHOLD)) {
        dot(image, landmark.to_pixel(w, h), LANDMARK_RADIUS, GREEN);
    }
}

impl Processor for PoseStage {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Pose
    }

    fn setup(&mut self, context: &StageContext) -> Result<(), StageError> {
        if let Some(engine) = &context.pose_landmarks {
            self.engine = Some(engine.clone());
        }
        if self.engine.is_none() {
            return Err(StageError::NotReady {
                stage: self.name(),
                reason: "no pose landmark engine".into(),
            });
        }
        Ok(())
    }

    fn process_for_display(&self, frame: &Frame) -> Result<StageResult, StageError> {
        Ok(match self.annotate(&frame.image) {
            Some(annotated) => StageResult::replaced(frame.with_image(annotated), true),
            None => StageResult::unchanged(true),
        })
    }

    fn process_for_saving(&self, still: &RgbaImage) -> Result<RgbaImage, StageError> {
        Ok(self.annotate(still).unwrap_or_else(|| still.clone()))
    }
}
