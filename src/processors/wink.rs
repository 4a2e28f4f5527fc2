//! Wink gate based on the eye aspect ratio (EAR) of each eye.

use image::RgbaImage;
use tracing::debug;

use super::draw::{polygon, CYAN, YELLOW};
use super::{Processor, ProcessorKind, StageContext, StageResult};
use crate::capture::Frame;
use crate::detect::{run_landmarks, SharedLandmarkEngine};
use crate::error::StageError;
use crate::geometry::{LandmarkSet, Point2};

/// Face mesh eye contour, ordered outer, top, top, inner, bottom, bottom so
/// it can be drawn as a closed outline.
#[derive(Debug, Clone, Copy)]
struct EyeContour {
    outer: usize,
    top: [usize; 2],
    inner: usize,
    bottom: [usize; 2],
}

const LEFT_EYE: EyeContour = EyeContour {
    outer: 33,
    top: [159, 158],
    inner: 133,
    bottom: [153, 145],
};

const RIGHT_EYE: EyeContour = EyeContour {
    outer: 263,
    top: [386, 385],
    inner: 362,
    bottom: [380, 374],
};

pub const DEFAULT_CLOSED_THRESHOLD: f32 = 0.21;

impl EyeContour {
    fn outline(&self, face: &LandmarkSet, w: u32, h: u32) -> Option<[Point2; 6]> {
        let p = |i| face.pixel(i, w, h);
        Some([
            p(self.outer)?,
            p(self.top[0])?,
            p(self.top[1])?,
            p(self.inner)?,
            p(self.bottom[0])?,
            p(self.bottom[1])?,
        ])
    }
}

/// Vertical openings over twice the eye width. Measured in pixels so a
/// non-square frame does not skew the ratio.
fn eye_aspect_ratio(outline: &[Point2; 6]) -> f32 {
    let [outer, top1, top2, inner, bottom2, bottom1] = *outline;
    let width = outer.distance(inner);
    if width < 1e-3 {
        return 0.0;
    }
    (top1.distance(bottom1) + top2.distance(bottom2)) / (2.0 * width)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct EyeState {
    left: f32,
    right: f32,
}

impl EyeState {
    /// Exactly one eye closed.
    fn is_wink(&self, threshold: f32) -> bool {
        (self.left < threshold) != (self.right < threshold)
    }
}

pub struct WinkStage {
    engine: Option<SharedLandmarkEngine>,
    closed_threshold: f32,
}

impl Default for WinkStage {
    fn default() -> Self {
        Self {
            engine: None,
            closed_threshold: DEFAULT_CLOSED_THRESHOLD,
        }
    }
}

impl WinkStage {
    pub fn new(engine: SharedLandmarkEngine) -> Self {
        Self {
            engine: Some(engine),
            ..Self::default()
        }
    }

    pub fn with_threshold(mut self, closed_threshold: f32) -> Self {
        self.closed_threshold = closed_threshold;
        self
    }

    /// Draws both eye outlines onto a copy. `None` when no face with a full
    /// eye contour was found.
    fn annotate(
        &self,
        engine: &SharedLandmarkEngine,
        image: &RgbaImage,
    ) -> Result<Option<(RgbaImage, bool)>, StageError> {
        let faces = run_landmarks(engine, image)?;
        let Some(face) = faces.first() else {
            return Ok(None);
        };
        let (w, h) = image.dimensions();
        let (Some(left), Some(right)) = (
            LEFT_EYE.outline(face, w, h),
            RIGHT_EYE.outline(face, w, h),
        ) else {
            debug!(len = face.len(), "face mesh lacks eye landmarks");
            return Ok(None);
        };

        let state = EyeState {
            left: eye_aspect_ratio(&left),
            right: eye_aspect_ratio(&right),
        };
        let winking = state.is_wink(self.closed_threshold);
        debug!(left = state.left, right = state.right, winking, "eye aspect ratio");

        let mut out = image.clone();
        for (outline, ear) in [(left, state.left), (right, state.right)] {
            let color = if ear < self.closed_threshold { YELLOW } else { CYAN };
            polygon(&mut out, &outline, 1, color);
        }
        Ok(Some((out, winking)))
    }
}

impl Processor for WinkStage {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Wink
    }

    fn setup(&mut self, context: &StageContext) -> Result<(), StageError> {
        if let Some(engine) = &context.face_landmarks {
            self.engine = Some(engine.clone());
        }
        if self.engine.is_none() {
            return Err(StageError::NotReady {
                stage: self.name(),
                reason: "no face landmark engine".into(),
            });
        }
        Ok(())
    }

    fn process_for_display(&self, frame: &Frame) -> Result<StageResult, StageError> {
        let Some(engine) = &self.engine else {
            return Ok(StageResult::unchanged(false));
        };
        Ok(match self.annotate(engine, &frame.image)? {
            Some((out, winking)) => StageResult::replaced(frame.with_image(out), winking),
            None => StageResult::unchanged(false),
        })
    }

    fn process_for_saving(&self, still: &RgbaImage) -> Result<RgbaImage, StageError> {
        let Some(engine) = &self.engine else {
            return Ok(still.clone());
        };
        Ok(self
            .annotate(engine, still)?
            .map(|(out, _)| out)
            .unwrap_or_else(|| still.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::fixtures::{face_mesh, FixedLandmarks};
    use crate::detect::shared_engine;
    use crate::processors::StageOutput;
    use std::time::Instant;

    /// Eye contour overrides centred at `cx`, opening `open` (normalized).
    fn eye(contour: EyeContour, cx: f32, open: f32) -> Vec<(usize, f32, f32)> {
        vec![
            (contour.outer, cx - 0.05, 0.4),
            (contour.inner, cx + 0.05, 0.4),
            (contour.top[0], cx - 0.01, 0.4 - open / 2.0),
            (contour.top[1], cx + 0.01, 0.4 - open / 2.0),
            (contour.bottom[0], cx + 0.01, 0.4 + open / 2.0),
            (contour.bottom[1], cx - 0.01, 0.4 + open / 2.0),
        ]
    }

    fn stage(left_open: f32, right_open: f32) -> WinkStage {
        let mut overrides = eye(LEFT_EYE, 0.35, left_open);
        overrides.extend(eye(RIGHT_EYE, 0.65, right_open));
        let face = face_mesh((0.5, 0.7), &overrides);
        WinkStage::new(shared_engine(FixedLandmarks(vec![face])))
    }

    fn frame() -> Frame {
        Frame::new(RgbaImage::new(100, 100), 0, Instant::now())
    }

    #[test]
    fn ear_of_open_and_closed_eyes() {
        let open = [
            Point2::new(0.0, 5.0),
            Point2::new(4.0, 1.0),
            Point2::new(6.0, 1.0),
            Point2::new(10.0, 5.0),
            Point2::new(6.0, 9.0),
            Point2::new(4.0, 9.0),
        ];
        assert!((eye_aspect_ratio(&open) - 0.8).abs() < 1e-5);

        let flat = [Point2::new(3.0, 3.0); 6];
        assert_eq!(eye_aspect_ratio(&flat), 0.0);
    }

    #[test]
    fn one_closed_eye_is_a_wink() {
        let result = stage(0.001, 0.08).process_for_display(&frame()).unwrap();
        assert!(result.status);
        assert!(matches!(result.output, StageOutput::Replaced(_)));
    }

    #[test]
    fn both_open_or_both_closed_is_not() {
        assert!(!stage(0.08, 0.08).process_for_display(&frame()).unwrap().status);
        assert!(!stage(0.001, 0.001).process_for_display(&frame()).unwrap().status);
    }

    #[test]
    fn no_engine_or_no_face_blocks() {
        assert!(!WinkStage::default().process_for_display(&frame()).unwrap().status);
        let stage = WinkStage::new(shared_engine(FixedLandmarks(vec![])));
        let result = stage.process_for_display(&frame()).unwrap();
        assert!(!result.status);
        assert!(matches!(result.output, StageOutput::Unchanged));
    }

    #[test]
    fn threshold_is_configurable() {
        // opening 0.08 over width 0.1 gives EAR 0.8
        let stage = stage(0.001, 0.08).with_threshold(0.9);
        assert!(!stage.process_for_display(&frame()).unwrap().status);
    }
}
