use image::RgbaImage;
use tracing::warn;

use super::draw::{dot, GREEN};
use super::{Processor, ProcessorKind, StageContext, StageResult};
use crate::capture::Frame;
use crate::detect::{run_landmarks, SharedLandmarkEngine};
use crate::error::StageError;

const DOT_RADIUS: i32 = 2;

/// Face mesh overlay: every landmark as a green dot.
#[derive(Default)]
pub struct FaceStage {
    engine: Option<SharedLandmarkEngine>,
}

impl FaceStage {
    pub fn new(engine: SharedLandmarkEngine) -> Self {
        Self {
            engine: Some(engine),
        }
    }

    fn annotate(
        &self,
        engine: &SharedLandmarkEngine,
        image: &RgbaImage,
    ) -> Result<RgbaImage, StageError> {
        let faces = run_landmarks(engine, image)?;
        let (w, h) = image.dimensions();
        let mut out = image.clone();
        for landmark in faces.iter().flat_map(|f| f.iter()) {
            dot(&mut out, landmark.to_pixel(w, h), DOT_RADIUS, GREEN);
        }
        Ok(out)
    }
}

impl Processor for FaceStage {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Face
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
        let annotated = self.annotate(engine, &frame.image)?;
        Ok(StageResult::replaced(frame.with_image(annotated), true))
    }

    fn process_for_saving(&self, still: &RgbaImage) -> Result<RgbaImage, StageError> {
        match &self.engine {
            Some(engine) => self.annotate(engine, still),
            None => {
                warn!("face stage saving without an engine, keeping the still as is");
                Ok(still.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::fixtures::{face_mesh, FailingEngine, FixedLandmarks};
    use crate::detect::shared_engine;
    use crate::processors::StageOutput;
    use image::Rgba;
    use std::time::Instant;

    fn frame() -> Frame {
        Frame::new(RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 255])), 1, Instant::now())
    }

    #[test]
    fn uninitialized_is_pass_through_and_blocks() {
        let mut stage = FaceStage::default();
        assert!(matches!(
            stage.setup(&StageContext::default()),
            Err(StageError::NotReady { .. })
        ));
        let result = stage.process_for_display(&frame()).unwrap();
        assert!(!result.status);
        assert!(matches!(result.output, StageOutput::Unchanged));
    }

    #[test]
    fn landmarks_are_drawn_green() {
        let engine = shared_engine(FixedLandmarks(vec![face_mesh((0.5, 0.5), &[])]));
        let mut stage = FaceStage::default();
        stage
            .setup(&StageContext::default().with_face_landmarks(engine))
            .unwrap();
        let result = stage.process_for_display(&frame()).unwrap();
        assert!(result.status);
        let StageOutput::Replaced(out) = result.output else {
            panic!("expected a new frame");
        };
        assert_eq!(*out.image.get_pixel(20, 20), GREEN);
        assert_eq!(out.sequence, 1);
    }

    #[test]
    fn engine_failure_is_a_stage_error() {
        let stage = FaceStage::new(shared_engine(FailingEngine));
        assert!(matches!(
            stage.process_for_display(&frame()),
            Err(StageError::Engine(_))
        ));
    }
}
