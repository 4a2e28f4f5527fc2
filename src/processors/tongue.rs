//! Tongue-out gate: crop the mouth square, straighten it and classify it.

use image::RgbaImage;
use tracing::{debug, instrument};

use super::draw::{polygon, GREEN, RED};
use super::{Processor, ProcessorKind, StageContext, StageResult};
use crate::capture::Frame;
use crate::detect::detector::locate_mouth;
use crate::detect::{ClassificationGate, SharedLandmarkEngine};
use crate::error::StageError;
use crate::geometry::{extract_region, RegionQuad};

const OUTLINE_WIDTH: u32 = 2;

#[derive(Default)]
pub struct TongueStage {
    engine: Option<SharedLandmarkEngine>,
    gate: ClassificationGate,
}

impl TongueStage {
    pub fn new(engine: SharedLandmarkEngine, gate: ClassificationGate) -> Self {
        Self {
            engine: Some(engine),
            gate,
        }
    }

    /// Mouth square of the first face, if the engine found one.
    fn locate(
        &self,
        engine: &SharedLandmarkEngine,
        image: &RgbaImage,
    ) -> Result<Option<RegionQuad>, StageError> {
        let Some(location) = locate_mouth(engine, image)? else {
            return Ok(None);
        };
        match location.region {
            Ok(quad) => Ok(Some(quad)),
            Err(e) => {
                debug!("no mouth square: {e}");
                Ok(None)
            }
        }
    }
}

impl Processor for TongueStage {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Tongue
    }

    fn setup(&mut self, context: &StageContext) -> Result<(), StageError> {
        if let Some(engine) = &context.face_landmarks {
            self.engine = Some(engine.clone());
        }
        if let Some(classifier) = &context.tongue_classifier {
            self.gate = ClassificationGate::new(Some(classifier.clone()));
        }
        if self.engine.is_none() {
            return Err(StageError::NotReady {
                stage: self.name(),
                reason: "no face landmark engine".into(),
            });
        }
        if !self.gate.is_ready() {
            return Err(StageError::NotReady {
                stage: self.name(),
                reason: "no tongue classifier".into(),
            });
        }
        Ok(())
    }

    #[instrument(skip_all, fields(seq = frame.sequence))]
    fn process_for_display(&self, frame: &Frame) -> Result<StageResult, StageError> {
        let Some(engine) = &self.engine else {
            return Ok(StageResult::unchanged(false));
        };
        let Some(quad) = self.locate(engine, &frame.image)? else {
            return Ok(StageResult::unchanged(false));
        };

        let sample = match extract_region(&frame.image, &quad) {
            Ok(sample) => Some(sample),
            Err(e) => {
                debug!("no region: {e}");
                None
            }
        };
        let outcome = self.gate.evaluate(sample.as_ref());

        let mut annotated = frame.image.clone();
        let color = if outcome.pass { GREEN } else { RED };
        polygon(&mut annotated, &quad.points, OUTLINE_WIDTH, color);
        Ok(StageResult::replaced(
            frame.with_image(annotated),
            outcome.pass,
        ))
    }

    /// The straightened mouth square at full resolution, or the still itself
    /// when no region could be cut out.
    fn process_for_saving(&self, still: &RgbaImage) -> Result<RgbaImage, StageError> {
        let Some(engine) = &self.engine else {
            return Ok(still.clone());
        };
        let Some(quad) = self.locate(engine, still)? else {
            return Ok(still.clone());
        };
        Ok(extract_region(still, &quad).unwrap_or_else(|e| {
            debug!("saving full still, no region: {e}");
            still.clone()
        }))
    }
}
