use image::RgbaImage;

use super::{Processor, ProcessorKind, StageContext, StageResult};
use crate::capture::Frame;
use crate::error::StageError;

/// Pass-through stage. Never blocks capture and never touches the pixels.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawStage;

impl Processor for RawStage {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Raw
    }

    fn setup(&mut self, _context: &StageContext) -> Result<(), StageError> {
        Ok(())
    }

    fn process_for_display(&self, _frame: &Frame) -> Result<StageResult, StageError> {
        Ok(StageResult::unchanged(true))
    }

    fn process_for_saving(&self, still: &RgbaImage) -> Result<RgbaImage, StageError> {
        Ok(still.clone())
    }
}
