//! Display-path executor.
//!
//! The caller's frame is only ever borrowed. Each stage that allocates a new
//! frame hands it over as `Replaced`; the executor then owns it, and the
//! previous owned frame is dropped as soon as it is replaced.

use std::any::Any;
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use metrics::histogram;
use tracing::{instrument, warn};

use super::registry::ActiveStage;
use crate::capture::Frame;
use crate::error::StageError;
use crate::processors::{ProcessorKind, StageOutput, StageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageStatus {
    pub kind: ProcessorKind,
    pub status: bool,
    /// The stage errored or panicked and was passed through
    pub failed: bool,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct ChainOutput<'a> {
    pub frame: Cow<'a, Frame>,
    pub stages: Vec<StageStatus>,
    pub status: bool,
}

impl ChainOutput<'_> {
    pub fn into_frame(self) -> Frame {
        self.frame.into_owned()
    }
}

/// AND over all stage statuses. No active stages never blocks the shutter.
pub fn aggregate_status<I>(statuses: I) -> bool
where
    I: IntoIterator<Item = bool>,
{
    statuses.into_iter().all(|s| s)
}

/// Run `stages` in order, threading each stage's output into the next.
///
/// A stage that errors or panics is logged and treated as a pass-through with
/// status `false`; the rest of the chain still runs.
#[instrument(skip_all, fields(seq = frame.sequence, stages = stages.len()))]
pub fn run_display<'a>(frame: &'a Frame, stages: &[ActiveStage]) -> ChainOutput<'a> {
    let chain_start = Instant::now();
    let mut current: Cow<'a, Frame> = Cow::Borrowed(frame);
    let mut statuses = Vec::with_capacity(stages.len());

    for stage in stages {
        let kind = stage.descriptor.kind;
        let start = Instant::now();
        let result = guarded(stage.processor.name(), || {
            stage.processor.process_for_display(&current)
        });
        let elapsed = start.elapsed();
        histogram!("stage_time_us", "stage" => kind.key()).record(elapsed.as_micros() as f64);

        let (status, failed) = match result {
            Ok(StageResult { output, status }) => {
                if let StageOutput::Replaced(next) = output {
                    current = Cow::Owned(next);
                }
                (status, false)
            }
            Err(e) => {
                warn!(stage = %kind, "stage failed, passing frame through: {e}");
                (false, true)
            }
        };
        statuses.push(StageStatus {
            kind,
            status,
            failed,
            elapsed,
        });
    }

    histogram!("chain_time_us").record(chain_start.elapsed().as_micros() as f64);
    let status = aggregate_status(statuses.iter().map(|s| s.status));
    ChainOutput {
        frame: current,
        stages: statuses,
        status,
    }
}

/// Run one stage call, turning a panic into [`StageError::Panicked`].
pub(crate) fn guarded<T, F>(stage: &'static str, call: F) -> Result<T, StageError>
where
    F: FnOnce() -> Result<T, StageError>,
{
    catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| {
        Err(StageError::Panicked {
            stage,
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::processors::{Processor, RawStage, StageContext};
    use image::{Rgba, RgbaImage};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;
    use std::sync::Arc;

    /// Fills a rectangle with its colour; status fixed per instance.
    struct Painter {
        kind: ProcessorKind,
        rect: Rect,
        color: Rgba<u8>,
        status: bool,
    }

    impl Processor for Painter {
        fn kind(&self) -> ProcessorKind {
            self.kind
        }
        fn setup(&mut self, _: &StageContext) -> Result<(), StageError> {
            Ok(())
        }
        fn process_for_display(&self, frame: &Frame) -> Result<StageResult, StageError> {
            let mut image = frame.image.clone();
            draw_filled_rect_mut(&mut image, self.rect, self.color);
            Ok(StageResult::replaced(frame.with_image(image), self.status))
        }
        fn process_for_saving(&self, still: &RgbaImage) -> Result<RgbaImage, StageError> {
            Ok(still.clone())
        }
    }

    struct Failing;

    impl Processor for Failing {
        fn kind(&self) -> ProcessorKind {
            ProcessorKind::Face
        }
        fn setup(&mut self, _: &StageContext) -> Result<(), StageError> {
            Ok(())
        }
        fn process_for_display(&self, _: &Frame) -> Result<StageResult, StageError> {
            Err(EngineError::Inference("boom".into()).into())
        }
        fn process_for_saving(&self, _: &RgbaImage) -> Result<RgbaImage, StageError> {
            Err(EngineError::Unavailable.into())
        }
    }

    struct Panicking;

    impl Processor for Panicking {
        fn kind(&self) -> ProcessorKind {
            ProcessorKind::Wink
        }
        fn setup(&mut self, _: &StageContext) -> Result<(), StageError> {
            Ok(())
        }
        fn process_for_display(&self, _: &Frame) -> Result<StageResult, StageError> {
            panic!("stage bug")
        }
        fn process_for_saving(&self, _: &RgbaImage) -> Result<RgbaImage, StageError> {
            panic!("stage bug")
        }
    }

    fn stage<P: Processor + 'static>(p: P) -> ActiveStage {
        ActiveStage::new(Arc::new(p))
    }

    fn painter(kind: ProcessorKind, x: i32, color: [u8; 4], status: bool) -> ActiveStage {
        stage(Painter {
            kind,
            rect: Rect::at(x, 2).of_size(6, 6),
            color: Rgba(color),
            status,
        })
    }

    fn test_frame() -> Frame {
        let image = RgbaImage::from_fn(16, 12, |x, y| Rgba([x as u8 * 10, y as u8 * 20, 7, 255]));
        Frame::new(image, 42, Instant::now())
    }

    #[test]
    fn raw_alone_is_bit_identical_and_passes() {
        let frame = test_frame();
        let out = run_display(&frame, &[stage(RawStage)]);
        assert!(out.status);
        assert!(matches!(out.frame, Cow::Borrowed(_)));
        assert_eq!(out.frame.image.as_raw(), frame.image.as_raw());
    }

    #[test]
    fn empty_chain_passes_the_original_through() {
        let frame = test_frame();
        let out = run_display(&frame, &[]);
        assert!(out.status);
        assert!(std::ptr::eq(out.frame.as_ref(), &frame));
    }

    #[test]
    fn order_is_observable() {
        let frame = test_frame();
        let a = painter(ProcessorKind::Face, 2, [255, 0, 0, 255], true);
        let b = painter(ProcessorKind::Pose, 5, [0, 0, 255, 255], true);

        let ab = run_display(&frame, &[a.clone(), b.clone()]).into_frame();
        let ba = run_display(&frame, &[b, a]).into_frame();
        // (6, 4) is covered by both rectangles
        assert_eq!(ab.image.get_pixel(6, 4).0, [0, 0, 255, 255]);
        assert_eq!(ba.image.get_pixel(6, 4).0, [255, 0, 0, 255]);
        assert_ne!(ab.image.as_raw(), ba.image.as_raw());
        // caller's frame untouched
        assert_eq!(frame.image.get_pixel(6, 4).0, [60, 80, 7, 255]);
    }

    #[test]
    fn any_false_status_blocks() {
        let frame = test_frame();
        let out = run_display(
            &frame,
            &[
                painter(ProcessorKind::Face, 0, [1, 1, 1, 255], true),
                painter(ProcessorKind::Pose, 0, [2, 2, 2, 255], false),
                stage(RawStage),
            ],
        );
        assert!(!out.status);
        assert_eq!(
            out.stages.iter().map(|s| s.status).collect::<Vec<_>>(),
            vec![true, false, true]
        );
    }

    #[test]
    fn failing_and_panicking_stages_pass_through() {
        let frame = test_frame();
        let out = run_display(
            &frame,
            &[
                stage(Failing),
                painter(ProcessorKind::Pose, 0, [9, 9, 9, 255], true),
                stage(Panicking),
            ],
        );
        assert!(!out.status);
        assert!(out.stages[0].failed && !out.stages[0].status);
        assert!(!out.stages[1].failed);
        assert!(out.stages[2].failed);
        // the painter's output survived the panicking stage after it
        assert_eq!(out.frame.image.get_pixel(1, 3).0, [9, 9, 9, 255]);
    }

    struct Slow;

    impl Processor for Slow {
        fn kind(&self) -> ProcessorKind {
            ProcessorKind::Raw
        }
        fn setup(&mut self, _: &StageContext) -> Result<(), StageError> {
            Ok(())
        }
        fn process_for_display(&self, _: &Frame) -> Result<StageResult, StageError> {
            std::thread::sleep(Duration::from_millis(5));
            Ok(StageResult::unchanged(true))
        }
        fn process_for_saving(&self, still: &RgbaImage) -> Result<RgbaImage, StageError> {
            Ok(still.clone())
        }
    }

    #[test]
    fn stage_time_is_reported() {
        let frame = test_frame();
        let out = run_display(&frame, &[stage(Slow)]);
        assert_eq!(out.stages.len(), 1);
        assert!(out.stages[0].elapsed >= Duration::from_millis(5));
    }

    #[test]
    fn aggregate_semantics() {
        assert!(aggregate_status([]));
        assert!(aggregate_status([true, true]));
        assert!(!aggregate_status([true, false, true]));
    }
}
