//! Video recording of the annotated display stream.
//!
//! A session is `Idle` or `Recording`; finalizing happens inside `stop`. It
//! never spans more than one output file.

pub mod avi;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_sink;
pub mod mjpeg;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use image::RgbaImage;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::RecordingError;

pub use avi::{AviMjpegSink, AviSinkFactory};
pub use mjpeg::{MjpegFileSink, MjpegSinkFactory};

/// Encoder input surface sized at creation.
pub trait EncoderSink: Send {
    /// Encode one frame. Frames arrive in capture order.
    fn draw(&mut self, frame: &RgbaImage) -> Result<(), RecordingError>;

    /// Flush and close the container.
    fn finish(self: Box<Self>) -> Result<(), RecordingError>;
}

pub trait SinkFactory: Send + Sync {
    /// File extension of the produced container, without the dot.
    fn extension(&self) -> &'static str;

    fn create(
        &self,
        width: u32,
        height: u32,
        path: &Path,
    ) -> Result<Box<dyn EncoderSink>, RecordingError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// Motion-JPEG in an AVI container
    #[default]
    Avi,
    /// Bare Motion-JPEG stream without a container
    Mjpeg,
    /// H.264 in MP4 through GStreamer; needs the `gstreamer-pipeline` feature
    Gstreamer,
}

/// Sink factory for `kind`, falling back to AVI when GStreamer support is
/// not compiled in.
pub fn sink_factory(kind: EncoderKind, jpeg_quality: u8, fps: u32) -> Arc<dyn SinkFactory> {
    match kind {
        EncoderKind::Avi => Arc::new(AviSinkFactory::new(jpeg_quality, fps)),
        EncoderKind::Mjpeg => Arc::new(MjpegSinkFactory::new(jpeg_quality)),
        #[cfg(feature = "gstreamer-pipeline")]
        EncoderKind::Gstreamer => Arc::new(gst_sink::GstSinkFactory::new(fps)),
        #[cfg(not(feature = "gstreamer-pipeline"))]
        EncoderKind::Gstreamer => {
            warn!("built without gstreamer-pipeline, recording AVI instead");
            Arc::new(AviSinkFactory::new(jpeg_quality, fps))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
}

/// A finalized recording.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedVideo {
    pub path: PathBuf,
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub duration: Duration,
}

struct ActiveRecording {
    sink: Box<dyn EncoderSink>,
    path: PathBuf,
    width: u32,
    height: u32,
    frames: u64,
    started: Instant,
}

pub struct VideoRecordingSession {
    factory: Arc<dyn SinkFactory>,
    output_dir: PathBuf,
    active: Option<ActiveRecording>,
}

impl VideoRecordingSession {
    pub fn new(factory: Arc<dyn SinkFactory>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            factory,
            output_dir: output_dir.into(),
            active: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        if self.active.is_some() {
            RecordingState::Recording
        } else {
            RecordingState::Idle
        }
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    /// Open a new output sized `width`x`height`. Only allowed from `Idle`.
    pub fn start(&mut self, width: u32, height: u32) -> Result<PathBuf, RecordingError> {
        if self.active.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }
        if width == 0 || height == 0 {
            return Err(RecordingError::Encoder(format!(
                "cannot record {width}x{height} frames"
            )));
        }
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.next_path();
        let sink = self.factory.create(width, height, &path)?;

        info!(path = %path.display(), width, height, "recording started");
        self.active = Some(ActiveRecording {
            sink,
            path: path.clone(),
            width,
            height,
            frames: 0,
            started: Instant::now(),
        });
        Ok(path)
    }

    /// Draw one processed display frame. Ignored while `Idle`.
    pub fn feed(&mut self, frame: &RgbaImage) -> Result<(), RecordingError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        let (w, h) = frame.dimensions();
        if (w, h) != (active.width, active.height) {
            return Err(RecordingError::FrameSize {
                width: active.width,
                height: active.height,
                got_width: w,
                got_height: h,
            });
        }
        active.sink.draw(frame)?;
        active.frames += 1;
        counter!("recording_frames").increment(1);
        Ok(())
    }

    /// Finalize the current file and return to `Idle`. A no-op while `Idle`.
    ///
    /// Zero frames written, or a failing finalize, removes the partial file
    /// and reports an error instead of a video.
    pub fn stop(&mut self) -> Result<Option<RecordedVideo>, RecordingError> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };
        let ActiveRecording {
            sink,
            path,
            width,
            height,
            frames,
            started,
        } = active;

        let finished = sink.finish();
        let outcome = match finished {
            Err(e) => Err(e),
            Ok(()) if frames == 0 => Err(RecordingError::Empty(path.clone())),
            Ok(()) => Ok(RecordedVideo {
                path: path.clone(),
                frames,
                width,
                height,
                duration: started.elapsed(),
            }),
        };

        match outcome {
            Ok(video) => {
                info!(path = %video.path.display(), frames, "recording finalized");
                Ok(Some(video))
            }
            Err(e) => {
                error!(path = %path.display(), "recording failed: {e}");
                if let Err(rm) = std::fs::remove_file(&path) {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %path.display(), "could not remove partial recording: {rm}");
                    }
                }
                Err(e)
            }
        }
    }

    fn next_path(&self) -> PathBuf {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let ext = self.factory.extension();
        let mut path = self.output_dir.join(format!("recording_{millis}.{ext}"));
        let mut n = 1;
        while path.exists() {
            path = self
                .output_dir
                .join(format!("recording_{millis}_{n}.{ext}"));
            n += 1;
        }
        path
    }
}

impl Drop for VideoRecordingSession {
    fn drop(&mut self) {
        if self.active.is_some() {
            warn!("recording session dropped while active, finalizing");
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records draw calls; can be told to fail on finish.
    #[derive(Default)]
    struct CountingFactory {
        drawn: Arc<AtomicUsize>,
        fail_finish: bool,
        created: Mutex<Vec<(u32, u32)>>,
    }

    struct CountingSink {
        drawn: Arc<AtomicUsize>,
        fail_finish: bool,
    }

    impl EncoderSink for CountingSink {
        fn draw(&mut self, _frame: &RgbaImage) -> Result<(), RecordingError> {
            self.drawn.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn finish(self: Box<Self>) -> Result<(), RecordingError> {
            if self.fail_finish {
                Err(RecordingError::Encoder("muxer refused".into()))
            } else {
                Ok(())
            }
        }
    }

    impl SinkFactory for CountingFactory {
        fn extension(&self) -> &'static str {
            "count"
        }
        fn create(
            &self,
            width: u32,
            height: u32,
            path: &Path,
        ) -> Result<Box<dyn EncoderSink>, RecordingError> {
            std::fs::write(path, b"")?;
            self.created.lock().unwrap().push((width, height));
            Ok(Box::new(CountingSink {
                drawn: self.drawn.clone(),
                fail_finish: self.fail_finish,
            }))
        }
    }

    #[test]
    fn stop_while_idle_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut session =
            VideoRecordingSession::new(Arc::new(CountingFactory::default()), dir.path());
        assert_eq!(session.state(), RecordingState::Idle);
        assert!(session.stop().unwrap().is_none());
        assert_eq!(session.state(), RecordingState::Idle);
    }

    #[test]
    fn start_while_recording_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(CountingFactory::default());
        let mut session = VideoRecordingSession::new(factory.clone(), dir.path());
        session.start(4, 4).unwrap();
        assert!(matches!(
            session.start(4, 4),
            Err(RecordingError::AlreadyRecording)
        ));
        assert_eq!(factory.created.lock().unwrap().len(), 1);
    }

    #[test]
    fn frames_of_the_wrong_size_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut session =
            VideoRecordingSession::new(Arc::new(CountingFactory::default()), dir.path());
        session.start(4, 4).unwrap();
        assert!(matches!(
            session.feed(&RgbaImage::new(8, 4)),
            Err(RecordingError::FrameSize { got_width: 8, .. })
        ));
    }

    #[test]
    fn empty_recording_is_an_error_and_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut session =
            VideoRecordingSession::new(Arc::new(CountingFactory::default()), dir.path());
        let path = session.start(4, 4).unwrap();
        assert!(matches!(session.stop(), Err(RecordingError::Empty(_))));
        assert!(!path.exists());
        assert_eq!(session.state(), RecordingState::Idle);
    }

    #[test]
    fn failed_finalize_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let factory = CountingFactory {
            fail_finish: true,
            ..CountingFactory::default()
        };
        let mut session = VideoRecordingSession::new(Arc::new(factory), dir.path());
        let path = session.start(4, 4).unwrap();
        session.feed(&RgbaImage::new(4, 4)).unwrap();
        assert!(matches!(session.stop(), Err(RecordingError::Encoder(_))));
        assert!(!path.exists());
    }

    #[test]
    fn feed_while_idle_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(CountingFactory::default());
        let mut session = VideoRecordingSession::new(factory.clone(), dir.path());
        session.feed(&RgbaImage::new(4, 4)).unwrap();
        assert_eq!(factory.drawn.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn back_to_back_recordings_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut session =
            VideoRecordingSession::new(Arc::new(CountingFactory::default()), dir.path());
        let first = session.start(2, 2).unwrap();
        session.feed(&RgbaImage::new(2, 2)).unwrap();
        session.stop().unwrap();
        let second = session.start(2, 2).unwrap();
        assert_ne!(first, second);
    }
}
