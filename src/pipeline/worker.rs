//! Background frame worker.
//!
//! One thread drains the keep-latest frame slot, runs the display chain, feeds
//! an active recording and publishes `(frame, status)` for the UI. Recording
//! commands are answered on the same thread, so the encoder sees frames in
//! capture order.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{Receiver, Selector, Sender};
use metrics::counter;
use tracing::{debug, error, info, instrument, warn};

use super::chain::{run_display, ChainOutput, StageStatus};
use super::mailbox::Mailbox;
use super::registry::ProcessorRegistry;
use crate::capture::{normalize, Frame, RawFrame};
use crate::error::RecordingError;
use crate::recording::{RecordedVideo, RecordingState, SinkFactory, VideoRecordingSession};

const EVENT_BACKLOG: usize = 64;

/// Finished display frame and the shutter status computed for it.
#[derive(Debug, Clone)]
pub struct DisplayUpdate {
    pub frame: Frame,
    pub status: bool,
    pub sequence: u64,
    pub stages: Vec<StageStatus>,
}

/// Things the host may want to surface that do not belong to a command reply.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    RecordingStarted {
        path: PathBuf,
        width: u32,
        height: u32,
    },
    RecordingFailed {
        reason: String,
    },
    FrameRejected {
        sequence: u64,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub submitted: usize,
    pub processed: usize,
    pub dropped: usize,
    pub rejected: usize,
}

#[derive(Default)]
struct WorkerCounters {
    processed: AtomicUsize,
    rejected: AtomicUsize,
}

type RecordingReply = Sender<Result<Option<RecordedVideo>, RecordingError>>;

enum Command {
    StartRecording { reply: Sender<Result<(), RecordingError>> },
    StopRecording { reply: RecordingReply },
    Shutdown { reply: RecordingReply },
}

/// Cloneable handle for the capture side. Submitting never blocks: a frame
/// that is still pending when the next one arrives is dropped.
#[derive(Clone)]
pub struct FrameSubmitter {
    frames: Arc<Mailbox<RawFrame>>,
}

impl FrameSubmitter {
    pub fn submit(&self, frame: RawFrame) {
        if self.frames.post(frame) {
            counter!("frames_dropped").increment(1);
        }
    }
}

/// UI side of the single-slot display handoff.
#[derive(Clone)]
pub struct DisplayMailbox {
    updates: Arc<Mailbox<DisplayUpdate>>,
}

impl DisplayMailbox {
    /// Most recent update, left in place.
    pub fn latest(&self) -> Option<Arc<DisplayUpdate>> {
        self.updates.latest()
    }

    pub fn take(&self) -> Option<Arc<DisplayUpdate>> {
        self.updates.take()
    }

    pub fn wait(&self, timeout: Duration) -> Option<Arc<DisplayUpdate>> {
        self.updates.wait(timeout)
    }
}

pub struct FramePipeline {
    frames: Arc<Mailbox<RawFrame>>,
    display: Arc<Mailbox<DisplayUpdate>>,
    commands: Sender<Command>,
    events: Receiver<PipelineEvent>,
    counters: Arc<CachePadded<WorkerCounters>>,
    handle: Option<JoinHandle<()>>,
}

impl FramePipeline {
    /// Start the `frame-worker` thread. Recordings are written to
    /// `recording_dir` through `sinks`.
    pub fn spawn(
        registry: Arc<ProcessorRegistry>,
        sinks: Arc<dyn SinkFactory>,
        recording_dir: impl Into<PathBuf>,
    ) -> std::io::Result<Self> {
        let frames = Arc::new(Mailbox::new());
        let display = Arc::new(Mailbox::new());
        let (commands, command_rx) = flume::unbounded();
        let (event_tx, events) = flume::bounded(EVENT_BACKLOG);
        let counters = Arc::new(CachePadded::new(WorkerCounters::default()));

        let worker = Worker {
            registry,
            frames: frames.clone(),
            display: display.clone(),
            commands: command_rx,
            events: event_tx,
            session: VideoRecordingSession::new(sinks, recording_dir),
            pending_start: false,
            counters: counters.clone(),
        };
        let handle = thread::Builder::new()
            .name("frame-worker".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            frames,
            display,
            commands,
            events,
            counters,
            handle: Some(handle),
        })
    }

    pub fn submitter(&self) -> FrameSubmitter {
        FrameSubmitter {
            frames: self.frames.clone(),
        }
    }

    pub fn display(&self) -> DisplayMailbox {
        DisplayMailbox {
            updates: self.display.clone(),
        }
    }

    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events.clone()
    }

    /// Arm a recording. The output is opened on the next processed frame,
    /// sized to it; a failure there arrives as [`PipelineEvent::RecordingFailed`].
    pub fn start_recording(&self) -> Result<(), RecordingError> {
        let (reply, rx) = flume::bounded(1);
        self.request(Command::StartRecording { reply }, rx)
            .and_then(|r| r)
    }

    /// Finalize the current recording. `Ok(None)` when nothing was recording.
    pub fn stop_recording(&self) -> Result<Option<RecordedVideo>, RecordingError> {
        let (reply, rx) = flume::bounded(1);
        self.request(Command::StopRecording { reply }, rx)
            .and_then(|r| r)
    }

    pub fn stats(&self) -> PipelineStats {
        let frames = self.frames.stats();
        PipelineStats {
            submitted: frames.posted,
            processed: self.counters.processed.load(Ordering::Relaxed),
            dropped: frames.dropped,
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Stop the worker and wait for it. An active recording is finalized and
    /// its result returned.
    pub fn shutdown(mut self) -> Result<Option<RecordedVideo>, RecordingError> {
        self.stop_worker()
    }

    fn request<T>(&self, command: Command, reply: Receiver<T>) -> Result<T, RecordingError> {
        self.commands
            .send(command)
            .map_err(|_| RecordingError::WorkerGone)?;
        reply.recv().map_err(|_| RecordingError::WorkerGone)
    }

    fn stop_worker(&mut self) -> Result<Option<RecordedVideo>, RecordingError> {
        let Some(handle) = self.handle.take() else {
            return Ok(None);
        };
        let (reply, rx) = flume::bounded(1);
        let result = self
            .request(Command::Shutdown { reply }, rx)
            .and_then(|r| r);
        if handle.join().is_err() {
            error!("frame worker panicked");
        }
        self.frames.clear();
        self.display.clear();
        info!("frame pipeline stopped");
        result
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop_worker() {
            warn!("recording lost during pipeline teardown: {e}");
        }
    }
}

enum Wake {
    Frame,
    Command(Command),
    Disconnected,
}

struct Worker {
    registry: Arc<ProcessorRegistry>,
    frames: Arc<Mailbox<RawFrame>>,
    display: Arc<Mailbox<DisplayUpdate>>,
    commands: Receiver<Command>,
    events: Sender<PipelineEvent>,
    session: VideoRecordingSession,
    /// A recording was requested and opens on the next frame
    pending_start: bool,
    counters: Arc<CachePadded<WorkerCounters>>,
}

impl Worker {
    fn run(mut self) {
        info!("frame worker started");
        loop {
            let wake = Selector::new()
                .recv(&self.commands, |msg| {
                    msg.map(Wake::Command).unwrap_or(Wake::Disconnected)
                })
                .recv(self.frames.doorbell(), |_| Wake::Frame)
                .wait();

            match wake {
                Wake::Frame => {
                    if let Some(raw) = self.frames.take() {
                        self.process(&raw);
                    }
                }
                Wake::Command(Command::StartRecording { reply }) => {
                    let _ = reply.send(self.arm_recording());
                }
                Wake::Command(Command::StopRecording { reply }) => {
                    let _ = reply.send(self.stop_recording());
                }
                Wake::Command(Command::Shutdown { reply }) => {
                    let _ = reply.send(self.stop_recording());
                    break;
                }
                Wake::Disconnected => {
                    if let Err(e) = self.stop_recording() {
                        warn!("recording lost on disconnect: {e}");
                    }
                    break;
                }
            }
        }
        info!("frame worker exiting");
    }

    fn arm_recording(&mut self) -> Result<(), RecordingError> {
        if self.pending_start || self.session.state() == RecordingState::Recording {
            return Err(RecordingError::AlreadyRecording);
        }
        self.pending_start = true;
        debug!("recording armed");
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<Option<RecordedVideo>, RecordingError> {
        if std::mem::take(&mut self.pending_start) {
            debug!("armed recording cancelled before the first frame");
        }
        self.session.stop()
    }

    #[instrument(skip_all, fields(seq = raw.meta.sequence))]
    fn process(&mut self, raw: &RawFrame) {
        let frame = match normalize(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping frame: {e}");
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                self.publish(PipelineEvent::FrameRejected {
                    sequence: raw.meta.sequence,
                    reason: e.to_string(),
                });
                return;
            }
        };

        // One snapshot per frame; reorders land on the next frame
        let snapshot = self.registry.snapshot();
        let ChainOutput {
            frame: processed,
            stages,
            status,
        } = run_display(&frame, &snapshot);
        let processed = match processed {
            Cow::Owned(processed) => processed,
            Cow::Borrowed(_) => frame,
        };

        self.record(&processed);

        // Counted before publishing, so a reader woken by the post sees it
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        let sequence = processed.sequence;
        self.display.post(DisplayUpdate {
            frame: processed,
            status,
            sequence,
            stages,
        });
    }

    fn record(&mut self, frame: &Frame) {
        if std::mem::take(&mut self.pending_start) {
            match self.session.start(frame.width(), frame.height()) {
                Ok(path) => self.publish(PipelineEvent::RecordingStarted {
                    path,
                    width: frame.width(),
                    height: frame.height(),
                }),
                Err(e) => {
                    error!("could not start recording: {e}");
                    self.publish(PipelineEvent::RecordingFailed {
                        reason: e.to_string(),
                    });
                }
            }
        }
        if let Err(e) = self.session.feed(&frame.image) {
            warn!("frame not recorded: {e}");
        }
    }

    fn publish(&self, event: PipelineEvent) {
        if self.events.try_send(event).is_err() {
            debug!("pipeline event dropped, nobody is listening");
        }
    }
}
