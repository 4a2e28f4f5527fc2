//! H.264/MP4 recording through a GStreamer `appsrc` pipeline

use std::path::Path;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use gstreamer_video as gst_video;
use image::RgbaImage;
use tracing::{info, warn};

use super::{EncoderSink, SinkFactory};
use crate::error::RecordingError;

/// How long `finish` waits for the muxer to write its trailer
const EOS_TIMEOUT_SECS: u64 = 10;

fn gst_err(context: &str, e: impl std::fmt::Debug) -> RecordingError {
    RecordingError::Encoder(format!("{context}: {e:?}"))
}

pub struct GstEncoderSink {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    width: u32,
    height: u32,
    frame_duration: gst::ClockTime,
    frames: u64,
}

impl GstEncoderSink {
    pub fn new(width: u32, height: u32, fps: u32, path: &Path) -> Result<Self, RecordingError> {
        gst::init().map_err(|e| gst_err("failed to initialize GStreamer", e))?;

        let fps = fps.max(1);
        let pipeline_str = format!(
            "appsrc name=src ! \
             videoconvert ! \
             x264enc tune=zerolatency ! \
             mp4mux ! \
             filesink location=\"{}\"",
            path.display()
        );

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| gst_err("failed to build pipeline", e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| RecordingError::Encoder("failed to create pipeline".into()))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| RecordingError::Encoder("failed to find appsrc".into()))?
            .downcast::<AppSrc>()
            .map_err(|_| RecordingError::Encoder("failed to cast to AppSrc".into()))?;

        let video_info =
            gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgba, width, height)
                .fps(gst::Fraction::new(fps as i32, 1))
                .build()
                .map_err(|e| gst_err("invalid video info", e))?;
        let caps = video_info
            .to_caps()
            .map_err(|e| gst_err("failed to build caps", e))?;
        appsrc.set_caps(Some(&caps));

        // Keep a single pending buffer; a newer frame replaces it
        appsrc.set_property("is-live", true);
        appsrc.set_property("block", false);
        appsrc.set_property("format", gst::Format::Time);
        if appsrc.has_property("max-buffers", None) {
            appsrc.set_property("max-buffers", 1u64);
        }
        if appsrc.has_property("leaky-type", None) {
            appsrc.set_property_from_str("leaky-type", "downstream");
        }

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| gst_err("failed to start pipeline", e))?;
        info!(path = %path.display(), width, height, fps, "gstreamer recorder playing");

        Ok(Self {
            pipeline,
            appsrc,
            width,
            height,
            frame_duration: gst::ClockTime::from_nseconds(1_000_000_000 / fps as u64),
            frames: 0,
        })
    }
}

impl EncoderSink for GstEncoderSink {
    fn draw(&mut self, frame: &RgbaImage) -> Result<(), RecordingError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(RecordingError::FrameSize {
                width: self.width,
                height: self.height,
                got_width: frame.width(),
                got_height: frame.height(),
            });
        }

        let mut buffer = gst::Buffer::from_mut_slice(frame.as_raw().clone());
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| RecordingError::Encoder("buffer not writable".into()))?;
            buffer_ref.set_pts(self.frame_duration * self.frames);
            buffer_ref.set_duration(self.frame_duration);
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| gst_err("failed to push buffer", e))?;
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), RecordingError> {
        self.appsrc
            .end_of_stream()
            .map_err(|e| gst_err("failed to send EOS", e))?;

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| RecordingError::Encoder("pipeline has no bus".into()))?;

        // Drop sets the pipeline to Null once the trailer is written
        match bus.timed_pop_filtered(
            gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
            &[gst::MessageType::Eos, gst::MessageType::Error],
        ) {
            Some(msg) => match msg.view() {
                gst::MessageView::Error(err) => Err(RecordingError::Encoder(format!(
                    "error from {:?}: {} ({:?})",
                    err.src().map(|s| s.path_string()),
                    err.error(),
                    err.debug()
                ))),
                _ => Ok(()),
            },
            None => Err(RecordingError::Encoder(
                "timed out waiting for end of stream".into(),
            )),
        }
    }
}

impl Drop for GstEncoderSink {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("failed to stop recorder pipeline: {e:?}");
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GstSinkFactory {
    fps: u32,
}

impl GstSinkFactory {
    pub fn new(fps: u32) -> Self {
        Self { fps }
    }
}

impl SinkFactory for GstSinkFactory {
    fn extension(&self) -> &'static str {
        "mp4"
    }

    fn create(
        &self,
        width: u32,
        height: u32,
        path: &Path,
    ) -> Result<Box<dyn EncoderSink>, RecordingError> {
        Ok(Box::new(GstEncoderSink::new(width, height, self.fps, path)?))
    }
}
