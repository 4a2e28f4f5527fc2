//! anycam demo host: synthetic camera -> processor chain -> preview, recording and stills

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anycam::capture::PixelFormat;
use anycam::detect::{shared_classifier, shared_engine, HueRatioClassifier, LandmarkEngine};
use anycam::error::EngineError;
use anycam::geometry::{Landmark, LandmarkSet};
use anycam::pipeline::{capture_still, persist};
use anycam::{
    capture, recording, Config, FramePipeline, ProcessorKind, ProcessorRegistry, RawFrame,
    Rotation, SavePath, StageContext,
};
use color_eyre::{eyre::eyre, Result};
use image::{Rgba, RgbaImage};
use tracing::{debug, info, warn};

/// Frames the synthetic camera produces before the demo wraps up
const DEMO_FRAMES: u64 = 90;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("anycam launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    anycam::CONFIG.store(Arc::new(config.clone()));

    if config.capture.format != PixelFormat::Rgba8 {
        warn!(format = ?config.capture.format, "synthetic camera only produces RGBA, ignoring format");
    }
    let rotation = Rotation::from_degrees(config.capture.rotation)?;

    // Engines are injected once; stages never build their own
    let context = StageContext::default()
        .with_face_landmarks(shared_engine(StaticFace))
        .with_tongue_classifier(shared_classifier(HueRatioClassifier::default()));
    let registry = Arc::new(ProcessorRegistry::from_settings(
        &config.processors.order,
        &context,
    ));
    registry.set_enabled(ProcessorKind::Tongue, true)?;
    registry.set_dummy_preview(ProcessorKind::Tongue, true)?;
    for d in registry.descriptors() {
        info!(
            position = d.position,
            stage = d.name,
            enabled = d.enabled,
            dummy_preview = d.dummy_preview,
            "processor"
        );
    }

    let sinks = recording::sink_factory(
        config.recording.encoder,
        config.recording.jpeg_quality,
        config.recording.fps,
    );
    let pipeline = FramePipeline::spawn(registry.clone(), sinks, &config.recording.output_dir)?;
    let display = pipeline.display();
    let events = pipeline.events();

    // Spawn capture task
    let submitter = pipeline.submitter();
    let (width, height) = (config.capture.width, config.capture.height);
    let frame_interval = Duration::from_millis(1000 / config.capture.fps.max(1) as u64);
    let camera = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(frame_interval);
        for sequence in 0..DEMO_FRAMES {
            ticker.tick().await;
            let image = test_pattern(width, height, sequence);
            submitter.submit(RawFrame::from_rgba(image, sequence, rotation));
        }
    });

    pipeline.start_recording()?;

    // Stand-in for the UI thread: follow the shutter status
    let wait = Duration::from_millis(config.pipeline.display_wait_ms);
    let mut shutter = None;
    while !camera.is_finished() {
        let display = display.clone();
        let Some(update) = tokio::task::spawn_blocking(move || display.wait(wait)).await? else {
            continue;
        };
        if shutter != Some(update.status) {
            info!(seq = update.sequence, enabled = update.status, "shutter");
            shutter = Some(update.status);
        }
        if config.pipeline.enable_profiling {
            for stage in &update.stages {
                debug!(
                    seq = update.sequence,
                    stage = %stage.kind,
                    elapsed_us = stage.elapsed.as_micros() as u64,
                    failed = stage.failed,
                    "stage timing"
                );
            }
        }
        for event in events.try_iter() {
            info!(?event, "pipeline event");
        }
    }
    camera.await?;

    match pipeline.stop_recording() {
        Ok(Some(video)) => info!(
            path = %video.path.display(),
            frames = video.frames,
            "recording saved"
        ),
        Ok(None) => warn!("no recording was running"),
        Err(e) => warn!("recording failed: {e}"),
    }

    // Capture one full-resolution still through the save path
    let still = capture::normalize(&RawFrame::from_rgba(
        test_pattern(width, height, DEMO_FRAMES / 2),
        DEMO_FRAMES,
        rotation,
    ))?;
    let save_path = Arc::new(SavePath::with_placeholder_file(
        config.processors.placeholder_image.as_deref(),
    ));
    let outputs = capture_still(save_path.clone(), still.image, registry.snapshot()).await?;
    for output in &outputs {
        info!(
            stage = output.name,
            review_is_placeholder = Arc::ptr_eq(&output.review, save_path.placeholder()),
            "still ready for review"
        );
    }
    let written = persist(&outputs, &config.save.output_dir, &config.save.base_name)?;
    info!(files = written.len(), "stills saved");

    let stats = pipeline.stats();
    info!(
        submitted = stats.submitted,
        processed = stats.processed,
        dropped = stats.dropped,
        rejected = stats.rejected,
        "pipeline stats"
    );
    pipeline
        .shutdown()
        .map_err(|e| eyre!("pipeline shutdown: {e}"))?;

    info!("anycam shutting down");
    Ok(())
}

fn init_tracing() {
    #[cfg(not(feature = "profiling"))]
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::prelude::*;
        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()))
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("anycam=debug"))
}

/// Grey background with a pink block sweeping left to right through the
/// mouth square of [`StaticFace`].
fn test_pattern(width: u32, height: u32, sequence: u64) -> RgbaImage {
    let mut image = RgbaImage::from_pixel(width, height, Rgba([90, 90, 90, 255]));
    let side = width / 5;
    let travel = (width - side) as u64;
    let x0 = ((sequence * 8) % travel.max(1)) as u32;
    let y0 = (height as f32 * MOUTH_Y) as u32;
    for y in y0..(y0 + side).min(height) {
        for x in x0..(x0 + side).min(width) {
            image.put_pixel(x, y, Rgba([225, 95, 130, 255]));
        }
    }
    image
}

const MOUTH_Y: f32 = 0.55;

/// Landmark engine that always reports one face with the mouth in the middle
/// of the frame.
struct StaticFace;

impl LandmarkEngine for StaticFace {
    fn detect(&mut self, _image: &RgbaImage) -> Result<Vec<LandmarkSet>, EngineError> {
        let mut points = vec![Landmark::new(0.5, 0.4); 468];
        points[61] = Landmark::new(0.4, MOUTH_Y);
        points[291] = Landmark::new(0.6, MOUTH_Y);
        Ok(vec![LandmarkSet::new(points)])
    }
}
