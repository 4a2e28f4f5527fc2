//! Contracts for the external landmark / classification engines and the
//! detector facade built on top of them.
//!
//! Engines are black boxes: give them an image, get normalized landmarks or a
//! class index back. They are injected into stages at construction time and
//! shared between the display worker and the save path, hence the mutex.

pub mod detector;
pub mod gate;

pub use detector::{
    locate_mouth, DetectionResult, DetectionStatus, Detector, LiveDetection, MouthLocation,
    RegionDetector, RunningMode,
};
pub use gate::{ClassVerdict, ClassificationGate, GateOutcome, HueRatioClassifier};

use std::sync::{Arc, Mutex};

use image::RgbaImage;

use crate::error::EngineError;
use crate::geometry::LandmarkSet;

/// Produces zero or more landmark sets (one per detected face / body).
pub trait LandmarkEngine: Send {
    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<LandmarkSet>, EngineError>;
}

/// Returns the most likely class index for an image.
pub trait Classifier: Send {
    fn classify(&mut self, image: &RgbaImage) -> Result<usize, EngineError>;
}

pub type SharedLandmarkEngine = Arc<Mutex<dyn LandmarkEngine>>;
pub type SharedClassifier = Arc<Mutex<dyn Classifier>>;

pub fn shared_engine<E: LandmarkEngine + 'static>(engine: E) -> SharedLandmarkEngine {
    Arc::new(Mutex::new(engine))
}

pub fn shared_classifier<C: Classifier + 'static>(classifier: C) -> SharedClassifier {
    Arc::new(Mutex::new(classifier))
}

/// Run a shared landmark engine, mapping a poisoned lock to an engine error.
pub fn run_landmarks(
    engine: &SharedLandmarkEngine,
    image: &RgbaImage,
) -> Result<Vec<LandmarkSet>, EngineError> {
    engine
        .lock()
        .map_err(|_| EngineError::Poisoned)?
        .detect(image)
}
