//! Pluggable processor stages and their static registration table.

pub mod draw;
pub mod face;
pub mod pose;
pub mod raw;
pub mod tongue;
pub mod wink;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::detect::{SharedClassifier, SharedLandmarkEngine};
use crate::error::{RegistryError, StageError};

pub use face::FaceStage;
pub use pose::PoseStage;
pub use raw::RawStage;
pub use tongue::TongueStage;
pub use wink::WinkStage;

/// What a stage did to the frame it was given.
#[derive(Debug)]
pub enum StageOutput {
    /// The input frame is carried forward as is
    Unchanged,
    /// A freshly allocated frame replaces the input
    Replaced(Frame),
}

#[derive(Debug)]
pub struct StageResult {
    pub output: StageOutput,
    /// `true` means this stage does not block capture
    pub status: bool,
}

impl StageResult {
    pub fn unchanged(status: bool) -> Self {
        Self {
            output: StageOutput::Unchanged,
            status,
        }
    }

    pub fn replaced(frame: Frame, status: bool) -> Self {
        Self {
            output: StageOutput::Replaced(frame),
            status,
        }
    }
}

/// Engines handed to stages at construction time.
#[derive(Clone, Default)]
pub struct StageContext {
    pub face_landmarks: Option<SharedLandmarkEngine>,
    pub pose_landmarks: Option<SharedLandmarkEngine>,
    pub tongue_classifier: Option<SharedClassifier>,
}

impl StageContext {
    pub fn with_face_landmarks(mut self, engine: SharedLandmarkEngine) -> Self {
        self.face_landmarks = Some(engine);
        self
    }

    pub fn with_pose_landmarks(mut self, engine: SharedLandmarkEngine) -> Self {
        self.pose_landmarks = Some(engine);
        self
    }

    pub fn with_tongue_classifier(mut self, classifier: SharedClassifier) -> Self {
        self.tongue_classifier = Some(classifier);
        self
    }
}

/// One step of the frame-processing chain.
///
/// `setup` runs once before the stage is shared with the worker. A stage whose
/// engine is missing reports [`StageError::NotReady`] there but must still
/// answer `process_for_display` with a usable frame and a defined status.
pub trait Processor: Send + Sync {
    fn kind(&self) -> ProcessorKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn save_directory_name(&self) -> &'static str {
        self.kind().save_directory_name()
    }

    fn setup(&mut self, context: &StageContext) -> Result<(), StageError>;

    /// Low-latency path driving the preview and the recording.
    fn process_for_display(&self, frame: &Frame) -> Result<StageResult, StageError>;

    /// Full-resolution path for a captured still. Never affects stream status.
    fn process_for_saving(&self, still: &RgbaImage) -> Result<RgbaImage, StageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    Raw,
    Face,
    Pose,
    Tongue,
    Wink,
}

struct Registration {
    kind: ProcessorKind,
    key: &'static str,
    name: &'static str,
    save_directory: &'static str,
    build: fn() -> Box<dyn Processor>,
}

fn build_raw() -> Box<dyn Processor> {
    Box::new(RawStage)
}

fn build_face() -> Box<dyn Processor> {
    Box::new(FaceStage::default())
}

fn build_pose() -> Box<dyn Processor> {
    Box::new(PoseStage::default())
}

fn build_tongue() -> Box<dyn Processor> {
    Box::new(TongueStage::default())
}

fn build_wink() -> Box<dyn Processor> {
    Box::new(WinkStage::default())
}

static REGISTRATIONS: [Registration; 5] = [
    Registration {
        kind: ProcessorKind::Raw,
        key: "raw",
        name: "Raw",
        save_directory: "Raw",
        build: build_raw,
    },
    Registration {
        kind: ProcessorKind::Face,
        key: "face",
        name: "Face",
        save_directory: "FaceDetector",
        build: build_face,
    },
    Registration {
        kind: ProcessorKind::Pose,
        key: "pose",
        name: "Pose",
        save_directory: "PoseDetector",
        build: build_pose,
    },
    Registration {
        kind: ProcessorKind::Tongue,
        key: "tongue",
        name: "Tongue",
        save_directory: "TongueDetector",
        build: build_tongue,
    },
    Registration {
        kind: ProcessorKind::Wink,
        key: "wink",
        name: "Wink",
        save_directory: "WinkDetector",
        build: build_wink,
    },
];

impl ProcessorKind {
    pub const ALL: [ProcessorKind; 5] = [
        ProcessorKind::Raw,
        ProcessorKind::Face,
        ProcessorKind::Pose,
        ProcessorKind::Tongue,
        ProcessorKind::Wink,
    ];

    fn registration(self) -> &'static Registration {
        // Table order matches declaration order
        &REGISTRATIONS[self as usize]
    }

    pub fn from_key(key: &str) -> Result<Self, RegistryError> {
        REGISTRATIONS
            .iter()
            .find(|r| r.key.eq_ignore_ascii_case(key.trim()))
            .map(|r| r.kind)
            .ok_or_else(|| RegistryError::UnknownKey(key.to_string()))
    }

    pub fn key(self) -> &'static str {
        self.registration().key
    }

    pub fn name(self) -> &'static str {
        self.registration().name
    }

    pub fn save_directory_name(self) -> &'static str {
        self.registration().save_directory
    }

    /// Fresh, not yet set up stage of this kind.
    pub fn build(self) -> Box<dyn Processor> {
        (self.registration().build)()
    }
}

impl std::fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_kinds() {
        for kind in ProcessorKind::ALL {
            assert_eq!(REGISTRATIONS[kind as usize].kind, kind);
            assert_eq!(kind.build().kind(), kind);
            assert_eq!(ProcessorKind::from_key(kind.key()).unwrap(), kind);
        }
    }

    #[test]
    fn keys_are_case_insensitive() {
        assert_eq!(
            ProcessorKind::from_key(" Tongue ").unwrap(),
            ProcessorKind::Tongue
        );
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert_eq!(
            ProcessorKind::from_key("hand"),
            Err(RegistryError::UnknownKey("hand".into()))
        );
    }

    #[test]
    fn built_stages_know_their_directories() {
        let stage = ProcessorKind::Tongue.build();
        assert_eq!(stage.name(), "Tongue");
        assert_eq!(stage.save_directory_name(), "TongueDetector");
    }
}
