//! Classification gate: classify a cropped sample and map the class to a
//! pass/fail signal for the shutter.

use image::{GrayImage, Luma, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use tracing::{debug, warn};

use super::{Classifier, SharedClassifier};
use crate::error::EngineError;

/// Only class 0 ("desired state") lets the shutter through.
const PASSING_CLASSES: &[usize] = &[0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassVerdict {
    Class(usize),
    /// No sample, no classifier, or the classifier failed.
    Unknown,
}

impl std::fmt::Display for ClassVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassVerdict::Class(c) => write!(f, "{c}"),
            ClassVerdict::Unknown => f.write_str("?"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    pub verdict: ClassVerdict,
    pub pass: bool,
}

impl GateOutcome {
    fn from_verdict(verdict: ClassVerdict) -> Self {
        let pass = matches!(verdict, ClassVerdict::Class(c) if PASSING_CLASSES.contains(&c));
        Self { verdict, pass }
    }
}

/// Wraps an optional classifier. A gate without one (not yet initialized)
/// answers `Unknown` instead of failing the stage.
#[derive(Clone, Default)]
pub struct ClassificationGate {
    classifier: Option<SharedClassifier>,
}

impl ClassificationGate {
    pub fn new(classifier: Option<SharedClassifier>) -> Self {
        Self { classifier }
    }

    pub fn is_ready(&self) -> bool {
        self.classifier.is_some()
    }

    /// `sample` is `None` when region extraction produced nothing.
    pub fn evaluate(&self, sample: Option<&RgbaImage>) -> GateOutcome {
        let (Some(classifier), Some(sample)) = (&self.classifier, sample) else {
            return GateOutcome::from_verdict(ClassVerdict::Unknown);
        };

        let result = classifier
            .lock()
            .map_err(|_| EngineError::Poisoned)
            .and_then(|mut c| c.classify(sample));

        let verdict = match result {
            Ok(class) => ClassVerdict::Class(class),
            Err(e) => {
                warn!("classifier failed: {e}");
                ClassVerdict::Unknown
            }
        };
        debug!(%verdict, "classification gate");
        GateOutcome::from_verdict(verdict)
    }
}

/// Model-free tongue classifier: the share of reddish/pink pixels in the
/// crop decides between class 0 (tongue out) and class 1.
#[derive(Debug, Clone)]
pub struct HueRatioClassifier {
    /// Fraction of matching pixels needed for class 0
    pub min_ratio: f32,
}

impl Default for HueRatioClassifier {
    fn default() -> Self {
        Self { min_ratio: 0.5 }
    }
}

impl HueRatioClassifier {
    fn mask(image: &RgbaImage) -> GrayImage {
        GrayImage::from_fn(image.width(), image.height(), |x, y| {
            let p = image.get_pixel(x, y).0;
            let (h, s, v) = hsv(p[0], p[1], p[2]);
            // Red wraps around 0 on the 0..180 hue circle
            let reddish = h <= 50.0 || h >= 140.0;
            Luma([if reddish && s >= 40.0 && v >= 50.0 { 255 } else { 0 }])
        })
    }
}

impl Classifier for HueRatioClassifier {
    fn classify(&mut self, image: &RgbaImage) -> Result<usize, EngineError> {
        let total = (image.width() as usize) * (image.height() as usize);
        if total == 0 {
            return Ok(1);
        }
        let mask = close(&open(&Self::mask(image), Norm::LInf, 1), Norm::LInf, 1);
        let matching = mask.pixels().filter(|p| p.0[0] > 0).count();
        let ratio = matching as f32 / total as f32;
        Ok(if ratio >= self.min_ratio { 0 } else { 1 })
    }
}

/// RGB -> HSV with hue in 0..180 and saturation/value in 0..255.
fn hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta)
    } else if max == g {
        60.0 * ((b - r) / delta) + 120.0
    } else {
        60.0 * ((r - g) / delta) + 240.0
    };
    let h = if h < 0.0 { h + 360.0 } else { h };
    (h / 2.0, s, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::fixtures::FixedClass;
    use crate::detect::shared_classifier;
    use image::Rgba;

    #[test]
    fn class_zero_passes() {
        let gate = ClassificationGate::new(Some(shared_classifier(FixedClass(0))));
        let sample = RgbaImage::new(4, 4);
        let outcome = gate.evaluate(Some(&sample));
        assert_eq!(outcome.verdict, ClassVerdict::Class(0));
        assert!(outcome.pass);
    }

    #[test]
    fn other_classes_fail() {
        let gate = ClassificationGate::new(Some(shared_classifier(FixedClass(2))));
        let sample = RgbaImage::new(4, 4);
        assert!(!gate.evaluate(Some(&sample)).pass);
    }

    #[test]
    fn missing_classifier_is_unknown_and_fails() {
        let gate = ClassificationGate::default();
        let sample = RgbaImage::new(4, 4);
        let outcome = gate.evaluate(Some(&sample));
        assert_eq!(outcome.verdict, ClassVerdict::Unknown);
        assert!(!outcome.pass);
    }

    #[test]
    fn missing_sample_is_unknown() {
        let gate = ClassificationGate::new(Some(shared_classifier(FixedClass(0))));
        assert_eq!(gate.evaluate(None).verdict, ClassVerdict::Unknown);
    }

    #[test]
    fn pink_crop_is_class_zero() {
        let mut clf = HueRatioClassifier::default();
        let pink = RgbaImage::from_pixel(16, 16, Rgba([220, 90, 120, 255]));
        assert_eq!(clf.classify(&pink).unwrap(), 0);
    }

    #[test]
    fn grey_crop_is_class_one() {
        let mut clf = HueRatioClassifier::default();
        let grey = RgbaImage::from_pixel(16, 16, Rgba([120, 120, 120, 255]));
        assert_eq!(clf.classify(&grey).unwrap(), 1);
    }

    #[test]
    fn hue_of_pure_colours() {
        assert_eq!(hsv(255, 0, 0).0, 0.0);
        assert_eq!(hsv(0, 255, 0).0, 60.0);
        assert_eq!(hsv(0, 0, 255).0, 120.0);
    }
}
