//! Full-resolution save path, run once per captured still.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use image::{Rgba, RgbaImage};
use tracing::{info, instrument, warn};

use super::chain::guarded;
use super::registry::{ActiveStage, Snapshot};
use crate::error::SaveError;
use crate::processors::ProcessorKind;

const PLACEHOLDER_SIDE: u32 = 128;
const PLACEHOLDER_GREY: Rgba<u8> = Rgba([128, 128, 128, 255]);

/// One enabled stage's result for a captured still.
///
/// `saved` is what gets written to storage. `review` is what the host shows in
/// its review list: the placeholder when the stage has dummy preview on,
/// otherwise the same image as `saved`.
#[derive(Debug, Clone)]
pub struct SavedOutput {
    pub kind: ProcessorKind,
    pub name: &'static str,
    pub directory: &'static str,
    pub saved: Arc<RgbaImage>,
    pub review: Arc<RgbaImage>,
}

#[derive(Debug, Clone)]
pub struct SavePath {
    placeholder: Arc<RgbaImage>,
}

impl Default for SavePath {
    fn default() -> Self {
        Self::new(generated_placeholder())
    }
}

impl SavePath {
    pub fn new(placeholder: RgbaImage) -> Self {
        Self {
            placeholder: Arc::new(placeholder),
        }
    }

    /// Use the image at `path` as placeholder, falling back to a grey tile.
    pub fn with_placeholder_file(path: Option<&Path>) -> Self {
        Self::new(load_placeholder(path))
    }

    pub fn placeholder(&self) -> &Arc<RgbaImage> {
        &self.placeholder
    }

    /// Run every stage of `stages` over `still`. A failing stage saves the
    /// unmodified still; this path never feeds back into stream status.
    #[instrument(skip_all, fields(stages = stages.len(), width = still.width(), height = still.height()))]
    pub fn run(&self, still: &RgbaImage, stages: &[ActiveStage]) -> Vec<SavedOutput> {
        stages
            .iter()
            .map(|stage| {
                let name = stage.processor.name();
                let start = Instant::now();
                let saved = match guarded(name, || stage.processor.process_for_saving(still)) {
                    Ok(image) => image,
                    Err(e) => {
                        warn!(stage = name, "save path failed, keeping the still: {e}");
                        still.clone()
                    }
                };
                info!(
                    stage = name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "still processed"
                );

                let saved = Arc::new(saved);
                let review = if stage.descriptor.dummy_preview {
                    self.placeholder.clone()
                } else {
                    saved.clone()
                };
                SavedOutput {
                    kind: stage.descriptor.kind,
                    name,
                    directory: stage.descriptor.save_directory_name,
                    saved,
                    review,
                }
            })
            .collect()
    }
}

/// Run the save path off the async runtime's worker threads.
pub async fn capture_still(
    save_path: Arc<SavePath>,
    still: RgbaImage,
    stages: Snapshot,
) -> Result<Vec<SavedOutput>, SaveError> {
    tokio::task::spawn_blocking(move || save_path.run(&still, &stages))
        .await
        .map_err(|e| SaveError::Join(e.to_string()))
}

/// Write each `saved` image to `<root>/<directory>/<base>_<name>.png`.
/// A blank `base` becomes `capture_<unix millis>`.
pub fn persist(
    outputs: &[SavedOutput],
    root: &Path,
    base: &str,
) -> Result<Vec<PathBuf>, SaveError> {
    let base = if base.trim().is_empty() {
        default_base_name()
    } else {
        base.trim().to_string()
    };

    let mut written = Vec::with_capacity(outputs.len());
    for output in outputs {
        let dir = root.join(output.directory);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{base}_{}.png", output.name));
        output
            .saved
            .save(&path)
            .map_err(|source| SaveError::Encode {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), "saved still");
        written.push(path);
    }
    Ok(written)
}

fn default_base_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("capture_{millis}")
}

pub fn load_placeholder(path: Option<&Path>) -> RgbaImage {
    let Some(path) = path else {
        return generated_placeholder();
    };
    match image::open(path) {
        Ok(image) => image.to_rgba8(),
        Err(e) => {
            warn!(path = %path.display(), "placeholder unreadable, using grey tile: {e}");
            generated_placeholder()
        }
    }
}

fn generated_placeholder() -> RgbaImage {
    RgbaImage::from_pixel(PLACEHOLDER_SIDE, PLACEHOLDER_SIDE, PLACEHOLDER_GREY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::{Processor, RawStage};

    #[test]
    fn missing_placeholder_file_falls_back_to_grey() {
        let dir = tempfile::tempdir().unwrap();
        let image = load_placeholder(Some(&dir.path().join("nope.png")));
        assert_eq!(image.dimensions(), (128, 128));
        assert_eq!(*image.get_pixel(5, 5), PLACEHOLDER_GREY);
    }

    #[test]
    fn placeholder_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ph.png");
        RgbaImage::from_pixel(4, 3, Rgba([1, 2, 3, 255]))
            .save(&path)
            .unwrap();
        let save = SavePath::with_placeholder_file(Some(&path));
        assert_eq!(save.placeholder().dimensions(), (4, 3));
    }

    #[test]
    fn persist_names_files_by_directory_and_stage() {
        let dir = tempfile::tempdir().unwrap();
        let stage: Arc<dyn Processor> = Arc::new(RawStage);
        let still = RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255]));
        let outputs = SavePath::default().run(&still, &[ActiveStage::new(stage)]);

        let paths = persist(&outputs, dir.path(), "shot").unwrap();
        assert_eq!(paths, vec![dir.path().join("Raw").join("shot_Raw.png")]);
        let back = image::open(&paths[0]).unwrap().to_rgba8();
        assert_eq!(back, still);

        let paths = persist(&outputs, dir.path(), "  ").unwrap();
        let name = paths[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("capture_") && name.ends_with("_Raw.png"));
    }
}
