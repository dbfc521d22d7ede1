//! The annotation session: an explicit state machine over an image list.
//!
//! A session walks the source images in order. For the current image the
//! caller records boxes (and may undo them), then either advances, which
//! persists the resized image and its label file, or discards the image,
//! which persists nothing. Advancing or discarding past the last image
//! finalizes the session exactly once:
//!
//! - in dataset mode the staged files are split and moved into the
//!   destination, and the staging area is removed on every path;
//! - otherwise the files were already written next to the source folder.
//!
//! ```text
//! Active --advance/discard--> Active        (more images left)
//! Active --advance/discard--> Finalizing --> Closed
//! ```

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::YololabelError;
use crate::image_io::{ImageScaler, Resolution};
use crate::label::{render_label_lines, to_yolo_record, BoundingBox, LabelTaxonomy, YoloRecord};
use crate::manifest::write_manifest;
use crate::materialize::DatasetMaterializer;
use crate::split::{
    DatasetSplitter, Infeasible, SplitOptions, SplitOutcome, SplitPercentages, SplitReport,
    DEFAULT_SEED,
};
use crate::staging::{label_file_name, StagingArea};

/// Name of the staging directory created inside the image folder.
pub const DEFAULT_STAGING_DIR: &str = "tmp";
/// Permanent image folder in non-dataset mode, next to the source folder.
pub const SCALED_IMAGES_DIR: &str = "scaled_images";
/// Permanent label folder in non-dataset mode, next to the source folder.
pub const LABELS_DIR: &str = "labels";

/// Settings fixed for the lifetime of a session.
#[derive(Clone, Debug, Default)]
pub struct SessionConfig {
    /// Every image is resized to this before annotation and export.
    pub resolution: Resolution,
    /// `Some` turns on dataset mode.
    pub dataset: Option<DatasetConfig>,
}

/// Where and how a stratified dataset is produced.
#[derive(Clone, Debug)]
pub struct DatasetConfig {
    pub destination_root: PathBuf,
    pub percentages: SplitPercentages,
    pub seed: u64,
    /// Defaults to `<image folder>/tmp`.
    pub staging_root: Option<PathBuf>,
    pub write_manifest: bool,
    pub strict_second_stage: bool,
}

impl DatasetConfig {
    pub fn new(destination_root: impl Into<PathBuf>, percentages: SplitPercentages) -> Self {
        Self {
            destination_root: destination_root.into(),
            percentages,
            seed: DEFAULT_SEED,
            staging_root: None,
            write_manifest: true,
            strict_second_stage: false,
        }
    }

    fn split_options(&self) -> SplitOptions {
        SplitOptions {
            seed: self.seed,
            strict_second_stage: self.strict_second_stage,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Finalizing,
    Closed,
}

/// What `advance` and `discard_current` lead to.
#[derive(Clone, Debug)]
pub enum Advance {
    /// The session moved on to this image.
    Next(PathBuf),
    /// The last image was handled and the session is closed.
    Finished(SessionSummary),
}

/// How the annotated files ended up on disk.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetOutcome {
    /// Non-dataset mode: files were written directly to permanent folders.
    Saved {
        images_dir: PathBuf,
        labels_dir: PathBuf,
    },
    /// Stratified split moved into `{train,val,test}/{images,labels}`.
    Split {
        destination: PathBuf,
        report: SplitReport,
        manifest: Option<PathBuf>,
    },
    /// Stratification was impossible; files were moved unsplit.
    Fallback {
        destination: PathBuf,
        reason: Infeasible,
        files: usize,
    },
}

/// Returned once, when the session finalizes.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub annotated: usize,
    pub discarded: usize,
    pub boxes: usize,
    pub outcome: DatasetOutcome,
}

enum Sink {
    Staging {
        area: StagingArea,
        config: DatasetConfig,
    },
    Permanent,
}

/// One pass of annotation over an ordered list of images.
pub struct AnnotationSession {
    image_paths: Vec<PathBuf>,
    current_index: usize,
    active_boxes: Vec<BoundingBox>,
    taxonomy: LabelTaxonomy,
    scaler: ImageScaler,
    sink: Option<Sink>,
    state: SessionState,
    annotated: usize,
    discarded: usize,
    boxes_written: usize,
    saved_dirs: Option<(PathBuf, PathBuf)>,
}

impl AnnotationSession {
    /// Starts a session positioned on the first image.
    ///
    /// In dataset mode the staging root is bound here but only created when
    /// the first image is stored. A staging root that contains the
    /// destination, or lies inside it, is rejected before anything is
    /// touched on disk.
    pub fn new(
        image_paths: Vec<PathBuf>,
        taxonomy: LabelTaxonomy,
        config: SessionConfig,
    ) -> Result<Self, YololabelError> {
        let Some(first) = image_paths.first() else {
            return Err(YololabelError::NoImages {
                path: PathBuf::new(),
            });
        };

        let sink = match config.dataset {
            Some(dataset) => {
                let root = dataset
                    .staging_root
                    .clone()
                    .unwrap_or_else(|| image_folder(first).join(DEFAULT_STAGING_DIR));
                check_staging_outside_destination(&root, &dataset.destination_root)?;
                Sink::Staging {
                    area: StagingArea::open(root)?,
                    config: dataset,
                }
            }
            None => Sink::Permanent,
        };

        log::info!(
            "annotation session over {} image(s) at {} with {} class(es)",
            image_paths.len(),
            config.resolution,
            taxonomy.len()
        );

        Ok(Self {
            image_paths,
            current_index: 0,
            active_boxes: Vec::new(),
            taxonomy,
            scaler: ImageScaler::new(config.resolution),
            sink: Some(sink),
            state: SessionState::Active,
            annotated: 0,
            discarded: 0,
            boxes_written: 0,
            saved_dirs: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn taxonomy(&self) -> &LabelTaxonomy {
        &self.taxonomy
    }

    pub fn resolution(&self) -> Resolution {
        self.scaler.resolution()
    }

    pub fn image_paths(&self) -> &[PathBuf] {
        &self.image_paths
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn is_dataset_mode(&self) -> bool {
        matches!(self.sink, Some(Sink::Staging { .. }))
    }

    pub fn current_image(&self) -> Result<&Path, YololabelError> {
        if self.state != SessionState::Active {
            return Err(YololabelError::OutOfRange {
                index: self.current_index,
                len: self.image_paths.len(),
            });
        }
        self.image_paths
            .get(self.current_index)
            .map(PathBuf::as_path)
            .ok_or(YololabelError::OutOfRange {
                index: self.current_index,
                len: self.image_paths.len(),
            })
    }

    /// Adds a box to the current image.
    ///
    /// The box is checked against the session resolution, which is the
    /// size of the image the annotator sees.
    pub fn record_box(&mut self, bbox: BoundingBox) -> Result<(), YololabelError> {
        self.ensure_active()?;

        let resolution = self.scaler.resolution();
        if let Err(err) = bbox.validate(resolution.width, resolution.height) {
            log::warn!("refused box on {}: {}", self.describe_current(), err);
            return Err(err);
        }
        if !self.taxonomy.contains(bbox.class_id) {
            log::warn!(
                "refused box on {}: unknown class {}",
                self.describe_current(),
                bbox.class_id
            );
            return Err(YololabelError::UnknownClass {
                class_id: bbox.class_id,
            });
        }

        self.active_boxes.push(bbox);
        Ok(())
    }

    /// Removes the most recent box, if any.
    pub fn undo(&mut self) -> Option<BoundingBox> {
        self.active_boxes.pop()
    }

    pub fn active_boxes(&self) -> &[BoundingBox] {
        &self.active_boxes
    }

    /// Converts the active boxes for an image of `width` x `height` pixels.
    pub fn export_records(&self, width: u32, height: u32) -> Result<Vec<YoloRecord>, YololabelError> {
        self.active_boxes
            .iter()
            .map(|bbox| to_yolo_record(bbox, width, height))
            .collect()
    }

    /// Persists the current image with its boxes and moves on.
    ///
    /// A failure to read or write the current image is returned without
    /// changing position, so the caller can retry or discard it.
    pub fn advance(&mut self) -> Result<Advance, YololabelError> {
        self.ensure_active()?;
        let image = self.image_paths[self.current_index].clone();
        self.persist(&image)?;
        self.annotated += 1;
        self.step()
    }

    /// Skips the current image. Nothing is written for it.
    pub fn discard_current(&mut self) -> Result<Advance, YololabelError> {
        self.ensure_active()?;
        log::info!("discarded {}", self.describe_current());
        self.discarded += 1;
        self.step()
    }

    fn ensure_active(&self) -> Result<(), YololabelError> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Finalizing | SessionState::Closed => Err(YololabelError::SessionClosed),
        }
    }

    fn describe_current(&self) -> String {
        self.image_paths
            .get(self.current_index)
            .map(|path| path.display().to_string())
            .unwrap_or_default()
    }

    fn persist(&mut self, image: &Path) -> Result<(), YololabelError> {
        let scaled = self.scaler.scale(image)?;
        let records = match self.export_records(scaled.width, scaled.height) {
            Ok(records) => records,
            Err(err @ YololabelError::InvalidImage { .. }) => {
                log::warn!("{}: {}; writing an empty label file", image.display(), err);
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        match self.sink.as_mut() {
            Some(Sink::Staging { area, .. }) => {
                area.store_image(&scaled.bytes, &scaled.file_name)?;
                area.store_labels(&records, &scaled.file_name)?;
            }
            Some(Sink::Permanent) => {
                let parent = source_parent(image);
                let images_dir = parent.join(SCALED_IMAGES_DIR);
                let labels_dir = parent.join(LABELS_DIR);
                std::fs::create_dir_all(&images_dir)?;
                std::fs::create_dir_all(&labels_dir)?;

                let image_path = images_dir.join(&scaled.file_name);
                std::fs::write(&image_path, &scaled.bytes)?;
                let label_path = labels_dir.join(label_file_name(&scaled.file_name));
                std::fs::write(&label_path, render_label_lines(&records))?;
                log::debug!(
                    "saved {} and {} record(s) to {}",
                    image_path.display(),
                    records.len(),
                    label_path.display()
                );
                if self.saved_dirs.is_none() {
                    self.saved_dirs = Some((images_dir, labels_dir));
                }
            }
            None => return Err(YololabelError::SessionClosed),
        }

        self.boxes_written += records.len();
        Ok(())
    }

    fn step(&mut self) -> Result<Advance, YololabelError> {
        self.active_boxes.clear();

        if self.current_index + 1 < self.image_paths.len() {
            self.current_index += 1;
            return Ok(Advance::Next(self.image_paths[self.current_index].clone()));
        }

        self.state = SessionState::Finalizing;
        let result = self.finalize();
        self.state = SessionState::Closed;
        result.map(Advance::Finished)
    }

    fn finalize(&mut self) -> Result<SessionSummary, YololabelError> {
        let outcome = match self.sink.take() {
            Some(Sink::Staging { area, config }) => {
                let result = finalize_dataset(&area, &config, &self.taxonomy);
                let destroyed = area.destroy();
                let outcome = result?;
                destroyed?;
                outcome
            }
            Some(Sink::Permanent) => {
                let (images_dir, labels_dir) = self.saved_dirs.clone().unwrap_or_else(|| {
                    let parent = source_parent(&self.image_paths[0]);
                    (parent.join(SCALED_IMAGES_DIR), parent.join(LABELS_DIR))
                });
                DatasetOutcome::Saved {
                    images_dir,
                    labels_dir,
                }
            }
            None => return Err(YololabelError::SessionClosed),
        };

        log::info!(
            "session finished: {} annotated, {} discarded, {} box(es)",
            self.annotated,
            self.discarded,
            self.boxes_written
        );

        Ok(SessionSummary {
            annotated: self.annotated,
            discarded: self.discarded,
            boxes: self.boxes_written,
            outcome,
        })
    }
}

impl std::fmt::Debug for AnnotationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationSession")
            .field("images", &self.image_paths.len())
            .field("current_index", &self.current_index)
            .field("active_boxes", &self.active_boxes.len())
            .field("state", &self.state)
            .finish()
    }
}

/// Splits what is staged and moves it into the destination.
fn finalize_dataset(
    area: &StagingArea,
    config: &DatasetConfig,
    taxonomy: &LabelTaxonomy,
) -> Result<DatasetOutcome, YololabelError> {
    let images = area.list_images()?;
    let labels = area.list_labels()?;
    let splitter = DatasetSplitter::new(config.percentages, config.split_options());
    let materializer = DatasetMaterializer::new(&config.destination_root);

    match splitter.split(&images, &labels)? {
        SplitOutcome::Split(partition) => {
            materializer.materialize(&partition)?;
            let manifest = if config.write_manifest {
                Some(write_manifest(&config.destination_root, taxonomy)?)
            } else {
                None
            };
            Ok(DatasetOutcome::Split {
                destination: config.destination_root.clone(),
                report: partition.report,
                manifest,
            })
        }
        SplitOutcome::Infeasible { reason, pairs } => {
            let images: Vec<PathBuf> = pairs.iter().map(|pair| pair.image.clone()).collect();
            let labels: Vec<PathBuf> = pairs.iter().map(|pair| pair.label.clone()).collect();
            materializer.materialize_fallback(&images, &labels)?;
            Ok(DatasetOutcome::Fallback {
                destination: config.destination_root.clone(),
                reason,
                files: pairs.len(),
            })
        }
    }
}

/// Staging is destroyed after the move, so it must not share a subtree
/// with the dataset.
fn check_staging_outside_destination(
    staging: &Path,
    destination: &Path,
) -> Result<(), YololabelError> {
    let staging_real = resolve_path(staging);
    let destination_real = resolve_path(destination);
    if staging_real.starts_with(&destination_real) || destination_real.starts_with(&staging_real) {
        return Err(YololabelError::StagingOverlap {
            staging: staging.to_path_buf(),
            destination: destination.to_path_buf(),
        });
    }
    Ok(())
}

/// Absolute form of `path` with `.`/`..` folded and the longest existing
/// prefix canonicalized, so symlinked ancestors compare equal.
fn resolve_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut lexical = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                lexical.pop();
            }
            other => lexical.push(other.as_os_str()),
        }
    }

    let mut existing = lexical.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(real) = fs::canonicalize(existing) {
            let mut resolved = real;
            resolved.extend(missing.iter().rev());
            return resolved;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => return lexical,
        }
    }
}

/// The folder holding `image`.
fn image_folder(image: &Path) -> PathBuf {
    image.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// The parent of the folder holding `image`.
fn source_parent(image: &Path) -> PathBuf {
    image
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_default()
}
