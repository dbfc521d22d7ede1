//! Yololabel: annotate images with bounding boxes and build YOLO datasets.
//!
//! An [`session::AnnotationSession`] walks a folder of images, turns the
//! pixel boxes drawn on each resized image into normalized YOLO records and
//! persists them. In dataset mode the results are buffered in a staging
//! area and, once the last image is handled, split into stratified
//! train/val/test buckets and moved into place. Label taxonomies that make
//! stratification impossible fall back to a flat, unsplit dataset.
//!
//! # Modules
//!
//! - [`label`]: class ids, pixel boxes, YOLO records and the label taxonomy
//! - [`image_io`]: source image discovery and resizing
//! - [`session`]: the annotation state machine
//! - [`staging`]: the session-scoped temporary buffer
//! - [`split`]: stratified train/val/test planning
//! - [`materialize`]: moving staged files into the dataset layout
//! - [`manifest`]: the `dataset.yaml` written next to a split dataset
//! - [`error`]: error types for yololabel operations

pub mod error;
pub mod image_io;
pub mod label;
pub mod manifest;
pub mod materialize;
pub mod session;
pub mod split;
pub mod staging;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

pub use error::YololabelError;

use image_io::{file_name_of, list_source_images, Resolution};
use label::{read_taxonomy_json, BoundingBox, ClassId};
use materialize::DatasetMaterializer;
use session::{Advance, AnnotationSession, DatasetConfig, DatasetOutcome, SessionConfig};
use split::{DatasetSplitter, SplitOptions, SplitOutcome, SplitPercentages, SplitReport};

/// The yololabel CLI application.
#[derive(Parser)]
#[command(name = "yololabel")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Annotate a folder of images from a box file and save the labels.
    Annotate(AnnotateArgs),
    /// Split a flat images/ + labels/ folder into train/val/test.
    Split(SplitArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Arguments for the annotate subcommand.
#[derive(clap::Args)]
struct AnnotateArgs {
    /// Folder containing the source images.
    #[arg(long)]
    images: PathBuf,

    /// Label taxonomy JSON, e.g. {"0": "Cat", "1": "Dog"}.
    #[arg(long)]
    labels: PathBuf,

    /// JSON object mapping image file names to boxes, or to null to discard.
    #[arg(long)]
    boxes: Option<PathBuf>,

    /// Size every image is resized to before annotation.
    #[arg(long, default_value = "800x600", value_parser = parse_resolution)]
    resolution: Resolution,

    /// Build a stratified dataset under this folder instead of saving next
    /// to the image folder.
    #[arg(long)]
    dataset: Option<PathBuf>,

    #[command(flatten)]
    split: SplitFlags,

    /// Staging folder (defaults to <images>/tmp).
    #[arg(long, requires = "dataset")]
    staging: Option<PathBuf>,

    /// Do not write dataset.yaml after a successful split.
    #[arg(long, requires = "dataset")]
    no_manifest: bool,

    /// Output format for the summary.
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,
}

/// Arguments for the split subcommand.
#[derive(clap::Args)]
struct SplitArgs {
    /// Folder with images/ and labels/ subfolders.
    #[arg(long)]
    input: PathBuf,

    /// Destination root for train/, val/ and test/.
    #[arg(long)]
    dest: PathBuf,

    /// Label taxonomy JSON; when given, dataset.yaml is written.
    #[arg(long)]
    labels: Option<PathBuf>,

    #[command(flatten)]
    split: SplitFlags,

    /// Output format for the report.
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[derive(clap::Args)]
struct SplitFlags {
    /// Train, val and test percentages, summing to 100.
    #[arg(long = "split", default_value = "70,15,15", value_parser = parse_split)]
    percentages: SplitPercentages,

    /// Seed for the split shuffle.
    #[arg(long, env = "YOLOLABEL_SEED", default_value_t = split::DEFAULT_SEED)]
    seed: u64,

    /// Treat a class left in a single file after the test split as
    /// unsplittable instead of keeping that file in train.
    #[arg(long)]
    strict_stratify: bool,
}

impl SplitFlags {
    fn options(&self) -> SplitOptions {
        SplitOptions {
            seed: self.seed,
            strict_second_stage: self.strict_stratify,
        }
    }
}

/// One box of the `--boxes` file, in resized-image pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoxSpec {
    pub class_id: u32,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoxSpec {
    pub fn to_bounding_box(self) -> BoundingBox {
        BoundingBox::from_corners(self.x1, self.y1, self.x2, self.y2, ClassId::new(self.class_id))
    }
}

/// Per image file name: `Some(boxes)` to annotate, `None` to discard.
pub type BoxScript = BTreeMap<String, Option<Vec<BoxSpec>>>;

/// Reads a `--boxes` file.
pub fn read_box_script(path: &Path) -> Result<BoxScript, YololabelError> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| YololabelError::BoxScriptParse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_resolution(value: &str) -> Result<Resolution, String> {
    value.parse::<Resolution>().map_err(|err| err.to_string())
}

/// Parses `train,val,test`, e.g. `70,15,15`.
fn parse_split(value: &str) -> Result<SplitPercentages, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [train, val, test] = parts.as_slice() else {
        return Err(format!(
            "expected three comma-separated percentages, got '{}'",
            value
        ));
    };

    let parse = |part: &str| {
        part.parse::<u32>()
            .map_err(|_| format!("'{}' is not a whole percentage", part))
    };
    SplitPercentages::new(parse(train)?, parse(val)?, parse(test)?).map_err(|err| err.to_string())
}

/// Run the yololabel CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), YololabelError> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Annotate(args)) => run_annotate(args),
        Some(Commands::Split(args)) => run_split(args),
        None => {
            println!("yololabel {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Annotate images and build stratified YOLO datasets.");
            println!();
            println!("Run 'yololabel --help' for usage information.");
            Ok(())
        }
    }
}

/// Execute the annotate subcommand.
fn run_annotate(args: AnnotateArgs) -> Result<(), YololabelError> {
    let taxonomy = read_taxonomy_json(&args.labels)?;
    let images = list_source_images(&args.images)?;
    let mut script = match &args.boxes {
        Some(path) => read_box_script(path)?,
        None => BoxScript::new(),
    };

    let dataset = args.dataset.map(|destination_root| DatasetConfig {
        destination_root,
        percentages: args.split.percentages,
        seed: args.split.seed,
        staging_root: args.staging,
        write_manifest: !args.no_manifest,
        strict_second_stage: args.split.strict_stratify,
    });
    let config = SessionConfig {
        resolution: args.resolution,
        dataset,
    };

    let mut session = AnnotationSession::new(images, taxonomy, config)?;
    let summary = loop {
        let name = file_name_of(session.current_image()?)?;
        let step = match script.remove(&name) {
            Some(None) => session.discard_current()?,
            Some(Some(boxes)) => {
                for spec in boxes {
                    match session.record_box(spec.to_bounding_box()) {
                        Ok(()) => {}
                        // Already logged; the image keeps its other boxes.
                        Err(YololabelError::InvalidGeometry { .. })
                        | Err(YololabelError::UnknownClass { .. }) => {}
                        Err(err) => return Err(err),
                    }
                }
                session.advance()?
            }
            None => session.advance()?,
        };

        if let Advance::Finished(summary) = step {
            break summary;
        }
    };

    for name in script.keys() {
        log::warn!("box file entry '{}' matches no image", name);
    }

    match args.output {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => {
            println!(
                "Annotated {} image(s) ({} discarded, {} box(es))",
                summary.annotated, summary.discarded, summary.boxes
            );
            match &summary.outcome {
                DatasetOutcome::Saved {
                    images_dir,
                    labels_dir,
                } => {
                    println!("Images: {}", images_dir.display());
                    println!("Labels: {}", labels_dir.display());
                }
                DatasetOutcome::Split {
                    destination,
                    report,
                    manifest,
                } => {
                    println!("Dataset: {}", destination.display());
                    print!("{}", report);
                    if let Some(manifest) = manifest {
                        println!("Manifest: {}", manifest.display());
                    }
                }
                DatasetOutcome::Fallback {
                    destination,
                    files,
                    ..
                } => {
                    println!("Dataset: {} ({} unsplit file(s))", destination.display(), files);
                }
            }
        }
    }

    if let DatasetOutcome::Fallback { reason, .. } = &summary.outcome {
        eprintln!("warning: {}; the dataset was saved unsplit and needs a manual split", reason);
    }

    Ok(())
}

/// Execute the split subcommand.
fn run_split(args: SplitArgs) -> Result<(), YololabelError> {
    let taxonomy = args
        .labels
        .as_deref()
        .map(read_taxonomy_json)
        .transpose()?;
    let (images, labels) = split::collect_flat_dataset(&args.input)?;

    let splitter = DatasetSplitter::new(args.split.percentages, args.split.options());
    let partition = match splitter.split(&images, &labels)? {
        SplitOutcome::Split(partition) => partition,
        SplitOutcome::Infeasible { reason, .. } => {
            return Err(YololabelError::SplitInfeasible(reason));
        }
    };

    DatasetMaterializer::new(&args.dest).materialize(&partition)?;
    let manifest = match &taxonomy {
        Some(taxonomy) => Some(manifest::write_manifest(&args.dest, taxonomy)?),
        None => None,
    };

    match args.output {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct SplitSummary<'a> {
                destination: &'a Path,
                report: &'a SplitReport,
                manifest: Option<&'a Path>,
            }
            print_json(&SplitSummary {
                destination: &args.dest,
                report: &partition.report,
                manifest: manifest.as_deref(),
            })?;
        }
        OutputFormat::Text => {
            println!("Dataset: {}", args.dest.display());
            print!("{}", partition.report);
            if let Some(manifest) = manifest {
                println!("Manifest: {}", manifest.display());
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), YololabelError> {
    let json = serde_json::to_string_pretty(value).map_err(YololabelError::ReportSerialize)?;
    println!("{}", json);
    Ok(())
}
