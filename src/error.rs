use std::path::PathBuf;
use thiserror::Error;

use crate::label::ClassId;
use crate::split::Infeasible;

/// The main error type for yololabel operations.
#[derive(Debug, Error)]
pub enum YololabelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid bounding box: {message}")]
    InvalidGeometry { message: String },

    #[error("Class id {class_id} is not part of the label taxonomy")]
    UnknownClass { class_id: ClassId },

    #[error("Invalid image dimensions {width}x{height} (must be positive)")]
    InvalidImage { width: u32, height: u32 },

    #[error("Staging area failure at {path}: {source}")]
    StagingIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Split percentages {train}/{val}/{test} must be in 0..=100 and sum to 100")]
    PercentageMismatch { train: u32, val: u32, test: u32 },

    #[error("Staged file {path} has no matching {missing} file")]
    UnpairedFile {
        path: PathBuf,
        missing: &'static str,
    },

    #[error("Staged files {first} and {second} share the stem '{stem}'")]
    DuplicateStem {
        stem: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Failed to parse label file {path} at line {line}: {message}")]
    LabelParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to overwrite existing dataset file {path}")]
    DestinationExists { path: PathBuf },

    #[error("Staging root {staging} and dataset destination {destination} overlap")]
    StagingOverlap {
        staging: PathBuf,
        destination: PathBuf,
    },

    #[error("Annotation session is closed")]
    SessionClosed,

    #[error("Image index {index} is out of range for {len} image(s)")]
    OutOfRange { index: usize, len: usize },

    #[error("No images found in {path}")]
    NoImages { path: PathBuf },

    #[error("Failed to process image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to parse label taxonomy from {path}: {source}")]
    TaxonomyParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid label taxonomy: {message}")]
    TaxonomyInvalid { message: String },

    #[error("Failed to parse box file {path}: {source}")]
    BoxScriptParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write dataset manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Stratified split is impossible: {0}")]
    SplitInfeasible(Infeasible),

    #[error("Failed to serialize report: {0}")]
    ReportSerialize(#[source] serde_json::Error),

    #[error("Invalid resolution '{0}' (expected WIDTHxHEIGHT with positive sides)")]
    InvalidResolution(String),
}
