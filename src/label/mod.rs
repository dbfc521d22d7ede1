//! Label types: class ids, the taxonomy, pixel boxes and YOLO records.
//!
//! Boxes live in the pixel space of the displayed image; records are the
//! normalized form written to label files. [`to_yolo_record`] is the only
//! bridge between the two.
//!
//! # Example
//!
//! ```
//! use yololabel::label::{to_yolo_record, BoundingBox};
//!
//! let bbox = BoundingBox::from_corners(200, 150, 600, 450, 0);
//! let record = to_yolo_record(&bbox, 800, 600).unwrap();
//! assert_eq!(record.to_string(), "0 0.500000 0.500000 0.500000 0.500000");
//! ```

mod bbox;
mod ids;
mod record;
mod taxonomy;

pub use bbox::{BoundingBox, PixelPoint};
pub use ids::ClassId;
#[cfg(feature = "fuzzing")]
pub use record::fuzz_parse_label_line;
pub use record::{
    parse_label_file, parse_label_line, render_label_lines, to_yolo_record, YoloRecord,
    LABEL_PRECISION,
};
pub use taxonomy::{read_taxonomy_json, LabelTaxonomy, TaxonomyBuilder};
