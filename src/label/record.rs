//! Normalized YOLO records and the label-line text format.
//!
//! A label file holds one record per line:
//! `class_id x_center y_center width height`, all coordinates normalized to
//! the image size and written with six decimal digits.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use super::{BoundingBox, ClassId};
use crate::error::YololabelError;

/// Digits after the decimal point for normalized coordinates.
pub const LABEL_PRECISION: usize = 6;

/// A bounding box expressed as YOLO center/size fractions of the image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct YoloRecord {
    pub class_id: ClassId,
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl YoloRecord {
    /// Denormalizes the record back into `(x1, y1, x2, y2)` pixel corners.
    pub fn to_pixel_corners(&self, image_width: u32, image_height: u32) -> (f64, f64, f64, f64) {
        let w = f64::from(image_width);
        let h = f64::from(image_height);
        let half_w = self.width * w / 2.0;
        let half_h = self.height * h / 2.0;
        (
            self.x_center * w - half_w,
            self.y_center * h - half_h,
            self.x_center * w + half_w,
            self.y_center * h + half_h,
        )
    }
}

impl fmt::Display for YoloRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.prec$} {:.prec$} {:.prec$} {:.prec$}",
            self.class_id,
            self.x_center,
            self.y_center,
            self.width,
            self.height,
            prec = LABEL_PRECISION
        )
    }
}

/// Converts a pixel box into a YOLO record for an image of the given size.
///
/// The dimensions must be those of the displayed (resized) image.
pub fn to_yolo_record(
    bbox: &BoundingBox,
    image_width: u32,
    image_height: u32,
) -> Result<YoloRecord, YololabelError> {
    if image_width == 0 || image_height == 0 {
        return Err(YololabelError::InvalidImage {
            width: image_width,
            height: image_height,
        });
    }

    let w = f64::from(image_width);
    let h = f64::from(image_height);
    let x1 = f64::from(bbox.top_left.x);
    let y1 = f64::from(bbox.top_left.y);
    let x2 = f64::from(bbox.bottom_right.x);
    let y2 = f64::from(bbox.bottom_right.y);

    Ok(YoloRecord {
        class_id: bbox.class_id,
        x_center: (x1 + x2) / 2.0 / w,
        y_center: (y1 + y2) / 2.0 / h,
        width: (x2 - x1) / w,
        height: (y2 - y1) / h,
    })
}

/// Renders records as label file content, one newline-terminated line each.
pub fn render_label_lines(records: &[YoloRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&record.to_string());
        out.push('\n');
    }
    out
}

/// Parses one label line. Blank lines yield `Ok(None)`.
pub fn parse_label_line(
    line: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<Option<YoloRecord>, YololabelError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    // Take at most 6 tokens so pathological inputs do not allocate unbounded memory.
    let tokens: Vec<&str> = trimmed.split_whitespace().take(6).collect();

    if tokens.len() != 5 {
        return Err(YololabelError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: if tokens.len() < 5 {
                format!("expected 5 tokens, found {}", tokens.len())
            } else {
                "trailing fields after height; only bounding-box rows are supported".to_string()
            },
        });
    }

    let class_id = tokens[0]
        .parse::<u32>()
        .map_err(|_| YololabelError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!(
                "invalid class_id '{}'; expected non-negative integer",
                tokens[0]
            ),
        })?;

    Ok(Some(YoloRecord {
        class_id: ClassId::new(class_id),
        x_center: parse_f64_token(tokens[1], "x_center", file_path, line_num)?,
        y_center: parse_f64_token(tokens[2], "y_center", file_path, line_num)?,
        width: parse_f64_token(tokens[3], "width", file_path, line_num)?,
        height: parse_f64_token(tokens[4], "height", file_path, line_num)?,
    }))
}

/// Parses a whole label file body.
pub fn parse_label_file(content: &str, file_path: &Path) -> Result<Vec<YoloRecord>, YololabelError> {
    let mut records = Vec::new();
    for (line_idx, line) in content.lines().enumerate() {
        if let Some(record) = parse_label_line(line, file_path, line_idx + 1)? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Fuzz-only entrypoint for single-line parsing.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_label_line(input: &str) -> Result<(), YololabelError> {
    let _ = parse_label_line(input, Path::new("<fuzz>"), 1)?;
    Ok(())
}

fn parse_f64_token(
    raw: &str,
    field_name: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<f64, YololabelError> {
    raw.parse::<f64>()
        .map_err(|_| YololabelError::LabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!("invalid {field_name} '{raw}'; expected floating-point number"),
        })
}
