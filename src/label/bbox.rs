//! Pixel-space bounding boxes drawn over the displayed image.

use serde::{Deserialize, Serialize};

use super::ClassId;
use crate::error::YololabelError;

/// A pixel position on the displayed (already resized) image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    #[inline]
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle with the class it was labelled as.
///
/// Construction does not enforce `top_left < bottom_right`;
/// [`BoundingBox::validate`] reports malformed boxes so the session can
/// refuse them instead of panicking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top_left: PixelPoint,
    pub bottom_right: PixelPoint,
    pub class_id: ClassId,
}

impl BoundingBox {
    /// Creates a box from explicit corners.
    #[inline]
    pub fn new(top_left: PixelPoint, bottom_right: PixelPoint, class_id: impl Into<ClassId>) -> Self {
        Self {
            top_left,
            bottom_right,
            class_id: class_id.into(),
        }
    }

    /// Creates a box from `x1, y1, x2, y2` corner coordinates.
    #[inline]
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32, class_id: impl Into<ClassId>) -> Self {
        Self::new(PixelPoint::new(x1, y1), PixelPoint::new(x2, y2), class_id)
    }

    /// Creates a box from the two ends of a mouse drag, in any direction.
    pub fn from_drag(start: PixelPoint, end: PixelPoint, class_id: impl Into<ClassId>) -> Self {
        Self::from_corners(
            start.x.min(end.x),
            start.y.min(end.y),
            start.x.max(end.x),
            start.y.max(end.y),
            class_id,
        )
    }

    /// Width in pixels. Negative or zero for malformed boxes.
    #[inline]
    pub fn width(&self) -> i64 {
        i64::from(self.bottom_right.x) - i64::from(self.top_left.x)
    }

    /// Height in pixels. Negative or zero for malformed boxes.
    #[inline]
    pub fn height(&self) -> i64 {
        i64::from(self.bottom_right.y) - i64::from(self.top_left.y)
    }

    /// Returns true when the box has no positive area.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Returns true if the box lies inside a `width x height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.top_left.x >= 0
            && self.top_left.y >= 0
            && i64::from(self.bottom_right.x) <= i64::from(width)
            && i64::from(self.bottom_right.y) <= i64::from(height)
    }

    /// Checks the box can be recorded against an image of the given size.
    pub fn validate(&self, width: u32, height: u32) -> Result<(), YololabelError> {
        if self.is_degenerate() {
            return Err(YololabelError::InvalidGeometry {
                message: format!(
                    "box ({}, {})-({}, {}) has no area",
                    self.top_left.x, self.top_left.y, self.bottom_right.x, self.bottom_right.y
                ),
            });
        }

        if !self.fits_within(width, height) {
            return Err(YololabelError::InvalidGeometry {
                message: format!(
                    "box ({}, {})-({}, {}) lies outside the {}x{} image",
                    self.top_left.x,
                    self.top_left.y,
                    self.bottom_right.x,
                    self.bottom_right.y,
                    width,
                    height
                ),
            });
        }

        Ok(())
    }
}
