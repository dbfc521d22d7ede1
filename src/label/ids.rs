//! Newtype class identifier.
//!
//! Taxonomy files key classes by stringified integers; everything past the
//! import boundary uses [`ClassId`] so the two key flavours can never mix.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The integer class id written as the first field of a YOLO label line.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub u32);

impl ClassId {
    /// Creates a new ClassId.
    #[inline]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value.
    #[inline]
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ClassId {
    fn from(id: u32) -> Self {
        ClassId::new(id)
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self.0)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_id_ordering() {
        assert!(ClassId(1) < ClassId(2));
        assert_eq!(ClassId::from(7), ClassId::new(7));
    }

    #[test]
    fn test_class_id_display_is_bare_integer() {
        assert_eq!(ClassId(12).to_string(), "12");
        assert_eq!(format!("{:?}", ClassId(12)), "ClassId(12)");
    }
}
