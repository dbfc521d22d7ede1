//! Source image discovery and resize-to-resolution.
//!
//! The session never draws anything; it only needs each image rescaled to
//! the annotation resolution and encoded back to bytes so the staging area
//! (or the permanent `scaled_images/` folder) can store it.

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use walkdir::WalkDir;

use crate::error::YololabelError;

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "png", "jpeg", "bmp", "webp"];

/// Output resolution every annotated image is resized to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Result<Self, YololabelError> {
        if width == 0 || height == 0 {
            return Err(YololabelError::InvalidResolution(format!(
                "{}x{}",
                width, height
            )));
        }
        Ok(Self { width, height })
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = YololabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || YololabelError::InvalidResolution(s.to_string());
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(invalid)?;
        let width = w.trim().parse::<u32>().map_err(|_| invalid())?;
        let height = h.trim().parse::<u32>().map_err(|_| invalid())?;
        Resolution::new(width, height).map_err(|_| invalid())
    }
}

/// An image resized to the session resolution, encoded in its source format.
#[derive(Clone, Debug)]
pub struct ScaledImage {
    /// Base file name of the source image (extension preserved).
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Resizes source images to a fixed resolution.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageScaler {
    resolution: Resolution,
}

impl ImageScaler {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Decodes `path`, resizes it to exactly the configured resolution and
    /// re-encodes it in the format implied by its extension.
    pub fn scale(&self, path: &Path) -> Result<ScaledImage, YololabelError> {
        let image_err = |source| YololabelError::Image {
            path: path.to_path_buf(),
            source,
        };

        let file_name = file_name_of(path)?;
        let format = ImageFormat::from_path(path).map_err(image_err)?;
        let decoded = image::open(path).map_err(image_err)?;
        let resized = decoded.resize_exact(
            self.resolution.width,
            self.resolution.height,
            FilterType::Triangle,
        );

        // JPEG has no alpha channel.
        let resized = if format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(resized.to_rgb8())
        } else {
            resized
        };

        let mut bytes = Vec::new();
        resized
            .write_to(&mut Cursor::new(&mut bytes), format)
            .map_err(image_err)?;

        Ok(ScaledImage {
            file_name,
            width: resized.width(),
            height: resized.height(),
            bytes,
        })
    }
}

/// Lists annotatable images directly inside `dir`, sorted by file name.
pub fn list_source_images(dir: &Path) -> Result<Vec<PathBuf>, YololabelError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = entry.map_err(|source| {
            YololabelError::Io(
                source
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory traversal failed")),
            )
        })?;

        if entry.file_type().is_file() && has_extension(entry.path(), &IMAGE_EXTENSIONS) {
            files.push(entry.path().to_path_buf());
        }
    }

    if files.is_empty() {
        return Err(YololabelError::NoImages {
            path: dir.to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

pub(crate) fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    allowed
        .iter()
        .any(|allowed_ext| ext.eq_ignore_ascii_case(allowed_ext))
}

pub(crate) fn file_name_of(path: &Path) -> Result<String, YololabelError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            YololabelError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("'{}' has no file name", path.display()),
            ))
        })
}
