//! Session-scoped staging area for dataset mode.
//!
//! Annotated images and their label files are buffered under
//! `<root>/images` and `<root>/labels` until the session finishes and the
//! split decides where each pair ends up. The staged content is destroyed
//! at finalize on every exit path.
//!
//! The root may be a folder the user already has (the default is
//! `<image folder>/tmp`). Only what this module wrote is ever removed: the
//! two subfolders and a `.yololabel-staging` marker, plus the root itself
//! when it did not exist before.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::YololabelError;
use crate::label::{render_label_lines, YoloRecord};

pub const LABEL_EXTENSION: &str = "txt";
/// Marker written into a staging root while it holds staged files.
pub const STAGING_MARKER: &str = ".yololabel-staging";

/// Temporary `images/` + `labels/` buffer owned by one session.
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
    /// The root did not exist before this area, so it may be removed.
    owns_root: bool,
    created: bool,
}

impl StagingArea {
    /// Binds a staging area to `root` without creating anything yet.
    ///
    /// Staged files left by an earlier run that never reached finalize
    /// (recognized by the marker) are removed so they cannot leak into this
    /// session's dataset. An existing root without the marker is left alone,
    /// but `images/` or `labels/` folders with content in it are refused.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, YololabelError> {
        let root = root.into();

        if root.join(STAGING_MARKER).is_file() {
            log::warn!(
                "removing stale staged files in {} left by an earlier run",
                root.display()
            );
            remove_staged(&root)?;
            remove_if_empty(&root)?;
        } else if root.exists() {
            if !root.is_dir() {
                return Err(staging_err(
                    &root,
                    io::Error::new(io::ErrorKind::AlreadyExists, "not a directory"),
                ));
            }
            for dir in [root.join("images"), root.join("labels")] {
                if has_entries(&dir)? {
                    return Err(staging_err(
                        &dir,
                        io::Error::new(
                            io::ErrorKind::AlreadyExists,
                            "folder already has content not staged by yololabel",
                        ),
                    ));
                }
            }
        }

        Ok(Self {
            owns_root: !root.exists(),
            root,
            created: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn labels_dir(&self) -> PathBuf {
        self.root.join("labels")
    }

    /// Ensures `images/`, `labels/` and the marker exist. Safe to call repeatedly.
    pub fn create(&mut self) -> Result<(), YololabelError> {
        for dir in [self.images_dir(), self.labels_dir()] {
            fs::create_dir_all(&dir).map_err(|source| staging_err(&dir, source))?;
        }
        if !self.created {
            let marker = self.root.join(STAGING_MARKER);
            fs::write(&marker, b"").map_err(|source| staging_err(&marker, source))?;
            log::info!("staging area ready at {}", self.root.display());
            self.created = true;
        }
        Ok(())
    }

    /// Writes an encoded image, replacing any earlier file of the same name.
    pub fn store_image(&mut self, bytes: &[u8], file_name: &str) -> Result<PathBuf, YololabelError> {
        self.create()?;
        let path = self.images_dir().join(file_name);
        fs::write(&path, bytes).map_err(|source| staging_err(&path, source))?;
        log::debug!("staged image {}", path.display());
        Ok(path)
    }

    /// Writes the label file for `image_file_name`, replacing earlier content.
    pub fn store_labels(
        &mut self,
        records: &[YoloRecord],
        image_file_name: &str,
    ) -> Result<PathBuf, YololabelError> {
        self.create()?;
        let path = self.labels_dir().join(label_file_name(image_file_name));
        fs::write(&path, render_label_lines(records))
            .map_err(|source| staging_err(&path, source))?;
        log::debug!("staged {} record(s) in {}", records.len(), path.display());
        Ok(path)
    }

    pub fn list_images(&self) -> Result<Vec<PathBuf>, YololabelError> {
        list_files(&self.images_dir())
    }

    pub fn list_labels(&self) -> Result<Vec<PathBuf>, YololabelError> {
        list_files(&self.labels_dir())
    }

    /// Recursively removes the staged folders and the marker, then the root
    /// if this area created it and nothing else was put there.
    ///
    /// Consumes the area, so a session can only tear it down once.
    pub fn destroy(self) -> Result<(), YololabelError> {
        remove_staged(&self.root)?;
        if self.owns_root {
            remove_if_empty(&self.root)?;
        }
        if self.created {
            log::info!("removed staging area {}", self.root.display());
        }
        Ok(())
    }
}

fn remove_staged(root: &Path) -> Result<(), YololabelError> {
    for dir in [root.join("images"), root.join("labels")] {
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|source| staging_err(&dir, source))?;
        }
    }
    let marker = root.join(STAGING_MARKER);
    if marker.exists() {
        fs::remove_file(&marker).map_err(|source| staging_err(&marker, source))?;
    }
    Ok(())
}

fn remove_if_empty(root: &Path) -> Result<(), YololabelError> {
    if !root.is_dir() || has_entries(root)? {
        return Ok(());
    }
    fs::remove_dir(root).map_err(|source| staging_err(root, source))
}

fn has_entries(dir: &Path) -> Result<bool, YololabelError> {
    if !dir.is_dir() {
        return Ok(false);
    }
    let mut entries = fs::read_dir(dir).map_err(|source| staging_err(dir, source))?;
    Ok(entries.next().is_some())
}

/// `photo.jpg` -> `photo.txt`.
pub fn label_file_name(image_file_name: &str) -> String {
    let stem = Path::new(image_file_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_file_name.to_string());
    format!("{}.{}", stem, LABEL_EXTENSION)
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, YololabelError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|source| {
            let io = source
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory traversal failed"));
            staging_err(dir, io)
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

fn staging_err(path: &Path, source: std::io::Error) -> YololabelError {
    YololabelError::StagingIo {
        path: path.to_path_buf(),
        source,
    }
}
