//! Relocation of staged files into the final dataset layout.
//!
//! Files are moved, never copied: staging is destroyed right after. Each
//! call is all-or-nothing. Existing files at a target are refused before
//! anything moves, and when a move fails, the moves already done in that
//! call are undone before the error is returned.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::YololabelError;
use crate::split::{Bucket, Partition};

/// Counts of relocated files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaterializeSummary {
    pub images: usize,
    pub labels: usize,
}

/// Moves staged files under a destination root.
#[derive(Clone, Debug)]
pub struct DatasetMaterializer {
    root: PathBuf,
}

impl DatasetMaterializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Moves every pair into `<root>/{train,val,test}/{images,labels}`.
    pub fn materialize(&self, partition: &Partition) -> Result<MaterializeSummary, YololabelError> {
        for bucket in Bucket::ALL {
            let bucket_root = self.root.join(bucket.as_str());
            create_dir(&bucket_root.join("images"))?;
            create_dir(&bucket_root.join("labels"))?;
        }

        let mut moves = Vec::with_capacity(partition.len() * 2);
        for (bucket, pair) in partition.iter() {
            let bucket_root = self.root.join(bucket.as_str());
            moves.push(planned_move(&pair.image, &bucket_root.join("images"))?);
            moves.push(planned_move(&pair.label, &bucket_root.join("labels"))?);
        }

        move_all(&moves)?;
        log::info!(
            "materialized {} train, {} val, {} test pair(s) under {}",
            partition.train.len(),
            partition.val.len(),
            partition.test.len(),
            self.root.display()
        );

        Ok(MaterializeSummary {
            images: partition.len(),
            labels: partition.len(),
        })
    }

    /// Moves everything into flat `<root>/images` and `<root>/labels`.
    ///
    /// Used when stratification is infeasible; the caller must tell the
    /// operator that the dataset still needs a manual split.
    pub fn materialize_fallback(
        &self,
        images: &[PathBuf],
        labels: &[PathBuf],
    ) -> Result<MaterializeSummary, YololabelError> {
        let images_dir = self.root.join("images");
        let labels_dir = self.root.join("labels");
        create_dir(&images_dir)?;
        create_dir(&labels_dir)?;

        let mut moves = Vec::with_capacity(images.len() + labels.len());
        for image in images {
            moves.push(planned_move(image, &images_dir)?);
        }
        for label in labels {
            moves.push(planned_move(label, &labels_dir)?);
        }

        move_all(&moves)?;
        log::warn!(
            "moved {} image(s) and {} label file(s) unsplit into {}; split them manually",
            images.len(),
            labels.len(),
            self.root.display()
        );

        Ok(MaterializeSummary {
            images: images.len(),
            labels: labels.len(),
        })
    }
}

fn create_dir(dir: &Path) -> Result<(), YololabelError> {
    fs::create_dir_all(dir).map_err(YololabelError::Io)
}

fn planned_move(from: &Path, to_dir: &Path) -> Result<(PathBuf, PathBuf), YololabelError> {
    let name = from.file_name().ok_or_else(|| YololabelError::Move {
        from: from.to_path_buf(),
        to: to_dir.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"),
    })?;
    let to = to_dir.join(name);
    if to.exists() {
        return Err(YololabelError::DestinationExists { path: to });
    }
    Ok((from.to_path_buf(), to))
}

fn move_all(moves: &[(PathBuf, PathBuf)]) -> Result<(), YololabelError> {
    for (done, (from, to)) in moves.iter().enumerate() {
        if let Err(source) = move_file(from, to) {
            for (undo_from, undo_to) in moves[..done].iter().rev() {
                if let Err(err) = move_file(undo_to, undo_from) {
                    log::error!(
                        "could not move {} back to {}: {}",
                        undo_to.display(),
                        undo_from.display(),
                        err
                    );
                }
            }
            return Err(YololabelError::Move {
                from: from.clone(),
                to: to.clone(),
                source,
            });
        }
    }
    Ok(())
}

/// Renames, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !from.is_file() {
                return Err(rename_err);
            }
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}
