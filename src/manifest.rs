//! `dataset.yaml` manifest for a stratified dataset.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::YololabelError;
use crate::label::LabelTaxonomy;

pub const MANIFEST_FILE_NAME: &str = "dataset.yaml";

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    path: String,
    train: &'static str,
    val: &'static str,
    test: &'static str,
    nc: usize,
    names: BTreeMap<u32, &'a str>,
}

/// Renders the manifest for a dataset rooted at `root`.
pub fn render_manifest(root: &Path, taxonomy: &LabelTaxonomy) -> Result<String, serde_yaml::Error> {
    let manifest = Manifest {
        path: root.to_string_lossy().replace('\\', "/"),
        train: "train/images",
        val: "val/images",
        test: "test/images",
        nc: taxonomy.len(),
        names: taxonomy
            .iter()
            .map(|(class_id, name)| (class_id.as_u32(), name))
            .collect(),
    };
    serde_yaml::to_string(&manifest)
}

/// Writes `<root>/dataset.yaml` and returns its path.
pub fn write_manifest(root: &Path, taxonomy: &LabelTaxonomy) -> Result<PathBuf, YololabelError> {
    let path = root.join(MANIFEST_FILE_NAME);
    let yaml = render_manifest(root, taxonomy).map_err(|source| YololabelError::Manifest {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, yaml).map_err(YololabelError::Io)?;
    log::info!("wrote {}", path.display());
    Ok(path)
}
