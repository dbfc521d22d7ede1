//! Label taxonomy: the immutable class id to display name mapping.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::ClassId;
use crate::error::YololabelError;

/// Maps class ids to display names. Built once during setup, read-only after.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelTaxonomy {
    classes: BTreeMap<ClassId, String>,
}

impl LabelTaxonomy {
    /// Builds a taxonomy from `(id, name)` pairs, rejecting duplicate ids.
    pub fn from_pairs<I, N>(pairs: I) -> Result<Self, YololabelError>
    where
        I: IntoIterator<Item = (ClassId, N)>,
        N: Into<String>,
    {
        let mut classes = BTreeMap::new();
        for (id, name) in pairs {
            if classes.insert(id, name.into()).is_some() {
                return Err(YololabelError::TaxonomyInvalid {
                    message: format!("class id {} is defined more than once", id),
                });
            }
        }
        Ok(Self { classes })
    }

    /// Parses a JSON object of string-encoded integer keys, e.g. `{"0": "Cat"}`.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let raw: BTreeMap<String, String> = serde_json::from_str(json)?;
        Self::from_raw_keys(raw).map_err(<serde_json::Error as serde::de::Error>::custom)
    }

    fn from_raw_keys(raw: BTreeMap<String, String>) -> Result<Self, String> {
        let mut classes = BTreeMap::new();
        for (key, name) in raw {
            let id = key
                .trim()
                .parse::<u32>()
                .map_err(|_| format!("class key '{}' is not a non-negative integer", key))?;
            if classes.insert(ClassId::new(id), name).is_some() {
                return Err(format!(
                    "class key '{}' collides with another key for id {}",
                    key, id
                ));
            }
        }
        Ok(Self { classes })
    }

    /// Returns the display name of a class.
    pub fn name(&self, id: ClassId) -> Option<&str> {
        self.classes.get(&id).map(String::as_str)
    }

    pub fn contains(&self, id: ClassId) -> bool {
        self.classes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// The id the setup phase would assign to the next new label.
    ///
    /// Fails when the highest id is already `u32::MAX`.
    pub fn next_class_id(&self) -> Result<ClassId, YololabelError> {
        match self.classes.keys().next_back() {
            None => Ok(ClassId::new(0)),
            Some(highest) => highest
                .as_u32()
                .checked_add(1)
                .map(ClassId::new)
                .ok_or_else(|| ids_exhausted(*highest)),
        }
    }

    /// Iterates classes in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (ClassId, &str)> {
        self.classes.iter().map(|(id, name)| (*id, name.as_str()))
    }
}

/// Reads a taxonomy JSON file.
pub fn read_taxonomy_json(path: &Path) -> Result<LabelTaxonomy, YololabelError> {
    let data = fs::read_to_string(path).map_err(YololabelError::Io)?;
    LabelTaxonomy::from_json_str(&data).map_err(|source| YololabelError::TaxonomyParse {
        path: path.to_path_buf(),
        source,
    })
}

fn ids_exhausted(highest: ClassId) -> YololabelError {
    YololabelError::TaxonomyInvalid {
        message: format!("no class id left after {}", highest),
    }
}

/// Mutable taxonomy used while labels are still being set up.
#[derive(Clone, Debug)]
pub struct TaxonomyBuilder {
    classes: BTreeMap<ClassId, String>,
    /// `None` once `u32::MAX` has been handed out.
    next: Option<u32>,
}

impl Default for TaxonomyBuilder {
    fn default() -> Self {
        Self {
            classes: BTreeMap::new(),
            next: Some(0),
        }
    }
}

impl TaxonomyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts editing from an imported taxonomy.
    pub fn from_taxonomy(taxonomy: &LabelTaxonomy) -> Self {
        Self {
            classes: taxonomy.classes.clone(),
            next: taxonomy.next_class_id().ok().map(|id| id.as_u32()),
        }
    }

    /// Adds a label under the next free id and returns that id.
    ///
    /// An empty description names the class after its id.
    pub fn add_label(&mut self, description: &str) -> Result<ClassId, YololabelError> {
        let id = match self.next {
            Some(next) => ClassId::new(next),
            None => return Err(ids_exhausted(ClassId::new(u32::MAX))),
        };
        let description = description.trim();
        let name = if description.is_empty() {
            id.to_string()
        } else {
            description.to_string()
        };
        self.classes.insert(id, name);
        self.next = id.as_u32().checked_add(1);
        Ok(id)
    }

    /// Removes a label. Ids are never reused.
    pub fn remove_label(&mut self, id: ClassId) -> Option<String> {
        self.classes.remove(&id)
    }

    pub fn build(self) -> LabelTaxonomy {
        LabelTaxonomy {
            classes: self.classes,
        }
    }
}
