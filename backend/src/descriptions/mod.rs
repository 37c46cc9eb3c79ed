//! Description Registry - the dataset descriptions served by the API
//!
//! Loads every `<feature>.json` in a directory. The feature name is the file stem.
//! Documents failing schema validation are skipped with a warning.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::ConfigResult;
use crate::models::DatasetDescription;
use crate::validation::validate_description;

/// Registry of description documents keyed by feature name
#[derive(Debug, Clone, Default)]
pub struct DescriptionRegistry {
    dir: PathBuf,
    descriptions: BTreeMap<String, DatasetDescription>,
}

impl DescriptionRegistry {
    /// Create a registry, loading every description in `dir`
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        let mut registry = Self {
            dir: dir.as_ref().to_path_buf(),
            descriptions: BTreeMap::new(),
        };
        registry.load_all();
        registry
    }

    /// Read, validate and decode one description file.
    pub fn load_file(path: &Path) -> ConfigResult<DatasetDescription> {
        let content = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)?;
        validate_description(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    fn load_all(&mut self) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "Descriptions directory unreadable");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            match Self::load_file(&path) {
                Ok(description) => {
                    self.descriptions.insert(name, description);
                }
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "Skipping invalid description");
                }
            }
        }

        info!(
            dir = %self.dir.display(),
            features = self.descriptions.len(),
            "Loaded dataset descriptions"
        );
    }

    /// Re-read the directory from scratch
    pub fn reload(&mut self) {
        self.descriptions.clear();
        self.load_all();
    }

    /// Feature names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.descriptions.keys().map(String::as_str).collect()
    }

    pub fn get(&self, feature: &str) -> Option<&DatasetDescription> {
        self.descriptions.get(feature)
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
