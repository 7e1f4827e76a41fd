//! JSON-backed storage.
//!
//! `JsonFileArea` keeps every key of the area in a single JSON object on disk:
//!
//! ```json
//! { "items": { "krim-cookie-consent": "{...}", "krim-cookie-preferences": "{...}" } }
//! ```
//!
//! ### Design
//! - The file is the source of truth; there is no in-memory cache, so several
//!   areas opened on the same path observe each other's writes.
//! - Every mutation **reads then rewrites** the whole file. Writes go to a
//!   sibling temp file first and are moved into place with a rename.
//! - A file that cannot be parsed is treated as empty on read. The next write
//!   replaces it.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::storage::area::StorageArea;

/// On-disk representation of the area.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageFile {
    items: BTreeMap<String, String>,
}

/// A JSON file based storage area.
pub struct JsonFileArea {
    /// Path to the JSON file where items are stored.
    path: PathBuf,
    /// Serializes read-modify-write cycles from this handle.
    write_lock: Mutex<()>,
}

impl JsonFileArea {
    /// Opens a JSON storage file at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the file. A missing file is an empty area.
    fn load_file(&self) -> Result<StorageFile> {
        if !self.path.exists() {
            return Ok(StorageFile::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("cannot read {}", self.path.display()))?;

        match serde_json::from_str(&contents) {
            Ok(file) => Ok(file),
            Err(e) => {
                log::warn!("json storage: {} is corrupt, treating as empty: {e}", self.path.display());
                Ok(StorageFile::default())
            }
        }
    }

    fn save_file(&self, file: &StorageFile) -> Result<()> {
        let contents = serde_json::to_string_pretty(file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents).with_context(|| format!("cannot write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("cannot move {} into place", tmp.display()))?;
        Ok(())
    }

    fn modify(&self, f: impl FnOnce(&mut StorageFile)) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.load_file()?;
        f(&mut file);
        self.save_file(&file)
    }
}

impl StorageArea for JsonFileArea {
    fn get_item(&self, key: &str) -> Option<String> {
        match self.load_file() {
            Ok(mut file) => file.items.remove(key),
            Err(e) => {
                log::warn!("json storage: {e:#}");
                None
            }
        }
    }

    fn try_get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load_file()?.items.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.modify(|file| {
            file.items.insert(key.to_string(), value.to_string());
        })
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.modify(|file| {
            file.items.remove(key);
        })
    }

    fn clear(&self) -> Result<()> {
        self.modify(|file| file.items.clear())
    }

    fn len(&self) -> usize {
        self.load_file().map(|f| f.items.len()).unwrap_or(0)
    }

    fn keys(&self) -> Vec<String> {
        self.load_file()
            .map(|f| f.items.into_keys().collect())
            .unwrap_or_default()
    }
}
