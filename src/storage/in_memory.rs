use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;

use crate::storage::area::StorageArea;

/// In‑memory storage (no persistence). Used as a default when no durable storage is configured.
#[derive(Default)]
pub struct InMemoryArea {
    map: Mutex<HashMap<String, String>>,
}

impl InMemoryArea {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an area pre-filled with the given items.
    pub fn with_items<I, K, V>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = items
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self { map: Mutex::new(map) }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StorageArea for InMemoryArea {
    fn get_item(&self, key: &str) -> Option<String> {
        self.map().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.map().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.map().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.map().clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.map().len()
    }

    fn keys(&self) -> Vec<String> {
        let mut v: Vec<String> = self.map().keys().cloned().collect();
        v.sort_unstable();
        v
    }

    fn is_available(&self) -> bool {
        true
    }
}
