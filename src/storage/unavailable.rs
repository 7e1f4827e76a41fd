use anyhow::{bail, Result};

use crate::storage::area::StorageArea;

/// Storage that is switched off.
///
/// Models a browser with storage disabled in its settings or a private
/// window that rejects writes. Reads return nothing; every write fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableArea;

impl UnavailableArea {
    pub fn new() -> Self {
        Self
    }
}

impl StorageArea for UnavailableArea {
    fn get_item(&self, _key: &str) -> Option<String> {
        None
    }

    fn set_item(&self, key: &str, _value: &str) -> Result<()> {
        bail!("storage is disabled, cannot write {key}")
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        bail!("storage is disabled, cannot remove {key}")
    }

    fn clear(&self) -> Result<()> {
        bail!("storage is disabled, cannot clear")
    }

    fn len(&self) -> usize {
        0
    }

    fn keys(&self) -> Vec<String> {
        vec![]
    }

    fn is_available(&self) -> bool {
        false
    }
}
