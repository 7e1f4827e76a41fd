use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::storage::area::StorageArea;

/// A `StorageArea` decorator that enforces a byte quota.
///
/// Usage is counted as the sum of `key.len() + value.len()` over all items,
/// which is roughly how browsers account `localStorage`. Writes that would
/// push the area past the quota fail with a "quota exceeded" error and leave
/// the inner area untouched. Reads and removals pass through.
///
/// A full quota is not reported as unavailable storage: [`is_available`]
/// asks the inner area, so callers can tell "disabled" from "full".
///
/// [`is_available`]: StorageArea::is_available
pub struct QuotaLimitedArea {
    inner: Arc<dyn StorageArea>,
    quota: AtomicUsize,
}

impl QuotaLimitedArea {
    pub fn new(inner: Arc<dyn StorageArea>, quota_bytes: usize) -> Self {
        Self {
            inner,
            quota: AtomicUsize::new(quota_bytes),
        }
    }

    /// Changes the quota. Existing items are kept even if they now exceed it.
    pub fn set_quota(&self, quota_bytes: usize) {
        self.quota.store(quota_bytes, Ordering::SeqCst);
    }

    pub fn quota(&self) -> usize {
        self.quota.load(Ordering::SeqCst)
    }

    /// Bytes currently used by the inner area.
    pub fn used_bytes(&self) -> usize {
        self.inner
            .keys()
            .iter()
            .map(|k| k.len() + self.inner.get_item(k).map_or(0, |v| v.len()))
            .sum()
    }
}

impl StorageArea for QuotaLimitedArea {
    fn get_item(&self, key: &str) -> Option<String> {
        self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let current = self
            .inner
            .get_item(key)
            .map_or(0, |old| key.len() + old.len());
        // another handle may have removed `key` since it was measured
        let needed = self.used_bytes().saturating_sub(current) + key.len() + value.len();
        let quota = self.quota();
        if needed > quota {
            bail!("quota exceeded writing {key}: {needed} bytes needed, quota is {quota}");
        }
        self.inner.set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.inner.remove_item(key)
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}
