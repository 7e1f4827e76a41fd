use anyhow::Result;

/// Key written and removed again by the default [`StorageArea::is_available`] probe.
pub const PROBE_KEY: &str = "__krim_storage_probe__";

/// Object-safe key/value storage area (DOM's Storage).
pub trait StorageArea: Send + Sync {
    /// Retrieves the value associated with the given key, or `None` if not found.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Like [`get_item`](Self::get_item), but reports backend read errors
    /// instead of folding them into `None`.
    fn try_get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_item(key))
    }

    /// Sets the value for the given key, overwriting any existing value.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Removes the item with the given key. Removing a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<()>;

    /// Clears all items in the storage area.
    fn clear(&self) -> Result<()>;

    /// Returns the number of items in the storage area.
    fn len(&self) -> usize;

    /// Returns a vector of all keys in the storage area.
    fn keys(&self) -> Vec<String>;

    /// Returns `true` when the area holds no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Availability probe.
    ///
    /// The default writes [`PROBE_KEY`] and removes it again, the same check a
    /// page does against `localStorage` before trusting it. Backends that know
    /// their state up front may override this.
    fn is_available(&self) -> bool {
        if self.set_item(PROBE_KEY, PROBE_KEY).is_err() {
            return false;
        }
        self.remove_item(PROBE_KEY).is_ok()
    }
}
