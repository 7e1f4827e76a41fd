//! The consent store: single source of truth for consent state.
//!
//! A [`ConsentStore`] owns the two consent keys of a [`StorageArea`] and the
//! in-memory copy of the visitor's choice. It is built explicitly by the
//! application root and shared as `Arc<ConsentStore>`. Each test builds a
//! fresh store against an in-memory area.
//!
//! # Write path
//!
//! Every mutation builds the next [`ConsentRecord`], writes it, and only then
//! updates memory and calls the listeners. If the write fails, the error is
//! returned, storage is put back the way it was, and memory and listeners are
//! left alone. The in-memory `has_consented` flag therefore never claims a
//! choice that a reload would lose.
//!
//! # Read path
//!
//! Loading never fails. A record that is missing, unparsable, written under a
//! different schema version or older than the validity window is treated as
//! "no choice made yet" and yields [`CookiePreferences::default`].
//!
//! # Listeners
//!
//! Listeners are called synchronously after each successful mutation, in
//! registration order, outside of any internal lock. A listener may read the
//! store or even mutate it. A panicking listener is logged and skipped; the
//! remaining listeners still run and the mutation still succeeds.

use std::fmt::{Debug, Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::{validate, ConsentConfig};
use crate::consent::category::ConsentCategory;
use crate::consent::preferences::{ConsentRecord, CookiePreferences, PreferencesPatch, RecordStatus};
use crate::errors::{ConsentError, Result};
use crate::storage::StorageArea;

/// Callback invoked with the new preferences after every successful mutation.
pub type Listener = Arc<dyn Fn(&CookiePreferences) + Send + Sync>;

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for ListenerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct ListenerRegistry {
    entries: Mutex<Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    fn entries(&self) -> MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, listener: Listener) -> ListenerId {
        let id = ListenerId::new();
        self.entries().push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(i, _)| *i != id);
        entries.len() != before
    }

    /// Copy of the current list, so callbacks run without the lock held.
    fn snapshot(&self) -> Vec<(ListenerId, Listener)> {
        self.entries().clone()
    }
}

/// Removes its listener when dropped.
///
/// Returned by [`ConsentStore::subscribe`]. UI components keep it for as long
/// as they are mounted.
#[must_use = "dropping a Subscription removes the listener immediately"]
pub struct Subscription {
    id: ListenerId,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ConsentState {
    preferences: CookiePreferences,
    has_consented: bool,
    record: Option<ConsentRecord>,
}

pub struct ConsentStore {
    area: Arc<dyn StorageArea>,
    config: ConsentConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<ConsentState>,
    /// Serializes persist + state update.
    write_lock: Mutex<()>,
    listeners: Arc<ListenerRegistry>,
}

impl Debug for ConsentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentStore")
            .field("config", &self.config)
            .field("state", &*self.read_state())
            .finish_non_exhaustive()
    }
}

impl ConsentStore {
    /// Creates a store on `area` and loads any stored choice.
    pub fn new(area: Arc<dyn StorageArea>, config: ConsentConfig) -> Result<Self> {
        Self::with_clock(area, config, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new) with an explicit clock.
    pub fn with_clock(area: Arc<dyn StorageArea>, config: ConsentConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        validate(&config)?;

        let store = Self {
            area,
            config,
            clock,
            state: RwLock::new(ConsentState::default()),
            write_lock: Mutex::new(()),
            listeners: Arc::new(ListenerRegistry::default()),
        };
        store.initialize();
        Ok(store)
    }

    /// Loads the stored record into memory. Does not notify listeners.
    pub fn initialize(&self) {
        let _guard = self.lock_writes();
        let loaded = self.load();
        *self.write_state() = loaded;
    }

    /// Re-reads storage, for instance after another tab changed it.
    ///
    /// Listeners are notified only if the effective preferences changed.
    pub fn reload(&self) -> CookiePreferences {
        let (prefs, changed) = {
            // a mutation must not persist between our read and the swap
            let _guard = self.lock_writes();
            let loaded = self.load();
            let mut state = self.write_state();
            let changed = state.preferences != loaded.preferences;
            *state = loaded;
            (state.preferences.clone(), changed)
        };
        if changed {
            self.notify(&prefs);
        }
        prefs
    }

    /// Drops every listener. The store itself stays usable.
    pub fn dispose(&self) {
        self.listeners.entries().clear();
    }

    pub fn config(&self) -> &ConsentConfig {
        &self.config
    }

    /// Current time according to the store's clock.
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Copy of the current preferences.
    pub fn preferences(&self) -> CookiePreferences {
        self.read_state().preferences.clone()
    }

    /// Whether the visitor has made an explicit choice that is still valid.
    pub fn has_consented(&self) -> bool {
        self.read_state().has_consented
    }

    /// The record backing the current choice, if any.
    pub fn record(&self) -> Option<ConsentRecord> {
        self.read_state().record.clone()
    }

    pub fn is_allowed(&self, category: ConsentCategory) -> bool {
        self.read_state().preferences.get(category)
    }

    /// Availability probe on the underlying storage.
    pub fn storage_available(&self) -> bool {
        self.area.is_available()
    }

    /// Allows every category.
    pub fn accept_all(&self) -> Result<CookiePreferences> {
        self.commit(|_| CookiePreferences::all_granted())
    }

    /// Allows only the essential category.
    pub fn reject_non_essential(&self) -> Result<CookiePreferences> {
        self.commit(|_| CookiePreferences::essential_only())
    }

    /// Merges `patch` onto the current preferences. `essential` stays on.
    pub fn update_preferences(&self, patch: &PreferencesPatch) -> Result<CookiePreferences> {
        self.commit(|current| current.merged(patch))
    }

    /// Forgets the choice: removes both keys and falls back to defaults.
    pub fn reset_consent(&self) -> Result<()> {
        let defaults = {
            let _guard = self.lock_writes();
            self.clear_storage()?;

            let mut state = self.write_state();
            *state = ConsentState::default();
            state.preferences.clone()
        };

        log::info!("consent reset");
        self.notify(&defaults);
        Ok(())
    }

    pub fn add_listener<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&CookiePreferences) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(f))
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Registers `f` and returns a guard that unregisters it on drop.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&CookiePreferences) + Send + Sync + 'static,
    {
        let id = self.add_listener(f);
        Subscription {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.entries().len()
    }

    fn commit(&self, next: impl FnOnce(&CookiePreferences) -> CookiePreferences) -> Result<CookiePreferences> {
        let preferences = {
            let _guard = self.lock_writes();

            let current = self.preferences();
            let preferences = next(&current);
            let record = ConsentRecord::new(
                preferences.clone(),
                self.clock.now_millis(),
                self.config.schema_version.clone(),
            );

            if let Err(e) = self.persist(&record) {
                log::warn!("consent not saved: {e}");
                return Err(e);
            }

            *self.write_state() = ConsentState {
                preferences: preferences.clone(),
                has_consented: true,
                record: Some(record),
            };
            preferences
        };

        log::debug!("consent saved: {preferences:?}");
        self.notify(&preferences);
        Ok(preferences)
    }

    fn load(&self) -> ConsentState {
        let key = &self.config.consent_key;
        let Some(raw) = self.area.get_item(key) else {
            log::debug!("no stored consent under {key}");
            return ConsentState::default();
        };

        let record: ConsentRecord = match serde_json::from_str(&raw) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("ignoring corrupt consent record under {key}: {e}");
                return ConsentState::default();
            }
        };

        match record.status(&self.config, self.clock.now_millis()) {
            RecordStatus::Valid => ConsentState {
                preferences: record.preferences.clone(),
                has_consented: true,
                record: Some(record),
            },
            RecordStatus::VersionMismatch => {
                log::info!(
                    "stored consent has version {}, expected {}; asking again",
                    record.version,
                    self.config.schema_version
                );
                ConsentState::default()
            }
            RecordStatus::Expired => {
                log::info!("stored consent from {} expired; asking again", record.timestamp);
                ConsentState::default()
            }
        }
    }

    /// Writes the record and the preferences copy. On failure the consent key
    /// is put back to what it held before.
    fn persist(&self, record: &ConsentRecord) -> Result<()> {
        if !self.area.is_available() {
            return Err(ConsentError::StorageUnavailable);
        }

        let record_json = serde_json::to_string(record)?;
        let prefs_json = serde_json::to_string(&record.preferences)?;

        let consent_key = &self.config.consent_key;
        let prefs_key = &self.config.preferences_key;
        let previous = self.snapshot_item(consent_key)?;

        self.area
            .set_item(consent_key, &record_json)
            .map_err(|source| ConsentError::StorageWrite {
                key: consent_key.clone(),
                source,
            })?;

        if let Err(source) = self.area.set_item(prefs_key, &prefs_json) {
            self.restore(consent_key, previous);
            return Err(ConsentError::StorageWrite {
                key: prefs_key.clone(),
                source,
            });
        }
        Ok(())
    }

    fn clear_storage(&self) -> Result<()> {
        if !self.area.is_available() {
            return Err(ConsentError::StorageUnavailable);
        }

        let consent_key = &self.config.consent_key;
        let prefs_key = &self.config.preferences_key;
        let previous = self.snapshot_item(consent_key)?;

        self.area
            .remove_item(consent_key)
            .map_err(|source| ConsentError::StorageRemove {
                key: consent_key.clone(),
                source,
            })?;

        if let Err(source) = self.area.remove_item(prefs_key) {
            self.restore(consent_key, previous);
            return Err(ConsentError::StorageRemove {
                key: prefs_key.clone(),
                source,
            });
        }
        Ok(())
    }

    /// Current value of `key`, for rolling back. A failed read aborts the
    /// mutation, since restoring `None` would delete a record we could not see.
    fn snapshot_item(&self, key: &str) -> Result<Option<String>> {
        self.area
            .try_get_item(key)
            .map_err(|source| ConsentError::StorageRead {
                key: key.to_string(),
                source,
            })
    }

    fn restore(&self, key: &str, previous: Option<String>) {
        let result = match previous {
            Some(value) => self.area.set_item(key, &value),
            None => self.area.remove_item(key),
        };
        if let Err(e) = result {
            log::error!("cannot restore {key} after failed write: {e}");
        }
    }

    fn notify(&self, preferences: &CookiePreferences) {
        for (id, listener) in self.listeners.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| listener(preferences))).is_err() {
                log::error!("consent listener {id} panicked");
            }
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ConsentState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ConsentState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{InMemoryArea, QuotaLimitedArea, UnavailableArea};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    const NOW: i64 = 1_760_000_000_000;
    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn fixture() -> (Arc<InMemoryArea>, Arc<ManualClock>, ConsentStore) {
        let area = Arc::new(InMemoryArea::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let store = ConsentStore::with_clock(area.clone(), ConsentConfig::default(), clock.clone()).unwrap();
        (area, clock, store)
    }

    fn reopen(area: &Arc<InMemoryArea>, clock: &Arc<ManualClock>) -> ConsentStore {
        ConsentStore::with_clock(area.clone(), ConsentConfig::default(), clock.clone()).unwrap()
    }

    fn store_record(area: &InMemoryArea, record: &ConsentRecord) {
        area.set_item("krim-cookie-consent", &serde_json::to_string(record).unwrap())
            .unwrap();
    }

    #[test]
    fn fresh_store_has_defaults() {
        let (_area, _clock, store) = fixture();
        assert!(!store.has_consented());
        assert_eq!(store.preferences(), CookiePreferences::default());
        assert!(store.record().is_none());
    }

    #[test]
    fn accept_all_grants_everything_and_notifies_once() {
        let (_area, _clock, store) = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.add_listener(move |p| sink.lock().unwrap().push(p.clone()));

        let prefs = store.accept_all().unwrap();

        assert!(store.has_consented());
        for c in ConsentCategory::ALL {
            assert!(store.is_allowed(c));
        }
        assert_eq!(prefs, CookiePreferences::all_granted());
        assert_eq!(*seen.lock().unwrap(), vec![CookiePreferences::all_granted()]);
    }

    #[test]
    fn accept_all_and_reject_are_idempotent_but_notify_each_time() {
        let (_area, _clock, store) = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        store.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let once = store.accept_all().unwrap();
        let twice = store.accept_all().unwrap();
        assert_eq!(once, twice);

        let once = store.reject_non_essential().unwrap();
        let twice = store.reject_non_essential().unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, CookiePreferences::essential_only());

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn choice_survives_reload() {
        let (area, clock, store) = fixture();
        store.accept_all().unwrap();

        let reloaded = reopen(&area, &clock);
        assert!(reloaded.has_consented());
        assert_eq!(reloaded.preferences(), CookiePreferences::all_granted());
        assert_eq!(reloaded.record().unwrap().timestamp, NOW);
    }

    #[test]
    fn both_keys_are_written() {
        let (area, _clock, store) = fixture();
        store.update_preferences(&PreferencesPatch::new().functional(true)).unwrap();

        let record: ConsentRecord =
            serde_json::from_str(&area.get_item("krim-cookie-consent").unwrap()).unwrap();
        assert_eq!(record.version, "1.0");
        assert!(record.has_consented);
        assert!(record.preferences.functional());

        let prefs: CookiePreferences =
            serde_json::from_str(&area.get_item("krim-cookie-preferences").unwrap()).unwrap();
        assert_eq!(prefs, record.preferences);
    }

    #[test]
    fn version_mismatch_falls_back_to_defaults() {
        let (area, clock, _store) = fixture();
        store_record(&area, &ConsentRecord::new(CookiePreferences::all_granted(), NOW, "0.9"));

        let store = reopen(&area, &clock);
        assert!(!store.has_consented());
        assert_eq!(store.preferences(), CookiePreferences::default());
    }

    #[test]
    fn expired_record_falls_back_to_defaults() {
        let (area, clock, store) = fixture();
        store.accept_all().unwrap();

        clock.advance(time::Duration::days(366));
        let store = reopen(&area, &clock);
        assert!(!store.has_consented());
        assert_eq!(store.preferences(), CookiePreferences::default());
    }

    #[test]
    fn record_within_a_year_is_kept() {
        let (area, clock, _store) = fixture();
        store_record(&area, &ConsentRecord::new(CookiePreferences::all_granted(), NOW - 364 * DAY_MS, "1.0"));

        let store = reopen(&area, &clock);
        assert!(store.has_consented());
        assert!(store.is_allowed(ConsentCategory::Marketing));
    }

    #[test]
    fn corrupt_record_falls_back_to_defaults() {
        let (area, clock, _store) = fixture();
        area.set_item("krim-cookie-consent", "{not json").unwrap();
        assert!(!reopen(&area, &clock).has_consented());

        area.set_item("krim-cookie-consent", r#"{"preferences":{},"version":"1.0"}"#).unwrap();
        assert!(!reopen(&area, &clock).has_consented());
    }

    #[test]
    fn partial_update_merges_onto_current() {
        let (_area, _clock, store) = fixture();
        let prefs = store.update_preferences(&PreferencesPatch::new().marketing(true)).unwrap();

        assert!(prefs.essential());
        assert!(!prefs.analytics());
        assert!(prefs.marketing());
        assert!(!prefs.functional());
        assert!(store.has_consented());
    }

    #[test]
    fn essential_stays_on_through_every_operation() {
        let (_area, _clock, store) = fixture();
        let ops: Vec<Box<dyn Fn(&ConsentStore)>> = vec![
            Box::new(|s: &ConsentStore| { s.accept_all().unwrap(); }),
            Box::new(|s: &ConsentStore| { s.update_preferences(&PreferencesPatch::new().essential(false)).unwrap(); }),
            Box::new(|s: &ConsentStore| { s.reject_non_essential().unwrap(); }),
            Box::new(|s: &ConsentStore| { s.reset_consent().unwrap(); }),
            Box::new(|s: &ConsentStore| { s.update_preferences(&PreferencesPatch::new().essential(false).analytics(true)).unwrap(); }),
        ];
        for op in ops {
            op(&store);
            assert!(store.preferences().essential());
            assert!(store.is_allowed(ConsentCategory::Essential));
        }
    }

    #[test]
    fn reset_clears_memory_and_storage() {
        let (area, clock, store) = fixture();
        store.accept_all().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.add_listener(move |p| sink.lock().unwrap().push(p.clone()));

        store.reset_consent().unwrap();

        assert!(!store.has_consented());
        assert_eq!(store.preferences(), CookiePreferences::default());
        assert!(area.get_item("krim-cookie-consent").is_none());
        assert!(area.get_item("krim-cookie-preferences").is_none());
        assert_eq!(*seen.lock().unwrap(), vec![CookiePreferences::default()]);
        assert!(!reopen(&area, &clock).has_consented());
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let (_area, _clock, store) = fixture();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        store.add_listener(move |p| first.lock().unwrap().push(("first", p.clone())));
        let second = order.clone();
        store.add_listener(move |p| second.lock().unwrap().push(("second", p.clone())));

        store.reject_non_essential().unwrap();

        let expected = CookiePreferences::essential_only();
        assert_eq!(
            *order.lock().unwrap(),
            vec![("first", expected.clone()), ("second", expected)]
        );
    }

    #[test]
    fn removed_listener_is_not_called() {
        let (_area, _clock, store) = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = store.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(store.remove_listener(id));
        assert!(!store.remove_listener(id));
        store.accept_all().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscription_unsubscribes_on_drop() {
        let (_area, _clock, store) = fixture();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let sub = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.accept_all().unwrap();
        assert_eq!(store.listener_count(), 1);

        drop(sub);
        assert_eq!(store.listener_count(), 0);
        store.accept_all().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = calls.clone();
        store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unsubscribe();
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_others() {
        let (_area, _clock, store) = fixture();
        let calls = Arc::new(AtomicUsize::new(0));

        store.add_listener(|_| panic!("listener bug"));
        let counter = calls.clone();
        store.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(store.accept_all().is_ok());
        assert!(store.has_consented());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_can_read_the_store() {
        let (_area, _clock, store) = fixture();
        let store = Arc::new(store);
        let seen = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&store);
        let sink = seen.clone();
        store.add_listener(move |_| {
            if let Some(s) = weak.upgrade() {
                *sink.lock().unwrap() = Some(s.has_consented());
            }
        });

        store.accept_all().unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[test]
    fn unavailable_storage_fails_without_ghost_consent() {
        let store = ConsentStore::new(Arc::new(UnavailableArea::new()), ConsentConfig::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        store.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!store.storage_available());
        assert!(matches!(store.accept_all(), Err(ConsentError::StorageUnavailable)));
        assert!(matches!(store.reset_consent(), Err(ConsentError::StorageUnavailable)));
        assert!(!store.has_consented());
        assert_eq!(store.preferences(), CookiePreferences::default());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    /// Area whose writes to one key can be made to fail, and whose fallible
    /// reads can be made to error.
    struct FlakyArea {
        inner: InMemoryArea,
        failing_key: Mutex<Option<String>>,
        unreadable: AtomicBool,
    }

    fn flaky() -> Arc<FlakyArea> {
        Arc::new(FlakyArea {
            inner: InMemoryArea::new(),
            failing_key: Mutex::new(None),
            unreadable: AtomicBool::new(false),
        })
    }

    impl StorageArea for FlakyArea {
        fn get_item(&self, key: &str) -> Option<String> { self.inner.get_item(key) }
        fn try_get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
            if self.unreadable.load(Ordering::SeqCst) {
                anyhow::bail!("read of {key} failed");
            }
            Ok(self.inner.get_item(key))
        }
        fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()> {
            if self.failing_key.lock().unwrap().as_deref() == Some(key) {
                anyhow::bail!("write to {key} rejected");
            }
            self.inner.set_item(key, value)
        }
        fn remove_item(&self, key: &str) -> anyhow::Result<()> {
            if self.failing_key.lock().unwrap().as_deref() == Some(key) {
                anyhow::bail!("remove of {key} rejected");
            }
            self.inner.remove_item(key)
        }
        fn clear(&self) -> anyhow::Result<()> { self.inner.clear() }
        fn len(&self) -> usize { self.inner.len() }
        fn keys(&self) -> Vec<String> { self.inner.keys() }
    }

    #[test]
    fn failed_second_write_restores_previous_record() {
        let area = flaky();
        let clock = Arc::new(ManualClock::new(NOW));
        let store = ConsentStore::with_clock(area.clone(), ConsentConfig::default(), clock.clone()).unwrap();

        store.reject_non_essential().unwrap();
        let before = area.get_item("krim-cookie-consent");

        *area.failing_key.lock().unwrap() = Some("krim-cookie-preferences".into());
        clock.advance(time::Duration::seconds(1));
        let err = store.accept_all().unwrap_err();
        assert!(matches!(err, ConsentError::StorageWrite { ref key, .. } if key == "krim-cookie-preferences"));

        assert_eq!(area.get_item("krim-cookie-consent"), before);
        assert_eq!(store.preferences(), CookiePreferences::essential_only());
        assert_eq!(store.record().unwrap().timestamp, NOW);
    }

    #[test]
    fn failed_reset_keeps_choice() {
        let area = flaky();
        let store = ConsentStore::new(area.clone(), ConsentConfig::default()).unwrap();
        store.accept_all().unwrap();
        let before = area.get_item("krim-cookie-consent");

        *area.failing_key.lock().unwrap() = Some("krim-cookie-preferences".into());
        let err = store.reset_consent().unwrap_err();
        assert!(matches!(err, ConsentError::StorageRemove { .. }));

        assert!(store.has_consented());
        assert_eq!(store.preferences(), CookiePreferences::all_granted());
        assert_eq!(area.get_item("krim-cookie-consent"), before);
    }

    #[test]
    fn unreadable_record_aborts_instead_of_wiping_it() {
        let area = flaky();
        let store = ConsentStore::new(area.clone(), ConsentConfig::default()).unwrap();
        store.accept_all().unwrap();
        let before = area.get_item("krim-cookie-consent");

        area.unreadable.store(true, Ordering::SeqCst);
        *area.failing_key.lock().unwrap() = Some("krim-cookie-preferences".into());

        let err = store.reject_non_essential().unwrap_err();
        assert!(matches!(err, ConsentError::StorageRead { ref key, .. } if key == "krim-cookie-consent"));
        assert!(matches!(store.reset_consent(), Err(ConsentError::StorageRead { .. })));

        assert_eq!(area.get_item("krim-cookie-consent"), before);
        assert!(store.has_consented());
        assert_eq!(store.preferences(), CookiePreferences::all_granted());
    }

    #[test]
    fn nearly_full_quota_is_a_write_failure() {
        let inner = Arc::new(InMemoryArea::new());
        // too small even for the availability check's sentinel
        let quota = Arc::new(QuotaLimitedArea::new(inner.clone(), 16));
        let store = ConsentStore::new(quota, ConsentConfig::default()).unwrap();

        assert!(store.storage_available());
        let err = store.accept_all().unwrap_err();
        assert!(matches!(err, ConsentError::StorageWrite { .. }));
        assert!(!store.has_consented());
        assert!(inner.is_empty());
    }

    #[test]
    fn failed_write_keeps_state_and_skips_listeners() {
        let inner = Arc::new(InMemoryArea::new());
        let quota = Arc::new(QuotaLimitedArea::new(inner.clone(), 64));
        let store = ConsentStore::new(quota, ConsentConfig::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        store.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let err = store.accept_all().unwrap_err();
        assert!(matches!(err, ConsentError::StorageWrite { ref key, .. } if key == "krim-cookie-consent"));
        assert!(!store.has_consented());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(inner.is_empty());
    }

    #[test]
    fn reload_picks_up_external_changes() {
        let (area, clock, store) = fixture();
        let other = reopen(&area, &clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        store.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        other.accept_all().unwrap();
        assert!(!store.has_consented());

        let prefs = store.reload();
        assert_eq!(prefs, CookiePreferences::all_granted());
        assert!(store.has_consented());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.reload();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Area whose next read of the consent key pauses after announcing itself.
    struct SlowReadArea {
        inner: InMemoryArea,
        armed: AtomicBool,
        started: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl StorageArea for SlowReadArea {
        fn get_item(&self, key: &str) -> Option<String> {
            if key == "krim-cookie-consent" && self.armed.swap(false, Ordering::SeqCst) {
                if let Some(tx) = self.started.lock().unwrap().take() {
                    tx.send(()).unwrap();
                }
                thread::sleep(Duration::from_millis(200));
            }
            self.inner.get_item(key)
        }
        fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()> { self.inner.set_item(key, value) }
        fn remove_item(&self, key: &str) -> anyhow::Result<()> { self.inner.remove_item(key) }
        fn clear(&self) -> anyhow::Result<()> { self.inner.clear() }
        fn len(&self) -> usize { self.inner.len() }
        fn keys(&self) -> Vec<String> { self.inner.keys() }
    }

    #[test]
    fn reload_racing_a_mutation_keeps_memory_in_step_with_storage() {
        let area = Arc::new(SlowReadArea {
            inner: InMemoryArea::new(),
            armed: AtomicBool::new(false),
            started: Mutex::new(None),
        });
        let store = Arc::new(ConsentStore::new(area.clone(), ConsentConfig::default()).unwrap());

        let (tx, rx) = mpsc::channel();
        *area.started.lock().unwrap() = Some(tx);
        area.armed.store(true, Ordering::SeqCst);

        let reloader = {
            let store = store.clone();
            thread::spawn(move || store.reload())
        };
        rx.recv().unwrap();
        store.accept_all().unwrap();
        reloader.join().unwrap();

        assert!(area.get_item("krim-cookie-consent").is_some());
        assert!(store.has_consented());
        assert_eq!(store.preferences(), CookiePreferences::all_granted());
    }

    #[test]
    fn dispose_drops_listeners() {
        let (_area, _clock, store) = fixture();
        store.add_listener(|_| {});
        store.add_listener(|_| {});
        store.dispose();
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = ConsentConfig {
            preferences_key: "krim-cookie-consent".into(),
            ..ConsentConfig::default()
        };
        let err = ConsentStore::new(Arc::new(InMemoryArea::new()), cfg).unwrap_err();
        assert!(matches!(err, ConsentError::Config(_)));
    }
}
