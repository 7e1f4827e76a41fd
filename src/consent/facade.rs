//! UI-facing consent contract.
//!
//! Banner, preferences dialog and script loaders depend on [`ConsentFacade`]
//! rather than on the store. On top of the store operations the facade:
//!
//! - derives `can_use_*` flags straight from the store, so they already show
//!   the new state by the time any listener or event consumer runs;
//! - lets one mutation run at a time. A second call made while the first is
//!   still persisting or notifying (a double click, or a listener reacting to
//!   the change) fails with [`ConsentError::MutationInProgress`];
//! - raises [`ConsentEvent`]s for script loaders after each successful change;
//! - keeps a [`ConsentNotice`] the UI can show when a choice could not be saved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::consent::category::{category_metadata, CategoryMetadata, ConsentCategory};
use crate::consent::events::{ConsentEvent, EventBus, EventSubscription};
use crate::consent::preferences::{CookiePreferences, PreferencesPatch};
use crate::consent::store::{ConsentStore, ListenerId, Subscription};
use crate::errors::{ConsentError, Result};

/// Non-blocking message for the consent UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsentNotice {
    /// Storage is disabled; choices cannot be remembered.
    StorageUnavailable,
    /// The last choice could not be saved and was not applied.
    PreferencesNotSaved,
}

impl ConsentNotice {
    pub fn message(&self) -> &'static str {
        match self {
            ConsentNotice::StorageUnavailable =>
                "Your browser is blocking storage, so cookie preferences cannot be remembered.",
            ConsentNotice::PreferencesNotSaved =>
                "Your cookie preferences could not be saved. Please try again.",
        }
    }
}

/// Everything a render pass needs, taken at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentSnapshot {
    pub preferences: CookiePreferences,
    pub has_consented: bool,
    pub can_use_analytics: bool,
    pub can_use_marketing: bool,
    pub can_use_functional: bool,
}

impl From<(&CookiePreferences, bool)> for ConsentSnapshot {
    fn from((preferences, has_consented): (&CookiePreferences, bool)) -> Self {
        Self {
            preferences: preferences.clone(),
            has_consented,
            can_use_analytics: preferences.analytics(),
            can_use_marketing: preferences.marketing(),
            can_use_functional: preferences.functional(),
        }
    }
}

/// Clears the in-flight flag when the mutation ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ConsentFacade {
    store: Arc<ConsentStore>,
    bus: EventBus,
    in_flight: AtomicBool,
    notice: Mutex<Option<ConsentNotice>>,
}

impl std::fmt::Debug for ConsentFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentFacade")
            .field("store", &self.store)
            .field("in_flight", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl ConsentFacade {
    pub fn new(store: Arc<ConsentStore>) -> Self {
        let bus = EventBus::new(store.config().event_capacity);
        let notice = if store.storage_available() {
            None
        } else {
            log::warn!("consent storage unavailable; choices will not be remembered");
            Some(ConsentNotice::StorageUnavailable)
        };

        Self {
            store,
            bus,
            in_flight: AtomicBool::new(false),
            notice: Mutex::new(notice),
        }
    }

    pub fn store(&self) -> &Arc<ConsentStore> {
        &self.store
    }

    // ---------- Reads ----------

    pub fn preferences(&self) -> CookiePreferences {
        self.store.preferences()
    }

    pub fn has_consented(&self) -> bool {
        self.store.has_consented()
    }

    pub fn is_allowed(&self, category: ConsentCategory) -> bool {
        self.store.is_allowed(category)
    }

    pub fn can_use_analytics(&self) -> bool {
        self.store.is_allowed(ConsentCategory::Analytics)
    }

    pub fn can_use_marketing(&self) -> bool {
        self.store.is_allowed(ConsentCategory::Marketing)
    }

    pub fn can_use_functional(&self) -> bool {
        self.store.is_allowed(ConsentCategory::Functional)
    }

    /// Whether the banner should be shown.
    pub fn needs_consent(&self) -> bool {
        !self.store.has_consented()
    }

    pub fn snapshot(&self) -> ConsentSnapshot {
        ConsentSnapshot::from((&self.store.preferences(), self.store.has_consented()))
    }

    /// Static metadata for rendering the category list.
    pub fn categories(&self) -> &'static [CategoryMetadata] {
        category_metadata()
    }

    pub fn notice(&self) -> Option<ConsentNotice> {
        *self.notice.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True while a mutation is persisting or notifying.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    // ---------- Mutations ----------

    pub fn accept_all(&self) -> Result<CookiePreferences> {
        self.mutate(|store| store.accept_all())
    }

    pub fn reject_non_essential(&self) -> Result<CookiePreferences> {
        self.mutate(|store| store.reject_non_essential())
    }

    pub fn update_preferences(&self, patch: &PreferencesPatch) -> Result<CookiePreferences> {
        self.mutate(|store| store.update_preferences(patch))
    }

    pub fn reset_consent(&self) -> Result<()> {
        self.mutate(|store| {
            store.reset_consent()?;
            Ok(store.preferences())
        })
        .map(drop)
    }

    // ---------- Subscriptions ----------

    pub fn add_listener<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&CookiePreferences) + Send + Sync + 'static,
    {
        self.store.add_listener(f)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.store.remove_listener(id)
    }

    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&CookiePreferences) + Send + Sync + 'static,
    {
        self.store.subscribe(f)
    }

    /// Receiver for [`ConsentEvent`]s raised after each successful change.
    pub fn subscribe_events(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    fn begin(&self) -> Result<InFlight<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ConsentError::MutationInProgress)?;
        Ok(InFlight(&self.in_flight))
    }

    fn mutate(&self, op: impl FnOnce(&ConsentStore) -> Result<CookiePreferences>) -> Result<CookiePreferences> {
        let _in_flight = match self.begin() {
            Ok(guard) => guard,
            Err(e) => {
                log::debug!("consent change ignored: another change is in progress");
                return Err(e);
            }
        };

        let before = self.store.preferences();
        match op(&self.store) {
            Ok(after) => {
                self.set_notice(None);
                let timestamp = self
                    .store
                    .record()
                    .map(|r| r.timestamp)
                    .unwrap_or_else(|| self.store.now_millis());
                for ev in ConsentEvent::for_change(&before, &after, timestamp) {
                    self.bus.publish(ev);
                }
                Ok(after)
            }
            Err(e) => {
                match &e {
                    ConsentError::StorageUnavailable => self.set_notice(Some(ConsentNotice::StorageUnavailable)),
                    e if e.is_persistence_failure() => self.set_notice(Some(ConsentNotice::PreferencesNotSaved)),
                    _ => {}
                }
                Err(e)
            }
        }
    }

    fn set_notice(&self, notice: Option<ConsentNotice>) {
        *self.notice.lock().unwrap_or_else(PoisonError::into_inner) = notice;
    }
}
