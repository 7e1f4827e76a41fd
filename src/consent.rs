//! Cookie consent: categories, preferences, the store and the UI facade.
//!
//! # Main types
//!
//! - [`ConsentCategory`] and [`CategoryMetadata`]: the cookie categories and
//!   how the UI presents them.
//! - [`CookiePreferences`] and [`PreferencesPatch`]: the visitor's choice and
//!   partial updates to it.
//! - [`ConsentRecord`]: the unit persisted under the consent key.
//! - [`ConsentStore`]: loads, persists and broadcasts consent state.
//! - [`ConsentFacade`]: what banners, dialogs and script loaders talk to.
//! - [`ConsentEvent`]: events raised for third-party script loaders.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use krim_consent::config::ConsentConfig;
//! use krim_consent::consent::{ConsentFacade, ConsentStore, PreferencesPatch};
//! use krim_consent::storage::InMemoryArea;
//!
//! let store = ConsentStore::new(Arc::new(InMemoryArea::new()), ConsentConfig::default()).unwrap();
//! let consent = ConsentFacade::new(Arc::new(store));
//! assert!(consent.needs_consent());
//!
//! consent.update_preferences(&PreferencesPatch::new().analytics(true)).unwrap();
//! assert!(consent.can_use_analytics());
//! assert!(!consent.can_use_marketing());
//! ```

pub mod category;
pub mod events;
pub mod facade;
pub mod preferences;
pub mod store;

pub use category::{category_metadata, CategoryMetadata, ConsentCategory, CATEGORY_METADATA};
pub use events::{ConsentEvent, EventBus, EventSubscription};
pub use facade::{ConsentFacade, ConsentNotice, ConsentSnapshot};
pub use preferences::{ConsentRecord, CookiePreferences, PreferencesPatch, RecordStatus};
pub use store::{ConsentStore, Listener, ListenerId, Subscription};
