//! Durable key/value storage for consent state.
//!
//! The consent store never talks to a concrete backend directly. It holds an
//! `Arc<dyn StorageArea>`, which is the equivalent of the browser's
//! `localStorage` for a single site: a flat string-to-string map that may be
//! missing, full, or disabled entirely.
//!
//! # Available backends
//!
//! - [`InMemoryArea`]: a plain map. No persistence. Used in tests and for
//!   ephemeral sessions.
//! - [`SqliteArea`]: SQLite-backed persistent storage (feature `sqlite_store`).
//! - [`JsonFileArea`]: a single JSON file holding every key.
//! - [`UnavailableArea`]: storage that is switched off (private browsing,
//!   blocked by settings). Every write fails.
//! - [`QuotaLimitedArea`]: wraps another area and refuses writes that would
//!   exceed a byte quota.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use krim_consent::storage::{InMemoryArea, StorageArea};
//!
//! let area: Arc<dyn StorageArea> = Arc::new(InMemoryArea::new());
//! area.set_item("greeting", "hello").unwrap();
//! assert_eq!(area.get_item("greeting").as_deref(), Some("hello"));
//! assert!(area.is_available());
//! ```

/// Storage area trait, defining the key/value interface.
pub mod area;
/// Single-file JSON backend.
pub mod json_file;
/// Byte-quota decorator.
pub mod quota;
/// Always-failing backend for disabled storage.
pub mod unavailable;

/// In-memory storage implementation.
pub mod in_memory;

/// SQLite-backed storage implementation.
#[cfg(feature = "sqlite_store")]
pub mod sqlite_store;

pub use area::{StorageArea, PROBE_KEY};
pub use in_memory::InMemoryArea;
pub use json_file::JsonFileArea;
pub use quota::QuotaLimitedArea;
#[cfg(feature = "sqlite_store")]
pub use sqlite_store::SqliteArea;
pub use unavailable::UnavailableArea;
