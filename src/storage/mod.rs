//! Storage Module
//!
//! The authoritative key-value state and its background reaper.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                    Store                    │
//! │      RwLock ┬─ values:      key -> value    │
//! │             └─ expirations: key -> deadline │
//! └─────────────────────────────────────────────┘
//!                       ▲
//!                       │ purge_expired() every interval
//!          ┌────────────┴──────────────┐
//!          │          Reaper           │
//!          │  (Background Tokio Task)  │
//!          └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use gedis::storage::Store;
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let store = Store::new();
//! store.set(Bytes::from("name"), Bytes::from("Ariz"));
//! assert_eq!(store.get(b"name"), Some(Bytes::from("Ariz")));
//!
//! store.set_ex(Bytes::from("session"), Bytes::from("token123"), Duration::from_secs(3600));
//! assert_eq!(store.del(&["name", "session"]), 2);
//! ```

pub mod reaper;
pub mod store;

pub use reaper::{Reaper, ReaperConfig, DEFAULT_REAP_INTERVAL};
pub use store::{Store, StoreStats, Ttl, DEFAULT_SETEX_TTL, MAX_TTL};
