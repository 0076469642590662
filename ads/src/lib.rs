//! `ads` crate entry point.
//!
//! Responsibilities: the advertisement data model and the shared
//! fetch-state cache every banner instance reads from. This file only
//! assembles modules and re-exports; the implementations live in the
//! submodules.
//!
//! Module split:
//! - `ad`: the `Advertisement` record and shared-list handle.
//! - `cache`: `AdCache`, the fetch-phase state machine and change
//!   notifications.
//!
//! Quick example:
//! ```rust
//! use ads::{AdCache, Advertisement};
//!
//! let cache = AdCache::new();
//! assert!(cache.try_claim_fetch(false));
//!
//! let _ = cache.commit(vec![Advertisement {
//!     advertisement_id: 1,
//!     store_id: 10,
//!     store_name: "Corner Store".to_string(),
//!     url: "https://cdn.example/banner-1.png".to_string(),
//!     link: None,
//! }]);
//!
//! assert_eq!(cache.list().len(), 1);
//! assert!(cache.snapshot().fetch_attempted());
//! ```

mod ad;
mod cache;

pub use ad::{Advertisement, SharedAdList};
pub use cache::{AdCache, CacheEvent, CacheMetrics, CacheSnapshot, FetchPhase};
