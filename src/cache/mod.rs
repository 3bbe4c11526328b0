//! Two-tier client cache
//!
//! - [`TtlCache`]: flat string keys, per-entry TTL, lazy expiry, regex
//!   invalidation
//! - [`QueryCache`]: hierarchical keys, staleness and GC windows, cascading
//!   prefix invalidation, optimistic writes

mod entry;
mod key;
mod query;
mod ttl;
mod value;

pub use entry::CacheEntry;
pub use key::{filter_hash, QueryKey};
pub use query::{Freshness, QueryCache, QueryObserver, QueryRead};
pub use ttl::{CacheStats, TtlCache};
pub use value::CachedValue;
