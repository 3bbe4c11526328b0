//! Client-side data synchronization for a social prediction-market app.
//!
//! Two caches (a flat TTL cache and a hierarchical query cache), a request
//! coalescer, a WebSocket push channel that maps server events onto cache
//! invalidations, and hybrid poll/push unread counters, composed by
//! [`SyncSession`].

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod coalescer;
pub mod config;
pub mod counter;
pub mod error;
pub mod live;
pub mod scheduler;
pub mod session;

#[cfg(feature = "cli")]
pub mod cli;

pub use auth::CredentialStore;
pub use config::SyncConfig;
pub use error::{ApiError, ConfigError, LiveError, SyncError};
pub use session::{Mutation, Query, SyncSession};
pub use types;
