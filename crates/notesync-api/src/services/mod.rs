//! Shared services for the API server: the per-owner list cache and the
//! per-identity rate limiter. Both are constructed in `main` and injected
//! through application state, never reached through globals.

pub mod notes_cache;
pub mod rate_limit;

pub use notes_cache::NotesCache;
pub use rate_limit::{RateDecision, RateLimiter};
