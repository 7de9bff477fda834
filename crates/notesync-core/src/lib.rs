//! # notesync-core
//!
//! Core types, traits, and abstractions for the notesync service.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the other notesync crates depend on.

pub mod error;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
