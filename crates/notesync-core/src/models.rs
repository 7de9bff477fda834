//! Core data models for notesync.
//!
//! These types are shared across all notesync crates and represent
//! the core domain entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// NOTE TYPES
// =============================================================================

/// A versioned note owned by exactly one user.
///
/// `version` starts at 1 and increases by exactly 1 on each accepted update;
/// it is the sole concurrency-control token. `archived` is a boolean through
/// the whole stack: domain, storage column, and wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: Option<String>,
    pub content: Option<String>,
    pub version: i32,
    pub archived: bool,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

/// Request for creating a new note.
#[derive(Debug, Clone, Default)]
pub struct CreateNoteRequest {
    pub title: Option<String>,
    pub content: Option<String>,
}

/// Patch applied by a version-checked update.
///
/// Only fields that are `Some` are written; absent fields keep their stored
/// value. The expected version travels alongside the patch, not inside it.
#[derive(Debug, Clone, Default)]
pub struct UpdateNoteRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub archived: Option<bool>,
}

impl UpdateNoteRequest {
    /// True when the patch carries no fields at all.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.archived.is_none()
    }
}

// =============================================================================
// USER TYPES
// =============================================================================

/// A registered user account.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    /// Argon2id hash in PHC string format. Never serialized.
    pub password_hash: String,
    pub created_at_utc: DateTime<Utc>,
}

/// Public view of a user, safe to return over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub created_at_utc: DateTime<Utc>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            created_at_utc: user.created_at_utc,
        }
    }
}
