//! Core traits for notesync abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{CreateNoteRequest, Note, UpdateNoteRequest, User};

// =============================================================================
// NOTE REPOSITORY
// =============================================================================

/// Repository for versioned, owner-scoped note records.
///
/// Every operation except `insert` filters by `owner_id`; a note that exists
/// but belongs to someone else is indistinguishable from a missing one
/// ([`crate::Error::NoteNotFound`] in both cases).
///
/// `update` is a compare-and-swap on the version token: implementations must
/// apply the version check and the increment as one atomic operation against
/// the store, never as a read-then-compare-then-write sequence.
#[async_trait]
pub trait NoteRepository: Send + Sync {
    /// Insert a new note at version 1.
    async fn insert(&self, owner_id: Uuid, req: CreateNoteRequest) -> Result<Note>;

    /// Fetch a note by id, scoped to its owner.
    async fn fetch(&self, id: Uuid, owner_id: Uuid) -> Result<Note>;

    /// List the owner's non-archived notes, most recently updated first.
    /// Equal timestamps come back in insertion order.
    async fn list(&self, owner_id: Uuid) -> Result<Vec<Note>>;

    /// Apply `patch` if the stored version equals `expected_version`,
    /// incrementing the version by 1 and refreshing `updated_at_utc`.
    ///
    /// Returns [`crate::Error::Conflict`] on a stale version and
    /// [`crate::Error::NoteNotFound`] when the note is missing or foreign.
    async fn update(
        &self,
        id: Uuid,
        owner_id: Uuid,
        expected_version: i32,
        patch: UpdateNoteRequest,
    ) -> Result<Note>;

    /// Permanently remove a note. Terminal; there is no undo.
    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<()>;
}

// =============================================================================
// USER REPOSITORY
// =============================================================================

/// Repository for user accounts.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user. Fails on a duplicate email.
    async fn insert(&self, email: &str, password_hash: &str) -> Result<User>;

    /// Fetch a user by id.
    async fn fetch(&self, id: Uuid) -> Result<User>;

    /// Look up a user by email, if one exists.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
}
