//! UUID v7 utilities for time-ordered identifiers.
//!
//! Note ids are UUIDv7, which embed a millisecond Unix timestamp in the
//! first 48 bits. Ids therefore sort in insertion order, which the list
//! query relies on as its tie-breaker for equal `updated_at_utc` values.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Check whether a UUID is version 7.
pub fn is_v7(id: &Uuid) -> bool {
    id.get_version_num() == 7
}
