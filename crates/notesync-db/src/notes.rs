//! Note repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use notesync_core::{
    new_v7, CreateNoteRequest, Error, Note, NoteRepository, Result, UpdateNoteRequest,
};

/// Columns selected for every note query, in [`map_row_to_note`] order.
const NOTE_COLUMNS: &str =
    "id, owner_id, title, content, version, archived, created_at_utc, updated_at_utc";

/// PostgreSQL implementation of NoteRepository.
///
/// The version check on `update` is a single conditional UPDATE statement
/// (`... WHERE id = $ AND owner_id = $ AND version = $`), so two concurrent
/// updates carrying the same starting version can never both pass: the row
/// lock taken by the first statement forces the second to re-evaluate the
/// predicate against the incremented version.
pub struct PgNoteRepository {
    pool: Pool<Postgres>,
}

impl PgNoteRepository {
    /// Create a new PgNoteRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

/// Map a database row to a Note.
fn map_row_to_note(row: PgRow) -> Note {
    Note {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        content: row.get("content"),
        version: row.get("version"),
        archived: row.get("archived"),
        created_at_utc: row.get("created_at_utc"),
        updated_at_utc: row.get("updated_at_utc"),
    }
}

#[async_trait]
impl NoteRepository for PgNoteRepository {
    async fn insert(&self, owner_id: Uuid, req: CreateNoteRequest) -> Result<Note> {
        let now = Utc::now();
        let id = new_v7();

        let row = sqlx::query(&format!(
            "INSERT INTO note (id, owner_id, title, content, version, archived, created_at_utc, updated_at_utc)
             VALUES ($1, $2, $3, $4, 1, FALSE, $5, $5)
             RETURNING {NOTE_COLUMNS}"
        ))
        .bind(id)
        .bind(owner_id)
        .bind(&req.title)
        .bind(&req.content)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(map_row_to_note(row))
    }

    async fn fetch(&self, id: Uuid, owner_id: Uuid) -> Result<Note> {
        // Foreign ownership and non-existence intentionally share one error.
        let row = sqlx::query(&format!(
            "SELECT {NOTE_COLUMNS} FROM note WHERE id = $1 AND owner_id = $2"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(map_row_to_note).ok_or(Error::NoteNotFound(id))
    }

    async fn list(&self, owner_id: Uuid) -> Result<Vec<Note>> {
        // Ids are UUIDv7, so the secondary sort key is insertion order.
        let rows = sqlx::query(&format!(
            "SELECT {NOTE_COLUMNS} FROM note
             WHERE owner_id = $1 AND archived = FALSE
             ORDER BY updated_at_utc DESC, id"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(map_row_to_note).collect())
    }

    async fn update(
        &self,
        id: Uuid,
        owner_id: Uuid,
        expected_version: i32,
        patch: UpdateNoteRequest,
    ) -> Result<Note> {
        let now = Utc::now();

        let mut updates: Vec<String> = vec![
            "version = version + 1".to_string(),
            "updated_at_utc = $1".to_string(),
        ];
        // $1 = now, $2 = id, $3 = owner, $4 = expected version; patch fields follow
        let mut param_idx = 5;

        if patch.title.is_some() {
            updates.push(format!("title = ${}", param_idx));
            param_idx += 1;
        }
        if patch.content.is_some() {
            updates.push(format!("content = ${}", param_idx));
            param_idx += 1;
        }
        if patch.archived.is_some() {
            updates.push(format!("archived = ${}", param_idx));
        }

        let query = format!(
            "UPDATE note SET {} WHERE id = $2 AND owner_id = $3 AND version = $4
             RETURNING {NOTE_COLUMNS}",
            updates.join(", ")
        );

        let mut q = sqlx::query(&query)
            .bind(now)
            .bind(id)
            .bind(owner_id)
            .bind(expected_version);
        if let Some(title) = &patch.title {
            q = q.bind(title);
        }
        if let Some(content) = &patch.content {
            q = q.bind(content);
        }
        if let Some(archived) = patch.archived {
            q = q.bind(archived);
        }

        match q.fetch_optional(&self.pool).await.map_err(Error::Database)? {
            Some(row) => Ok(map_row_to_note(row)),
            None => {
                // The conditional write above is the only mutation; this read
                // merely classifies the zero-row outcome for the caller.
                let current: Option<i32> = sqlx::query_scalar(
                    "SELECT version FROM note WHERE id = $1 AND owner_id = $2",
                )
                .bind(id)
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;

                match current {
                    Some(actual) => {
                        debug!(
                            subsystem = "database",
                            component = "notes",
                            op = "update",
                            note_id = %id,
                            expected_version,
                            actual_version = actual,
                            "Version conflict"
                        );
                        Err(Error::Conflict(format!(
                            "expected version {}, found {}",
                            expected_version, actual
                        )))
                    }
                    None => Err(Error::NoteNotFound(id)),
                }
            }
        }
    }

    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM note WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NoteNotFound(id));
        }
        Ok(())
    }
}
