//! # notesync-db
//!
//! PostgreSQL database layer for notesync.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for notes and user accounts
//! - Optimistic concurrency control on note updates (version CAS in SQL)
//!
//! ## Example
//!
//! ```rust,ignore
//! use notesync_db::Database;
//! use notesync_core::{CreateNoteRequest, NoteRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/notesync").await?;
//!
//!     let note = db.notes.insert(owner_id, CreateNoteRequest {
//!         title: Some("Hello".to_string()),
//!         content: Some("world".to_string()),
//!     }).await?;
//!
//!     println!("Created note {} at version {}", note.id, note.version);
//!     Ok(())
//! }
//! ```

pub mod notes;
pub mod pool;
pub mod users;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use the
// in-memory repository and DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use notesync_core::*;

// Re-export repository implementations
pub use notes::PgNoteRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use users::PgUserRepository;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Note repository (the versioned record store).
    pub notes: PgNoteRepository,
    /// User account repository.
    pub users: PgUserRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            notes: PgNoteRepository::new(pool.clone()),
            users: PgUserRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            notes: PgNoteRepository::new(self.pool.clone()),
            users: PgUserRepository::new(self.pool.clone()),
        }
    }
}
