//! PostgreSQL integration tests for the note repository.
//!
//! These exercise the single-statement conditional UPDATE against a real
//! database. They require a migrated instance (see `migrations/`), reachable
//! via `DATABASE_URL` or the default test URL.

use std::sync::Arc;

use notesync_core::{CreateNoteRequest, Error, NoteRepository, UpdateNoteRequest, UserRepository};
use notesync_db::test_fixtures::DEFAULT_TEST_DATABASE_URL;
use notesync_db::{create_pool, PgNoteRepository, PgUserRepository};
use sqlx::PgPool;
use uuid::Uuid;

async fn setup_test_pool() -> PgPool {
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_TEST_DATABASE_URL.to_string());
    create_pool(&database_url)
        .await
        .expect("Failed to create test pool")
}

/// Notes reference app_user, so each test registers a throwaway owner.
async fn create_test_owner(pool: &PgPool) -> Uuid {
    let users = PgUserRepository::new(pool.clone());
    let email = format!("occ-test-{}@example.com", Uuid::new_v4());
    users
        .insert(&email, "$argon2id$test$hash")
        .await
        .expect("Failed to create test user")
        .id
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_pg_round_trip() {
    let pool = setup_test_pool().await;
    let owner = create_test_owner(&pool).await;
    let repo = PgNoteRepository::new(pool);

    let note = repo
        .insert(
            owner,
            CreateNoteRequest {
                title: Some("a".to_string()),
                content: Some("b".to_string()),
            },
        )
        .await
        .expect("Failed to insert note");

    assert_eq!(note.version, 1);
    assert!(!note.archived);

    let fetched = repo.fetch(note.id, owner).await.expect("Failed to fetch");
    assert_eq!(fetched.title, note.title);
    assert_eq!(fetched.content, note.content);
    assert_eq!(fetched.version, 1);

    repo.delete(note.id, owner).await.expect("Failed to delete");
    assert!(matches!(
        repo.fetch(note.id, owner).await,
        Err(Error::NoteNotFound(_))
    ));
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_pg_stale_version_conflicts() {
    let pool = setup_test_pool().await;
    let owner = create_test_owner(&pool).await;
    let repo = PgNoteRepository::new(pool);

    let note = repo
        .insert(owner, CreateNoteRequest::default())
        .await
        .expect("Failed to insert note");

    let patch = UpdateNoteRequest {
        title: Some("updated".to_string()),
        ..Default::default()
    };
    let updated = repo
        .update(note.id, owner, 1, patch.clone())
        .await
        .expect("First update should succeed");
    assert_eq!(updated.version, 2);

    let err = repo.update(note.id, owner, 1, patch).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let current = repo.fetch(note.id, owner).await.unwrap();
    assert_eq!(current.version, 2);
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_pg_concurrent_updates_single_winner() {
    let pool = setup_test_pool().await;
    let owner = create_test_owner(&pool).await;
    let repo = Arc::new(PgNoteRepository::new(pool));

    let note = repo
        .insert(owner, CreateNoteRequest::default())
        .await
        .expect("Failed to insert note");
    let note_id = note.id;

    let mut handles = Vec::new();
    for i in 0..8 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.update(
                note_id,
                owner,
                1,
                UpdateNoteRequest {
                    title: Some(format!("writer-{}", i)),
                    ..Default::default()
                },
            )
            .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(updated) => {
                accepted += 1;
                assert_eq!(updated.version, 2);
            }
            Err(Error::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(accepted, 1);
    let current = repo.fetch(note_id, owner).await.unwrap();
    assert_eq!(current.version, 2);
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_pg_ownership_isolation() {
    let pool = setup_test_pool().await;
    let alice = create_test_owner(&pool).await;
    let bob = create_test_owner(&pool).await;
    let repo = PgNoteRepository::new(pool);

    let note = repo
        .insert(alice, CreateNoteRequest::default())
        .await
        .expect("Failed to insert note");

    assert!(matches!(
        repo.fetch(note.id, bob).await,
        Err(Error::NoteNotFound(_))
    ));
    assert!(matches!(
        repo.delete(note.id, bob).await,
        Err(Error::NoteNotFound(_))
    ));
    assert!(repo.fetch(note.id, alice).await.is_ok());
}
