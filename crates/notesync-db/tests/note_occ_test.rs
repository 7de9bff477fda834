//! Optimistic concurrency control properties of the note repository.
//!
//! These tests run against the in-memory repository, which shares the CAS
//! update semantics of the PostgreSQL implementation: the version check and
//! the increment are atomic, so a stale token can never overwrite a newer
//! write. The same properties are asserted against a live database in
//! `note_pg_integration_test.rs`.

use std::sync::Arc;

use notesync_core::{CreateNoteRequest, Error, NoteRepository, UpdateNoteRequest};
use notesync_db::test_fixtures::MemoryNoteRepository;
use uuid::Uuid;

fn title_patch(title: &str) -> UpdateNoteRequest {
    UpdateNoteRequest {
        title: Some(title.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_starts_at_version_one() {
    let repo = MemoryNoteRepository::new();
    let owner = Uuid::new_v4();

    let note = repo
        .insert(
            owner,
            CreateNoteRequest {
                title: Some("a".to_string()),
                content: Some("b".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(note.version, 1);
    assert!(!note.archived);

    let fetched = repo.fetch(note.id, owner).await.unwrap();
    assert_eq!(fetched.title.as_deref(), Some("a"));
    assert_eq!(fetched.content.as_deref(), Some("b"));
    assert_eq!(fetched.version, 1);
}

#[tokio::test]
async fn test_update_increments_version_and_stale_retry_conflicts() {
    let repo = MemoryNoteRepository::new();
    let owner = Uuid::new_v4();
    let note = repo.insert(owner, CreateNoteRequest::default()).await.unwrap();

    let updated = repo
        .update(note.id, owner, 1, title_patch("first"))
        .await
        .unwrap();
    assert_eq!(updated.version, 2);

    // Replaying the same call with the stale token must conflict and leave
    // the stored version untouched.
    let err = repo
        .update(note.id, owner, 1, title_patch("replay"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let current = repo.fetch(note.id, owner).await.unwrap();
    assert_eq!(current.version, 2);
    assert_eq!(current.title.as_deref(), Some("first"));
}

#[tokio::test]
async fn test_concurrent_updates_exactly_one_winner() {
    let repo = Arc::new(MemoryNoteRepository::new());
    let owner = Uuid::new_v4();
    let note = repo.insert(owner, CreateNoteRequest::default()).await.unwrap();
    let note_id = note.id;

    let mut handles = Vec::new();
    for i in 0..8 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.update(note_id, owner, 1, title_patch(&format!("writer-{}", i)))
                .await
        }));
    }

    let mut accepted = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(updated) => {
                accepted += 1;
                assert_eq!(updated.version, 2);
            }
            Err(Error::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(accepted, 1, "exactly one update per starting version wins");
    assert_eq!(conflicts, 7);

    let current = repo.fetch(note_id, owner).await.unwrap();
    assert_eq!(current.version, 2);
}

#[tokio::test]
async fn test_version_equals_one_plus_accepted_updates() {
    let repo = Arc::new(MemoryNoteRepository::new());
    let owner = Uuid::new_v4();
    let note = repo.insert(owner, CreateNoteRequest::default()).await.unwrap();
    let note_id = note.id;

    // Several rounds of racing writers, each carrying the version observed
    // immediately before issuing. One winner per round, no lost updates.
    let mut accepted_total = 0;
    for round in 0..5 {
        let observed = repo.fetch(note_id, owner).await.unwrap().version;

        let mut handles = Vec::new();
        for i in 0..4 {
            let repo = repo.clone();
            let patch = title_patch(&format!("round-{}-writer-{}", round, i));
            handles.push(tokio::spawn(async move {
                repo.update(note_id, owner, observed, patch).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        accepted_total += winners;
    }

    let current = repo.fetch(note_id, owner).await.unwrap();
    assert_eq!(current.version, 1 + accepted_total);
}

#[tokio::test]
async fn test_ownership_is_never_distinguished_from_absence() {
    let repo = MemoryNoteRepository::new();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let note = repo.insert(alice, CreateNoteRequest::default()).await.unwrap();

    let fetch_err = repo.fetch(note.id, bob).await.unwrap_err();
    assert!(matches!(fetch_err, Error::NoteNotFound(_)));

    let update_err = repo
        .update(note.id, bob, 1, title_patch("stolen"))
        .await
        .unwrap_err();
    assert!(matches!(update_err, Error::NoteNotFound(_)));

    let delete_err = repo.delete(note.id, bob).await.unwrap_err();
    assert!(matches!(delete_err, Error::NoteNotFound(_)));

    // Alice is unaffected throughout.
    let still_there = repo.fetch(note.id, alice).await.unwrap();
    assert_eq!(still_there.version, 1);
}

#[tokio::test]
async fn test_delete_is_terminal() {
    let repo = MemoryNoteRepository::new();
    let owner = Uuid::new_v4();
    let note = repo.insert(owner, CreateNoteRequest::default()).await.unwrap();

    repo.delete(note.id, owner).await.unwrap();

    let err = repo.fetch(note.id, owner).await.unwrap_err();
    assert!(matches!(err, Error::NoteNotFound(_)));

    let err = repo.delete(note.id, owner).await.unwrap_err();
    assert!(matches!(err, Error::NoteNotFound(_)));
}

#[tokio::test]
async fn test_list_excludes_archived_and_orders_by_update() {
    let repo = MemoryNoteRepository::new();
    let owner = Uuid::new_v4();

    let first = repo
        .insert(
            owner,
            CreateNoteRequest {
                title: Some("first".to_string()),
                content: None,
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = repo
        .insert(
            owner,
            CreateNoteRequest {
                title: Some("second".to_string()),
                content: None,
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let third = repo
        .insert(
            owner,
            CreateNoteRequest {
                title: Some("third".to_string()),
                content: None,
            },
        )
        .await
        .unwrap();

    // Touch the oldest note so it jumps to the front.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    repo.update(first.id, owner, 1, title_patch("first-touched"))
        .await
        .unwrap();

    // Archive one; it must vanish from list but stay fetchable.
    repo.update(
        second.id,
        owner,
        1,
        UpdateNoteRequest {
            archived: Some(true),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let listed = repo.list(owner).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![first.id, third.id]);

    let archived = repo.fetch(second.id, owner).await.unwrap();
    assert!(archived.archived);

    // Archived notes remain updatable by id.
    let unarchived = repo
        .update(
            second.id,
            owner,
            2,
            UpdateNoteRequest {
                archived: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(unarchived.version, 3);
    assert_eq!(repo.list(owner).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_list_is_owner_scoped() {
    let repo = MemoryNoteRepository::new();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    repo.insert(alice, CreateNoteRequest::default()).await.unwrap();
    repo.insert(alice, CreateNoteRequest::default()).await.unwrap();
    repo.insert(bob, CreateNoteRequest::default()).await.unwrap();

    assert_eq!(repo.list(alice).await.unwrap().len(), 2);
    assert_eq!(repo.list(bob).await.unwrap().len(), 1);
    assert_eq!(repo.list(Uuid::new_v4()).await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_patch_applies_only_present_fields() {
    let repo = MemoryNoteRepository::new();
    let owner = Uuid::new_v4();
    let note = repo
        .insert(
            owner,
            CreateNoteRequest {
                title: Some("keep me".to_string()),
                content: Some("original".to_string()),
            },
        )
        .await
        .unwrap();

    let updated = repo
        .update(
            note.id,
            owner,
            1,
            UpdateNoteRequest {
                content: Some("changed".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.title.as_deref(), Some("keep me"));
    assert_eq!(updated.content.as_deref(), Some("changed"));
    assert_eq!(updated.version, 2);
    assert!(updated.updated_at_utc >= note.updated_at_utc);
}
