mod common;

use common::{seed, test_store, TestStore};
use interfaces::{BlobStore, MemoryBlobStore, PublicationState};
use publication_pipeline::{CursorError, PublicationCursor, PublicationUpdate};
use tracing::info;
use uuid::Uuid;

fn draft_cursor(fixture: &TestStore) -> PublicationCursor {
    PublicationCursor::new(fixture.store.clone(), PublicationState::Draft)
}

async fn titles_from_next(cursor: &mut PublicationCursor, calls: usize) -> Vec<String> {
    let mut titles = Vec::new();
    for _ in 0..calls {
        titles.push(cursor.next().await.unwrap().title);
    }
    titles
}

#[tokio::test]
async fn test_next_wraps_around() {
    let fixture = test_store().await;
    seed(&fixture, &["a", "b", "c", "d"]).await;

    let mut cursor = draft_cursor(&fixture);
    assert_eq!(cursor.refresh().await.unwrap(), 4);

    let titles = titles_from_next(&mut cursor, 5).await;
    info!("Cursor visited {:?}", titles);
    assert_eq!(titles, vec!["a", "b", "c", "d", "a"]);
    assert_eq!(cursor.position(), 0);
}

#[tokio::test]
async fn test_previous_wraps_backwards() {
    let fixture = test_store().await;
    seed(&fixture, &["a", "b", "c"]).await;

    let mut cursor = draft_cursor(&fixture);
    cursor.refresh().await.unwrap();

    assert_eq!(cursor.previous().await.unwrap().title, "a");
    assert_eq!(cursor.previous().await.unwrap().title, "c");
    assert_eq!(cursor.previous().await.unwrap().title, "b");
    assert_eq!(cursor.next().await.unwrap().title, "c");
}

#[tokio::test]
async fn test_single_publication_is_exhausted_after_one_visit() {
    let fixture = test_store().await;
    seed(&fixture, &["only"]).await;

    let mut cursor = draft_cursor(&fixture);
    cursor.refresh().await.unwrap();

    assert_eq!(cursor.next().await.unwrap().title, "only");
    let again = cursor.next().await;
    assert!(matches!(again, Err(CursorError::Exhausted)));
    assert!(matches!(cursor.previous().await, Err(CursorError::Exhausted)));

    // Still selected, so it can be read and edited.
    assert_eq!(cursor.current().await.unwrap().title, "only");
    cursor.refresh().await.unwrap();
    assert_eq!(cursor.next().await.unwrap().title, "only");
}

#[tokio::test]
async fn test_empty_state() {
    let fixture = test_store().await;
    seed(&fixture, &["draft"]).await;

    let mut cursor = PublicationCursor::new(fixture.store.clone(), PublicationState::PendingApproval);
    assert_eq!(cursor.refresh().await.unwrap(), 0);
    assert!(cursor.is_empty().await.unwrap());

    let next = cursor.next().await;
    assert!(matches!(next, Err(CursorError::Empty { state: PublicationState::PendingApproval })));
    assert!(next.unwrap_err().is_empty());
    assert!(matches!(cursor.current().await, Err(CursorError::Empty { .. })));
    assert!(matches!(cursor.update_title("x").await, Err(CursorError::NothingSelected)));
}

#[tokio::test]
async fn test_center_on_then_navigate() {
    let fixture = test_store().await;
    let ids = seed(&fixture, &["a", "b", "c", "d"]).await;

    let mut cursor = draft_cursor(&fixture);
    assert_eq!(cursor.center_on(ids[2]).await.unwrap(), 2);
    assert_eq!(cursor.current_id(), Some(ids[2]));
    assert_eq!(cursor.current().await.unwrap().title, "c");
    assert_eq!(cursor.next().await.unwrap().title, "d");

    assert_eq!(cursor.select(1).await.unwrap().title, "b");
    assert_eq!(cursor.next().await.unwrap().title, "c");
}

#[tokio::test]
async fn test_center_on_then_select_returns_same_publication() {
    let fixture = test_store().await;
    let ids = seed(&fixture, &["a", "b", "c", "d", "e"]).await;

    let mut cursor = draft_cursor(&fixture);
    for id in &ids {
        let position = cursor.center_on(*id).await.unwrap();
        assert_eq!(cursor.select(position).await.unwrap().id, *id);
    }

    // Someone else removes "c"; centering on it again fails cleanly.
    assert!(fixture.store.delete(ids[2]).await.unwrap());
    let result = cursor.center_on(ids[2]).await;
    assert!(result.as_ref().is_err_and(|e| e.is_stale()));
    assert_eq!(cursor.next().await.unwrap().id, ids[0]);
}

#[tokio::test]
async fn test_center_on_unknown_id_is_stale() {
    let fixture = test_store().await;
    seed(&fixture, &["a", "b"]).await;

    let mut cursor = draft_cursor(&fixture);
    cursor.select(1).await.unwrap();

    let missing = Uuid::new_v4();
    let result = cursor.center_on(missing).await;
    assert!(matches!(result, Err(CursorError::Stale { id }) if id == missing));
    assert_eq!(cursor.position(), 0);
    assert_eq!(cursor.current_id(), None);
    assert_eq!(cursor.next().await.unwrap().title, "a");
}

#[tokio::test]
async fn test_select_out_of_bounds_keeps_position() {
    let fixture = test_store().await;
    seed(&fixture, &["a", "b", "c", "d"]).await;

    let mut cursor = draft_cursor(&fixture);
    cursor.select(1).await.unwrap();

    let result = cursor.select(9).await;
    assert!(matches!(result, Err(CursorError::OutOfBounds { index: 9, len: 4 })));
    assert_eq!(cursor.position(), 1);
    assert_eq!(cursor.current().await.unwrap().title, "b");
}

#[tokio::test]
async fn test_list_does_not_move_cursor() {
    let fixture = test_store().await;
    seed(&fixture, &["a", "b", "c", "d"]).await;

    let mut cursor = draft_cursor(&fixture);
    titles_from_next(&mut cursor, 2).await;

    let listing = cursor.list().await.unwrap();
    let numbered: Vec<(usize, String)> = listing.into_iter().map(|(index, p)| (index, p.title)).collect();
    assert_eq!(
        numbered,
        vec![(0, "a".to_string()), (1, "b".to_string()), (2, "c".to_string()), (3, "d".to_string())]
    );
    assert_eq!(cursor.position(), 1);
    assert_eq!(cursor.next().await.unwrap().title, "c");
}

#[tokio::test]
async fn test_edits_follow_the_remembered_publication() {
    let fixture = test_store().await;
    let ids = seed(&fixture, &["a", "b", "c"]).await;

    let mut cursor = draft_cursor(&fixture);
    titles_from_next(&mut cursor, 2).await;
    assert_eq!(cursor.current_id(), Some(ids[1]));

    // Another actor moves "a" on, shifting every offset down by one.
    fixture.store.update_fields(ids[0], PublicationUpdate::state(PublicationState::PendingApproval)).await.unwrap();

    cursor.update_title("b, edited").await.unwrap();
    assert_eq!(cursor.get(ids[1]).await.unwrap().title, "b, edited");
    assert_eq!(cursor.get(ids[2]).await.unwrap().title, "c");
    assert_eq!(cursor.get(ids[0]).await.unwrap().title, "a");

    assert_eq!(cursor.next().await.unwrap().title, "c");
}

#[tokio::test]
async fn test_removed_current_moves_to_successor() {
    let fixture = test_store().await;
    let ids = seed(&fixture, &["a", "b", "c", "d"]).await;

    let mut cursor = draft_cursor(&fixture);
    titles_from_next(&mut cursor, 2).await;

    fixture.store.update_fields(ids[1], PublicationUpdate::state(PublicationState::PendingApproval)).await.unwrap();
    assert!(matches!(cursor.update_content("late edit").await, Err(CursorError::Stale { id }) if id == ids[1]));
    assert_eq!(cursor.get_content(ids[1]).await.unwrap(), None);

    assert_eq!(cursor.next().await.unwrap().title, "c");
    assert_eq!(cursor.next().await.unwrap().title, "d");
    assert_eq!(cursor.next().await.unwrap().title, "a");
}

#[tokio::test]
async fn test_removed_last_publication_wraps_to_first() {
    let fixture = test_store().await;
    let ids = seed(&fixture, &["a", "b", "c"]).await;

    let mut cursor = draft_cursor(&fixture);
    titles_from_next(&mut cursor, 3).await;
    fixture.store.delete(ids[2]).await.unwrap();

    assert_eq!(cursor.next().await.unwrap().title, "a");
}

#[tokio::test]
async fn test_state_change_and_remove_through_cursor() {
    let fixture = test_store().await;
    let ids = seed(&fixture, &["a", "b"]).await;

    let mut cursor = draft_cursor(&fixture);
    cursor.next().await.unwrap();
    cursor.update_content("Post about a").await.unwrap();
    cursor.update_state(PublicationState::PendingApproval).await.unwrap();

    let moved = cursor.get(ids[0]).await.unwrap();
    assert_eq!(moved.state, PublicationState::PendingApproval);
    assert_eq!(moved.content.as_deref(), Some("Post about a"));
    assert_eq!(cursor.len().await.unwrap(), 1);

    assert_eq!(cursor.next().await.unwrap().title, "b");
    cursor.remove().await.unwrap();
    assert!(matches!(cursor.get(ids[1]).await, Err(CursorError::Stale { .. })));
    assert!(cursor.is_empty().await.unwrap());
}

#[tokio::test]
async fn test_attach_image_from_blob_store() {
    let fixture = test_store().await;
    let ids = seed(&fixture, &["a"]).await;
    let blobs = MemoryBlobStore::default();
    blobs.put("covers/a.png", &[1, 2, 3]).await.unwrap();

    let mut cursor = draft_cursor(&fixture);
    cursor.center_on(ids[0]).await.unwrap();
    cursor.attach_image(&blobs, "covers/a.png").await.unwrap();
    assert_eq!(cursor.get_image(ids[0]).await.unwrap(), Some(vec![1, 2, 3]));

    let missing = cursor.attach_image(&blobs, "covers/missing.png").await;
    assert!(matches!(missing, Err(CursorError::Store(_))));

    cursor.update_image(None).await.unwrap();
    assert_eq!(cursor.get_image(ids[0]).await.unwrap(), None);
}
