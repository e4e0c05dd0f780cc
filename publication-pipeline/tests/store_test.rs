mod common;

use std::sync::Arc;

use common::{new_publication, seed, start_time, test_store};
use interfaces::PublicationState;
use publication_pipeline::{NewPublication, PipelineError, PublicationUpdate};
use tracing::info;
use uuid::Uuid;

#[tokio::test]
async fn test_insert_always_starts_in_draft() {
    let fixture = test_store().await;

    let mut publication = new_publication("Rust 2024 edition is out");
    publication.content = Some("Already drafted".to_string());
    let id = fixture.store.insert(publication).await.unwrap();

    let stored = fixture.store.find_by_id(id).await.unwrap().unwrap();
    info!("Stored publication {} in state {}", stored.id, stored.state);
    assert_eq!(stored.state, PublicationState::Draft);
    assert_eq!(stored.title, "Rust 2024 edition is out");
    assert_eq!(stored.content.as_deref(), Some("Already drafted"));
    assert_eq!(stored.material, "Material body for Rust 2024 edition is out");
    assert_eq!(stored.information_source, "test-source");
    assert_eq!(stored.creation_date, start_time());
    assert_eq!(stored.last_updated, start_time());
}

#[tokio::test]
async fn test_find_by_state_orders_by_creation_date() {
    let fixture = test_store().await;
    let ids = seed(&fixture, &["first", "second", "third"]).await;

    // Same timestamp as "third": insertion order breaks the tie.
    fixture.clock.advance(chrono::TimeDelta::minutes(-1));
    let fourth = fixture.store.insert(new_publication("fourth")).await.unwrap();

    let titles: Vec<String> = fixture
        .store
        .find_by_state(PublicationState::Draft)
        .await
        .unwrap()
        .into_iter()
        .map(|publication| publication.title)
        .collect();
    assert_eq!(titles, vec!["first", "second", "third", "fourth"]);

    let listed = fixture.store.ids_by_state(PublicationState::Draft).await.unwrap();
    assert_eq!(listed, vec![ids[0], ids[1], ids[2], fourth]);
    assert_eq!(fixture.store.count(PublicationState::Draft).await.unwrap(), 4);
    assert_eq!(fixture.store.count(PublicationState::Published).await.unwrap(), 0);
}

#[tokio::test]
async fn test_update_fields_moves_state_forward_only() {
    let fixture = test_store().await;
    let ids = seed(&fixture, &["story"]).await;
    let id = ids[0];

    let updated = fixture
        .store
        .update_fields(id, PublicationUpdate::content("A short post").expecting(PublicationState::Draft))
        .await
        .unwrap();
    assert!(updated);

    assert!(fixture.store.update_fields(id, PublicationUpdate::state(PublicationState::PendingApproval)).await.unwrap());
    let stored = fixture.store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.state, PublicationState::PendingApproval);
    assert_eq!(stored.content.as_deref(), Some("A short post"));
    assert!(stored.last_updated > stored.creation_date);

    assert!(fixture.store.update_fields(id, PublicationUpdate::state(PublicationState::Published)).await.unwrap());

    // Terminal states never move again.
    let discarded = fixture.store.update_fields(id, PublicationUpdate::state(PublicationState::Discarded)).await.unwrap();
    assert!(!discarded);
    let stored = fixture.store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.state, PublicationState::Published);

    let backwards = fixture.store.update_fields(id, PublicationUpdate::state(PublicationState::Draft)).await;
    assert!(matches!(backwards, Err(PipelineError::BackwardTransition { .. })));
}

#[tokio::test]
async fn test_update_fields_skips_rows_in_other_states() {
    let fixture = test_store().await;
    let ids = seed(&fixture, &["story"]).await;

    let updated = fixture
        .store
        .update_fields(ids[0], PublicationUpdate::title("Edited").expecting(PublicationState::PendingApproval))
        .await
        .unwrap();
    assert!(!updated);
    assert_eq!(fixture.store.find_by_id(ids[0]).await.unwrap().unwrap().title, "story");

    assert!(!fixture.store.update_fields(Uuid::new_v4(), PublicationUpdate::title("Nobody")).await.unwrap());
}

#[tokio::test]
async fn test_empty_update_is_rejected() {
    let fixture = test_store().await;
    let ids = seed(&fixture, &["story"]).await;

    let result = fixture.store.update_fields(ids[0], PublicationUpdate::default()).await;
    assert!(matches!(result, Err(PipelineError::EmptyUpdate { id }) if id == ids[0]));
}

#[tokio::test]
async fn test_image_can_be_set_and_cleared() {
    let fixture = test_store().await;
    let ids = seed(&fixture, &["story"]).await;

    fixture.store.update_fields(ids[0], PublicationUpdate::image(Some(vec![0x89, 0x50, 0x4e, 0x47]))).await.unwrap();
    assert_eq!(
        fixture.store.find_by_id(ids[0]).await.unwrap().unwrap().image,
        Some(vec![0x89, 0x50, 0x4e, 0x47])
    );

    fixture.store.update_fields(ids[0], PublicationUpdate::image(None)).await.unwrap();
    assert_eq!(fixture.store.find_by_id(ids[0]).await.unwrap().unwrap().image, None);
}

#[tokio::test]
async fn test_delete() {
    let fixture = test_store().await;
    let ids = seed(&fixture, &["keep", "drop"]).await;

    assert!(fixture.store.delete(ids[1]).await.unwrap());
    assert!(!fixture.store.delete(ids[1]).await.unwrap());
    assert!(fixture.store.find_by_id(ids[1]).await.unwrap().is_none());
    assert_eq!(fixture.store.ids_by_state(PublicationState::Draft).await.unwrap(), vec![ids[0]]);
}

#[tokio::test]
async fn test_concurrent_inserts_are_all_kept() {
    let fixture = test_store().await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = Arc::clone(&fixture.store);
        handles.push(tokio::spawn(async move {
            store.insert(NewPublication::from(common::material("parallel", &format!("item {}", i)))).await
        }));
    }
    for handle in handles {
        tokio_test::assert_ok!(handle.await.unwrap());
    }

    assert_eq!(fixture.store.count(PublicationState::Draft).await.unwrap(), 20);
}
