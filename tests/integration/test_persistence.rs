//! Snapshot persistence across store lifetimes.

use ragstore::{Metadata, MetadataFilter};

use crate::common::TestStore;

#[tokio::test]
async fn test_reopen_preserves_records_and_order() {
    let test = TestStore::new();

    let store = test.open();
    let mut ids = Vec::new();
    for text in ["alpha document", "beta document", "gamma document"] {
        ids.push(store.embed(text, Metadata::default()).await.unwrap().id);
    }
    store.close().await.unwrap();
    assert!(test.snapshot_path().exists());

    let reopened = test.open();
    let records = reopened
        .get_all_vectors(&MetadataFilter::new())
        .await
        .unwrap();
    let reloaded: Vec<_> = records.into_iter().map(|r| r.id).collect();
    assert_eq!(reloaded, ids);
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_snapshot_is_moved_aside() {
    let test = TestStore::new();
    std::fs::create_dir_all(test.path()).unwrap();
    std::fs::write(test.snapshot_path(), "{ not json").unwrap();

    let store = test.open();
    assert_eq!(store.stats().await.unwrap().total_vectors, 0);
    assert!(test.path().join("vectors.json.corrupt").exists());

    store.embed("fresh start", Metadata::default()).await.unwrap();
    store.close().await.unwrap();

    let reopened = test.open();
    assert_eq!(reopened.stats().await.unwrap().total_vectors, 1);
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_deletions_are_persisted() {
    let test = TestStore::new();
    let store = test.open();
    let keep = store.embed("keep me", Metadata::default()).await.unwrap();
    let drop = store.embed("drop me", Metadata::default()).await.unwrap();
    assert!(store.delete_vector(&drop.id).await.unwrap());
    store.close().await.unwrap();

    let reopened = test.open();
    assert!(reopened.get_vector(&keep.id).await.unwrap().is_some());
    assert!(reopened.get_vector(&drop.id).await.unwrap().is_none());
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_well_known_metadata_filters_same_before_and_after_reload() {
    let test = TestStore::new();
    let store = test.open();
    let doc = store
        .embed(
            "typed metadata",
            Metadata::default()
                .with_extra("type", "doc")
                .with_extra("source", "notes.md"),
        )
        .await
        .unwrap();
    store.embed("untyped metadata", Metadata::default()).await.unwrap();

    let filter = MetadataFilter::new().with("type", "doc").with("source", "notes.md");
    let before: Vec<_> = store
        .get_all_vectors(&filter)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(before, vec![doc.id.clone()]);
    store.close().await.unwrap();

    let reopened = test.open();
    let after: Vec<_> = reopened
        .get_all_vectors(&filter)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(after, before);
    reopened.close().await.unwrap();
}
