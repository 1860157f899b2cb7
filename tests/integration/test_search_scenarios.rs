//! End-to-end search behaviour over the local backend.

use ragstore::vector::{LocalVectorStore, VectorBackend, VectorError};
use ragstore::{Metadata, MetadataFilter, SearchOptions, VectorId, VectorRecord};

use crate::common::TestStore;

fn cat(value: &str) -> Metadata {
    Metadata::default().with_extra("cat", value)
}

#[tokio::test]
async fn test_three_vector_scenario() {
    let store = LocalVectorStore::new();
    let a = store.insert(vec![1.0, 0.0], cat("a")).unwrap();
    let _b = store.insert(vec![0.0, 1.0], cat("b")).unwrap();
    let c = store.insert(vec![0.9, 0.1], cat("a")).unwrap();

    let backend: &dyn VectorBackend = &store;
    let hits = backend
        .search(&[1.0, 0.0], 2, &MetadataFilter::new())
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, a);
    assert!((hits[0].score.get() - 1.0).abs() < 1e-6);
    assert_eq!(hits[1].id, c);
    assert!((hits[1].score.get() - 0.9939).abs() < 1e-3);
}

#[tokio::test]
async fn test_filter_restricts_candidates() {
    let store = LocalVectorStore::new();
    store.insert(vec![1.0, 0.0], cat("a")).unwrap();
    let b = store.insert(vec![0.0, 1.0], cat("b")).unwrap();

    let filter = MetadataFilter::new().with("cat", "b");
    let hits = store.search(&[1.0, 0.0], 5, &filter).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, b);
    assert_eq!(hits[0].score.get(), 0.0);
}

#[tokio::test]
async fn test_dimension_invariant_through_service() {
    let test = TestStore::new();
    let store = test.open();

    store
        .upsert(VectorRecord {
            id: VectorId::new("first"),
            vector: vec![0.5, 0.5, 0.5],
            metadata: Metadata::default(),
        })
        .await
        .unwrap();

    // Local embeddings are 300-dimensional and no longer fit
    let err = store
        .embed("does not fit", Metadata::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), "DIMENSION_MISMATCH");
    assert_eq!(store.stats().await.unwrap().total_vectors, 1);

    let mismatched = store
        .search_vector(&[1.0, 0.0], 1, &MetadataFilter::new())
        .await;
    assert!(matches!(
        mismatched,
        Err(ragstore::RagError::Vector(VectorError::DimensionMismatch { .. }))
    ));
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_self_similarity_and_rank_order() {
    let test = TestStore::new();
    let store = test.open();

    let texts = [
        "vector databases store embeddings",
        "clustering groups similar vectors",
        "bread needs flour water and salt",
        "search ranks documents by similarity",
    ];
    let mut records = Vec::new();
    for text in texts {
        records.push(store.embed(text, Metadata::default()).await.unwrap());
    }

    let target = &records[1];
    let hits = store
        .search_vector(&target.vector, texts.len(), &MetadataFilter::new())
        .await
        .unwrap();
    assert_eq!(hits[0].id, target.id);
    assert!((hits[0].score.get() - 1.0).abs() < 1e-6);
    for pair in hits.windows(2) {
        assert!(pair[0].score.get() >= pair[1].score.get());
    }

    let results = store
        .search("similar vectors", 3, &MetadataFilter::new(), SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_rerank_toggle_changes_only_order() {
    let test = TestStore::new();
    let store = test.open();
    for text in [
        "rust memory safety",
        "memory allocation strategies",
        "garbage collection pauses",
    ] {
        store.embed(text, Metadata::default()).await.unwrap();
    }

    let filter = MetadataFilter::new();
    let plain = store
        .search(
            "memory safety",
            3,
            &filter,
            SearchOptions {
                rerank: false,
                skip_cache: false,
            },
        )
        .await
        .unwrap();
    let reranked = store
        .search("memory safety", 3, &filter, SearchOptions::default())
        .await
        .unwrap();

    let mut plain_ids: Vec<_> = plain.iter().map(|r| r.id.clone()).collect();
    let mut reranked_ids: Vec<_> = reranked.iter().map(|r| r.id.clone()).collect();
    assert!(plain.iter().all(|r| r.lexical_score.is_none()));
    assert!(reranked.iter().all(|r| r.lexical_score.is_some()));
    plain_ids.sort();
    reranked_ids.sort();
    assert_eq!(plain_ids, reranked_ids);
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_skip_cache_recomputes() {
    let test = TestStore::new();
    let store = test.open();
    store.embed("cached text", Metadata::default()).await.unwrap();

    let filter = MetadataFilter::new();
    let options = SearchOptions::default();
    store.search("cached", 1, &filter, options).await.unwrap();
    store.search("cached", 1, &filter, options).await.unwrap();
    assert_eq!(store.cache_stats().search.hits, 1);

    let skip = SearchOptions {
        skip_cache: true,
        ..options
    };
    store.search("cached", 1, &filter, skip).await.unwrap();
    assert_eq!(store.cache_stats().search.hits, 1);
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_filter_is_rejected() {
    let test = TestStore::new();
    let store = test.open();
    let filter = MetadataFilter::new().with("nested", serde_json::json!({ "a": 1 }));

    let err = store
        .search("anything", 3, &filter, SearchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), "INVALID_FILTER");
    store.close().await.unwrap();
}
