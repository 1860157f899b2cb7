//! Local embedding properties seen through the service.

use ragstore::embedding::{LocalEmbeddingGenerator, token_vector};
use ragstore::vector::VectorDimension;
use ragstore::{Metadata, MetadataFilter, SearchOptions};

use crate::common::TestStore;

#[test]
fn test_vocabulary_scenario() {
    let generator = LocalEmbeddingGenerator::new(VectorDimension::local());
    generator.update_vocabulary(&["cat dog", "cat bird"]);

    let first = generator.embed("cat");
    let second = generator.embed("cat");
    assert!(first.iter().any(|x| *x != 0.0));
    assert_eq!(first, second);
}

#[test]
fn test_same_token_same_vector_across_generators() {
    let a = LocalEmbeddingGenerator::new(VectorDimension::local());
    let b = LocalEmbeddingGenerator::new(VectorDimension::local());
    assert_eq!(a.embed("embedding"), b.embed("embedding"));

    // A single unseen token embeds along its own token vector
    let single = a.embed("Embedding!");
    let expected = token_vector("embedding", 300);
    for (x, y) in single.iter().zip(&expected) {
        assert!((x - y).abs() < 1e-5);
    }
}

#[tokio::test]
async fn test_update_vocabulary_resets_caches() {
    let test = TestStore::new();
    let store = test.open();
    store
        .embed("vectors and clusters", Metadata::default())
        .await
        .unwrap();
    store
        .search("vectors", 1, &MetadataFilter::new(), SearchOptions::default())
        .await
        .unwrap();
    assert!(store.cache_stats().embeddings.entries > 0);
    assert_eq!(store.cache_stats().search.entries, 1);

    store.update_vocabulary(&["vectors and clusters", "clusters of stars"]);
    let report = store.cache_stats();
    assert_eq!(report.embeddings.entries, 0);
    assert_eq!(report.search.entries, 0);
    store.close().await.unwrap();
}
