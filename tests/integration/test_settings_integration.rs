//! Settings files driving a real store.

use ragstore::{RagError, RagStore, Settings};

use crate::common::TestStore;

#[tokio::test]
async fn test_store_from_settings_file() {
    let test = TestStore::new();
    let path = Settings::init_config_file(test.path(), false).unwrap();

    let mut settings = Settings::load_from(&path).unwrap();
    settings.data_dir = test.path().join("data");
    settings.embedding.dimension = 64;

    let store = RagStore::init(settings).unwrap();
    let record = store
        .embed("sixty four dimensions", ragstore::Metadata::default())
        .await
        .unwrap();
    assert_eq!(record.vector.len(), 64);
    store.close().await.unwrap();
    assert!(test.path().join("data").join("vectors.json").exists());
}

#[tokio::test]
async fn test_invalid_settings_are_rejected() {
    let test = TestStore::new();
    let mut settings = test.settings();
    settings.search.vector_weight = -0.1;

    let err = RagStore::init(settings).unwrap_err();
    assert!(matches!(err, RagError::ConfigError { .. }));
}

#[tokio::test]
async fn test_unreachable_provider_falls_back_to_local() {
    let test = TestStore::new();
    let mut settings = test.settings();
    settings.embedding.providers = vec!["ollama".to_string()];
    settings.embedding.ollama_url = "http://127.0.0.1:9".to_string();
    settings.embedding.provider_timeout_ms = 200;

    let store = RagStore::init(settings).unwrap();
    let record = store
        .embed("provider is down", ragstore::Metadata::default())
        .await
        .unwrap();
    assert_eq!(record.metadata.provider.as_deref(), Some("local"));
    assert_eq!(record.vector.len(), 300);
    store.close().await.unwrap();
}
