use std::path::Path;

use ragstore::{RagStore, Settings};
use tempfile::TempDir;

/// A store rooted in its own temporary data directory.
pub struct TestStore {
    pub dir: TempDir,
}

impl TestStore {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.data_dir = self.dir.path().to_path_buf();
        settings.store.snapshot_debounce_ms = 10;
        // Tests flush explicitly
        settings.batch.flush_interval_ms = 3_600_000;
        settings
    }

    pub fn open(&self) -> RagStore {
        RagStore::init(self.settings()).expect("Failed to open store")
    }

    pub fn snapshot_path(&self) -> std::path::PathBuf {
        self.settings().snapshot_path()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
