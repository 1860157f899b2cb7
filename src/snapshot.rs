//! Background snapshot persistence for the local store.
//!
//! Mutations call [`SnapshotWriter::notify`]; the writer waits for a quiet
//! period, then serializes the store and writes it off the async runtime.
//! Failed writes are logged and retried on the next retry tick. Readers are
//! never blocked by a write: only serialization takes the store's read lock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::vector::{LocalVectorStore, VectorError, write_atomically};

/// Handle to the debounced snapshot task.
#[derive(Debug)]
pub struct SnapshotWriter {
    notify: Arc<Notify>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotWriter {
    /// Starts the writer for `store`. Returns `None` if the store has no
    /// snapshot path.
    pub fn spawn(
        store: Arc<LocalVectorStore>,
        debounce: Duration,
        retry_interval: Duration,
    ) -> Option<Self> {
        let path = store.snapshot_path()?.to_path_buf();
        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        // The loaded state already matches the file on disk
        let written = store.generation();
        let task = SnapshotTask {
            store,
            path,
            written,
        };
        let handle = tokio::spawn(task.run(
            Arc::clone(&notify),
            cancel.clone(),
            debounce,
            retry_interval,
        ));

        Some(Self {
            notify,
            cancel,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Signals that the store changed.
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Stops the writer after a final write of any unsaved changes.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "snapshot task ended abnormally");
            }
        }
    }
}

struct SnapshotTask {
    store: Arc<LocalVectorStore>,
    path: PathBuf,
    written: u64,
}

impl SnapshotTask {
    async fn run(
        mut self,
        notify: Arc<Notify>,
        cancel: CancellationToken,
        debounce: Duration,
        retry_interval: Duration,
    ) {
        let mut retry = tokio::time::interval(retry_interval.max(Duration::from_millis(1)));
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        retry.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = notify.notified() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(debounce) => {}
                    }
                }
                _ = retry.tick() => {}
            }
            self.write_if_dirty().await;
        }

        self.write_if_dirty().await;
    }

    async fn write_if_dirty(&mut self) {
        if self.store.generation() == self.written {
            return;
        }
        match self.write().await {
            Ok(generation) => {
                debug!(path = %self.path.display(), generation, "snapshot written");
                self.written = generation;
            }
            Err(e) => warn!(error = %e, "snapshot write failed, will retry"),
        }
    }

    async fn write(&self) -> Result<u64, VectorError> {
        let (generation, json) = self.store.snapshot_json()?;
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || write_atomically(&path, json.as_bytes()))
            .await
            .map_err(|e| VectorError::Persistence {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        result.map_err(|e| VectorError::Persistence {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        Ok(generation)
    }
}
