//! Batched ingestion queue.
//!
//! Callers enqueue `(text, metadata)` pairs. A flush hands every pending
//! item to a [`BatchSink`] in FIFO order and is triggered either by the
//! queue reaching its size threshold or by the background timer, whichever
//! comes first.
//!
//! Flushes are single-flight: while one is running, another trigger returns
//! [`FlushOutcome::InProgress`] instead of starting a second flush. A failed
//! flush puts the whole batch back at the front of the queue so the next
//! trigger retries it before anything enqueued later.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RagResult;
use crate::vector::Metadata;

/// A text waiting to be embedded and stored.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingItem {
    pub text: String,
    pub metadata: Metadata,
}

impl PendingItem {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

/// Destination of flushed batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Stores the whole batch or nothing.
    async fn write_batch(&self, items: &[PendingItem]) -> RagResult<usize>;
}

/// Result of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The batch was written; carries the number of stored items.
    Flushed(usize),
    /// Nothing was pending.
    Empty,
    /// Another flush was already running.
    InProgress,
}

/// FIFO queue of pending items with single-flight flushing.
#[derive(Debug)]
pub struct BatchQueue {
    pending: Mutex<VecDeque<PendingItem>>,
    flushing: tokio::sync::Mutex<()>,
    threshold_reached: Notify,
    size_threshold: usize,
    flush_interval: Duration,
}

impl BatchQueue {
    pub fn new(size_threshold: usize, flush_interval: Duration) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            flushing: tokio::sync::Mutex::new(()),
            threshold_reached: Notify::new(),
            size_threshold: size_threshold.max(1),
            flush_interval: flush_interval.max(Duration::from_millis(1)),
        }
    }

    /// Appends an item. Returns true when the queue has reached its size
    /// threshold and a flush has been signalled.
    pub fn enqueue(&self, item: PendingItem) -> bool {
        let len = {
            let mut pending = self.pending.lock();
            pending.push_back(item);
            pending.len()
        };
        let full = len >= self.size_threshold;
        if full {
            self.threshold_reached.notify_one();
        }
        full
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn size_threshold(&self) -> usize {
        self.size_threshold
    }

    /// Drains the queue into `sink`.
    ///
    /// # Errors
    /// Returns the sink error after the batch has been put back at the front
    /// of the queue.
    pub async fn flush(&self, sink: &dyn BatchSink) -> RagResult<FlushOutcome> {
        let Ok(_guard) = self.flushing.try_lock() else {
            debug!("flush already in progress");
            return Ok(FlushOutcome::InProgress);
        };

        let batch: Vec<PendingItem> = self.pending.lock().drain(..).collect();
        if batch.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        match sink.write_batch(&batch).await {
            Ok(stored) => {
                debug!(items = batch.len(), stored, "batch flushed");
                Ok(FlushOutcome::Flushed(stored))
            }
            Err(e) => {
                warn!(items = batch.len(), error = %e, "batch flush failed, requeueing");
                let mut pending = self.pending.lock();
                for item in batch.into_iter().rev() {
                    pending.push_front(item);
                }
                Err(e)
            }
        }
    }

    /// Starts the background flusher. It flushes on every timer tick and
    /// whenever the size threshold is reached, and performs a final flush
    /// when `cancel` fires.
    pub fn spawn_flusher(
        self: &Arc<Self>,
        sink: Arc<dyn BatchSink>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(queue.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = queue.threshold_reached.notified() => {}
                }
                // Errors are logged by flush and retried on the next trigger
                let _ = queue.flush(sink.as_ref()).await;
            }

            if let Err(e) = queue.flush(sink.as_ref()).await {
                warn!(error = %e, pending = queue.len(), "final batch flush failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        fail: AtomicBool,
        batches: Mutex<Vec<Vec<String>>>,
        delay_ms: u64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn write_batch(&self, items: &[PendingItem]) -> RagResult<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(RagError::General("sink down".to_string()));
            }
            self.batches
                .lock()
                .push(items.iter().map(|i| i.text.clone()).collect());
            Ok(items.len())
        }
    }

    fn item(text: &str) -> PendingItem {
        PendingItem::new(text, Metadata::default())
    }

    #[test]
    fn test_enqueue_reports_threshold() {
        let queue = BatchQueue::new(2, Duration::from_secs(60));
        assert!(!queue.enqueue(item("a")));
        assert!(queue.enqueue(item("b")));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_flush_preserves_fifo_order() {
        let queue = BatchQueue::new(10, Duration::from_secs(60));
        let sink = RecordingSink::default();
        for text in ["one", "two", "three"] {
            queue.enqueue(item(text));
        }

        assert_eq!(queue.flush(&sink).await.unwrap(), FlushOutcome::Flushed(3));
        assert_eq!(sink.batches.lock()[0], vec!["one", "two", "three"]);
        assert!(queue.is_empty());
        assert_eq!(queue.flush(&sink).await.unwrap(), FlushOutcome::Empty);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_at_front() {
        let queue = BatchQueue::new(10, Duration::from_secs(60));
        let sink = RecordingSink::default();
        sink.fail.store(true, Ordering::SeqCst);

        queue.enqueue(item("first"));
        queue.enqueue(item("second"));
        assert!(queue.flush(&sink).await.is_err());
        assert_eq!(queue.len(), 2);

        queue.enqueue(item("third"));
        sink.fail.store(false, Ordering::SeqCst);
        queue.flush(&sink).await.unwrap();
        assert_eq!(sink.batches.lock()[0], vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_concurrent_flush_is_single_flight() {
        let queue = Arc::new(BatchQueue::new(10, Duration::from_secs(60)));
        let sink = Arc::new(RecordingSink {
            delay_ms: 100,
            ..RecordingSink::default()
        });
        queue.enqueue(item("slow"));

        let first = {
            let queue = Arc::clone(&queue);
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { queue.flush(sink.as_ref()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.enqueue(item("late"));
        assert_eq!(
            queue.flush(sink.as_ref()).await.unwrap(),
            FlushOutcome::InProgress
        );
        assert_eq!(first.await.unwrap().unwrap(), FlushOutcome::Flushed(1));
        assert_eq!(queue.len(), 1);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flusher_triggers_on_threshold() {
        let queue = Arc::new(BatchQueue::new(2, Duration::from_secs(3600)));
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let handle = queue.spawn_flusher(sink.clone(), cancel.clone());

        queue.enqueue(item("a"));
        queue.enqueue(item("b"));
        for _ in 0..50 {
            if queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(queue.is_empty());

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(sink.batches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_flusher_still_flushes_on_threshold() {
        let queue = Arc::new(BatchQueue::new(2, Duration::ZERO));
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let handle = queue.spawn_flusher(sink.clone(), cancel.clone());

        queue.enqueue(item("a"));
        queue.enqueue(item("b"));
        for _ in 0..50 {
            if queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(queue.is_empty());

        cancel.cancel();
        handle.await.unwrap();
        let flushed: usize = sink.batches.lock().iter().map(Vec::len).sum();
        assert_eq!(flushed, 2);
    }

    #[tokio::test]
    async fn test_flusher_triggers_on_timer_and_flushes_on_cancel() {
        let queue = Arc::new(BatchQueue::new(100, Duration::from_millis(30)));
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let handle = queue.spawn_flusher(sink.clone(), cancel.clone());

        queue.enqueue(item("timer"));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(queue.is_empty());

        queue.enqueue(item("shutdown"));
        cancel.cancel();
        handle.await.unwrap();
        assert!(queue.is_empty());
        let batches = sink.batches.lock();
        assert_eq!(batches.last().unwrap(), &vec!["shutdown".to_string()]);
    }
}
