//! Work queue between image ingestion and the processing workers.
//!
//! The queue is the only structure shared between the upload boundary and
//! the workers. It is a FIFO backed by a `crossbeam_channel`, so any number
//! of producers and competing consumers may hold a handle; every item is
//! delivered to at most one `dequeue` call.
//!
//! Dequeue never blocks indefinitely: workers pass a poll timeout and treat
//! `None` as the point where they re-check their stop flag.

mod dedup;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use thiserror::Error;

pub use dedup::{content_digest, SeenSet};

/// Queue construction parameters.
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Maximum queued items. `0` means unbounded.
    pub capacity: usize,
    /// How long a bounded `enqueue` waits for room before giving up.
    pub enqueue_timeout: Duration,
    /// Reject images whose content was already enqueued once.
    pub dedup: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            enqueue_timeout: Duration::from_millis(500),
            dedup: false,
        }
    }
}

/// Reference to an image waiting for classification.
///
/// Immutable once created; ownership moves into the queue on enqueue and
/// out to exactly one worker on dequeue.
#[derive(Clone, Debug)]
pub struct WorkItem {
    path: PathBuf,
    enqueued_at: Instant,
}

impl WorkItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enqueued_at: Instant::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Time spent since the item was created.
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("work queue is full (capacity {capacity})")]
    Full { capacity: usize },
    #[error("work queue is closed")]
    Closed,
    #[error("image content already queued (sha256 {digest})")]
    Duplicate { digest: String },
}

/// Cloneable handle to the shared FIFO.
#[derive(Clone)]
pub struct WorkQueue {
    tx: Sender<WorkItem>,
    rx: Receiver<WorkItem>,
    capacity: Option<usize>,
    enqueue_timeout: Duration,
    seen: Option<Arc<SeenSet>>,
}

impl WorkQueue {
    pub fn new(config: &QueueConfig) -> Self {
        let (tx, rx, capacity) = if config.capacity == 0 {
            let (tx, rx) = crossbeam_channel::unbounded();
            (tx, rx, None)
        } else {
            let (tx, rx) = crossbeam_channel::bounded(config.capacity);
            (tx, rx, Some(config.capacity))
        };
        Self {
            tx,
            rx,
            capacity,
            enqueue_timeout: config.enqueue_timeout,
            seen: config.dedup.then(|| Arc::new(SeenSet::new())),
        }
    }

    /// Unbounded queue without deduplication.
    pub fn unbounded() -> Self {
        Self::new(&QueueConfig::default())
    }

    /// Replace the dedup capability with a caller-owned seen-set.
    pub fn with_seen_set(mut self, seen: Arc<SeenSet>) -> Self {
        self.seen = Some(seen);
        self
    }

    /// Append an item at the tail.
    ///
    /// Never blocks on an unbounded queue. On a bounded queue waits up to
    /// the configured enqueue timeout for room.
    pub fn enqueue(&self, item: WorkItem) -> Result<(), EnqueueError> {
        let digest = match &self.seen {
            Some(seen) => self.claim_digest(seen, item.path())?,
            None => None,
        };

        let result = match self.capacity {
            None => self.tx.send(item).map_err(|_| EnqueueError::Closed),
            Some(capacity) => match self.tx.send_timeout(item, self.enqueue_timeout) {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(_)) => Err(EnqueueError::Full { capacity }),
                Err(SendTimeoutError::Disconnected(_)) => Err(EnqueueError::Closed),
            },
        };

        if result.is_err() {
            // Release the claim so the same image can be retried later.
            if let (Some(seen), Some(digest)) = (&self.seen, digest) {
                seen.forget(&digest);
            }
        }
        result
    }

    /// Convenience wrapper for `enqueue(WorkItem::new(path))`.
    pub fn enqueue_path(&self, path: impl Into<PathBuf>) -> Result<(), EnqueueError> {
        self.enqueue(WorkItem::new(path))
    }

    /// Take the head item, waiting at most `timeout`.
    ///
    /// Returns `None` when the timeout elapses with nothing queued.
    pub fn dequeue(&self, timeout: Duration) -> Option<WorkItem> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn claim_digest(
        &self,
        seen: &SeenSet,
        path: &Path,
    ) -> Result<Option<[u8; 32]>, EnqueueError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                // The worker reports missing sources; dedup just steps aside.
                log::debug!("dedup skipped for {}: {}", path.display(), err);
                return Ok(None);
            }
        };
        let digest = content_digest(&bytes);
        if !seen.insert(digest) {
            return Err(EnqueueError::Duplicate {
                digest: hex::encode(digest),
            });
        }
        Ok(Some(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn dequeue_preserves_fifo_order() {
        let queue = WorkQueue::unbounded();
        for name in ["a.png", "b.png", "c.png"] {
            queue.enqueue_path(name).unwrap();
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.dequeue(Duration::from_millis(10)))
            .map(|item| item.path().to_path_buf())
            .collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("a.png"),
                PathBuf::from("b.png"),
                PathBuf::from("c.png")
            ]
        );
    }

    #[test]
    fn dequeue_times_out_when_empty() {
        let queue = WorkQueue::unbounded();
        let started = Instant::now();
        assert!(queue.dequeue(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn bounded_queue_reports_full_after_deadline() {
        let queue = WorkQueue::new(&QueueConfig {
            capacity: 1,
            enqueue_timeout: Duration::from_millis(20),
            dedup: false,
        });
        queue.enqueue_path("first.png").unwrap();
        let err = queue.enqueue_path("second.png").unwrap_err();
        assert!(matches!(err, EnqueueError::Full { capacity: 1 }));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn competing_consumers_never_share_an_item() {
        let queue = WorkQueue::unbounded();
        for i in 0..200 {
            queue.enqueue_path(format!("img_{i}.png")).unwrap();
        }
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let delivered = delivered.clone();
                std::thread::spawn(move || {
                    while let Some(item) = queue.dequeue(Duration::from_millis(20)) {
                        delivered.lock().unwrap().push(item.path().to_path_buf());
                    }
                })
            })
            .collect();
        for consumer in consumers {
            consumer.join().unwrap();
        }
        let delivered = delivered.lock().unwrap();
        let unique: HashSet<_> = delivered.iter().collect();
        assert_eq!(delivered.len(), 200);
        assert_eq!(unique.len(), 200);
    }

    #[test]
    fn dedup_rejects_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let queue = WorkQueue::new(&QueueConfig {
            dedup: true,
            ..QueueConfig::default()
        });
        queue.enqueue_path(&a).unwrap();
        let err = queue.enqueue_path(&b).unwrap_err();
        assert!(matches!(err, EnqueueError::Duplicate { .. }));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn dedup_remembers_content_after_dequeue() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("captured_image_1.png");
        let b = dir.path().join("captured_image_2.png");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let queue = WorkQueue::new(&QueueConfig {
            dedup: true,
            ..QueueConfig::default()
        });
        queue.enqueue_path(&a).unwrap();
        queue.dequeue(Duration::from_millis(10)).unwrap();

        assert!(matches!(
            queue.enqueue_path(&b),
            Err(EnqueueError::Duplicate { .. })
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn dedup_releases_claim_when_queue_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        std::fs::write(&a, b"first").unwrap();
        std::fs::write(&b, b"second").unwrap();

        let seen = Arc::new(SeenSet::new());
        let queue = WorkQueue::new(&QueueConfig {
            capacity: 1,
            enqueue_timeout: Duration::from_millis(10),
            dedup: false,
        })
        .with_seen_set(seen.clone());

        queue.enqueue_path(&a).unwrap();
        assert!(matches!(
            queue.enqueue_path(&b),
            Err(EnqueueError::Full { .. })
        ));
        assert_eq!(seen.len(), 1);

        queue.dequeue(Duration::from_millis(10)).unwrap();
        queue.enqueue_path(&b).unwrap();
        assert_eq!(seen.len(), 2);
    }
}
