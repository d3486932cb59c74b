//! Write buffer flush
//!
//! Drains the buffer and persists the batch in one transaction. A failed
//! write puts the batch back so the next flush retries it.

use crate::buffer::WriteBuffer;
use crate::db::SnapshotStore;
use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Flusher {
    buffer: Arc<WriteBuffer>,
    store: Arc<dyn SnapshotStore>,
    last_flush_at: RwLock<Option<DateTime<Utc>>>,
    flushed: AtomicU64,
    failures: AtomicU64,
}

impl Flusher {
    pub fn new(buffer: Arc<WriteBuffer>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            buffer,
            store,
            last_flush_at: RwLock::new(None),
            flushed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Persist everything pending; returns the number of snapshots written
    pub async fn flush_once(&self) -> Result<usize> {
        let batch = self.buffer.drain();
        if batch.is_empty() {
            return Ok(0);
        }

        match self.store.insert_live_snapshots(&batch).await {
            Ok(()) => {
                let count = batch.len();
                *self.last_flush_at.write() = Some(Utc::now());
                self.flushed.fetch_add(count as u64, Ordering::SeqCst);
                debug!("Flushed {} snapshots", count);
                Ok(count)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                let size = batch.len();
                let restored = self.buffer.requeue(batch);
                warn!(
                    "Flush of {} snapshots failed, {} requeued: {}",
                    size, restored, e
                );
                Err(e)
            }
        }
    }

    pub fn last_flush_at(&self) -> Option<DateTime<Utc>> {
        *self.last_flush_at.read()
    }

    pub fn flushed_total(&self) -> u64 {
        self.flushed.load(Ordering::SeqCst)
    }

    pub fn failed_flushes(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::SqliteDb;
    use crate::error::AppError;
    use crate::sources::mock::quote;
    use crate::sources::types::LiveSnapshot;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    /// Store that can be switched into a failing state
    struct FlakyStore {
        inner: SqliteDb,
        failing: AtomicBool,
    }

    #[async_trait]
    impl SnapshotStore for FlakyStore {
        async fn insert_live_snapshot(&self, snapshot: &LiveSnapshot) -> Result<()> {
            self.insert_live_snapshots(std::slice::from_ref(snapshot)).await
        }

        async fn insert_live_snapshots(&self, snapshots: &[LiveSnapshot]) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AppError::Internal("disk full".into()));
            }
            self.inner.insert_snapshots(snapshots)
        }

        async fn query_recent_snapshots(&self, symbol: &str, limit: usize) -> Result<Vec<LiveSnapshot>> {
            self.inner.recent_snapshots(symbol, limit)
        }
    }

    fn snapshot(symbol: &str, sequence: u64) -> LiveSnapshot {
        LiveSnapshot::from_quote(quote(symbol, 100.0 + sequence as f64), "zerodha", sequence)
    }

    #[tokio::test]
    async fn test_flush_persists_and_empties_buffer() {
        let buffer = Arc::new(WriteBuffer::new());
        let db = Arc::new(SqliteDb::open_in_memory().unwrap());
        let flusher = Flusher::new(buffer.clone(), db.clone());

        buffer.enqueue(snapshot("NIFTY", 1));
        buffer.enqueue(snapshot("BANKNIFTY", 2));

        assert_eq!(flusher.flush_once().await.unwrap(), 2);
        assert!(buffer.is_empty());
        assert!(flusher.last_flush_at().is_some());
        assert_eq!(db.count_snapshots("NIFTY").unwrap(), 1);

        // Nothing pending is a no-op
        assert_eq!(flusher.flush_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried_without_loss() {
        let buffer = Arc::new(WriteBuffer::new());
        let store = Arc::new(FlakyStore {
            inner: SqliteDb::open_in_memory().unwrap(),
            failing: AtomicBool::new(true),
        });
        let flusher = Flusher::new(buffer.clone(), store.clone());

        buffer.enqueue(snapshot("NIFTY", 1));
        buffer.enqueue(snapshot("SENSEX", 2));

        assert!(flusher.flush_once().await.is_err());
        assert_eq!(buffer.len(), 2);
        assert_eq!(flusher.failed_flushes(), 1);
        assert!(flusher.last_flush_at().is_none());

        store.failing.store(false, Ordering::SeqCst);
        assert_eq!(flusher.flush_once().await.unwrap(), 2);
        assert_eq!(store.inner.count_snapshots("NIFTY").unwrap(), 1);
        assert_eq!(store.inner.count_snapshots("SENSEX").unwrap(), 1);
        assert_eq!(flusher.flushed_total(), 2);
    }
}
