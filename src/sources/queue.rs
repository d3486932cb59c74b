//! Rate-limited request queue
//!
//! Serializes every call to a throttled upstream through a single worker
//! task. The worker pops requests in FIFO order and waits out whatever is
//! left of the minimum spacing since the previous dispatch before running
//! the next one, so bursts of logical requests never exceed the upstream's
//! documented rate limit.

use crate::error::SourceError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error};

type Job = BoxFuture<'static, ()>;

/// FIFO queue enforcing a minimum delay between dispatches
pub struct RequestQueue {
    name: String,
    sender: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl RequestQueue {
    /// Create a queue and spawn its worker. Must be called inside a Tokio runtime.
    pub fn new(name: &str, spacing: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(name.to_string(), spacing, receiver));

        Self {
            name: name.to_string(),
            sender,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Requests waiting for dispatch
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Enqueue a request and wait for its result
    pub async fn submit<T, F>(&self, request: F) -> Result<T, SourceError>
    where
        F: Future<Output = Result<T, SourceError>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let pending = self.pending.clone();
        pending.fetch_add(1, Ordering::SeqCst);

        let job: Job = Box::pin(async move {
            pending.fetch_sub(1, Ordering::SeqCst);
            let result = request.await;
            // The caller may have stopped waiting; the request still counted.
            let _ = tx.send(result);
        });

        if self.sender.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(SourceError::QueueClosed(self.name.clone()));
        }

        // The job is dropped without answering only when it panicked
        rx.await
            .map_err(|_| SourceError::Aborted(self.name.clone()))?
    }
}

async fn run_worker(name: String, spacing: Duration, mut receiver: mpsc::UnboundedReceiver<Job>) {
    let mut last_dispatch: Option<Instant> = None;

    while let Some(job) = receiver.recv().await {
        if let Some(last) = last_dispatch {
            let ready_at = last + spacing;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        last_dispatch = Some(Instant::now());
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            error!("Request on queue '{}' panicked, worker continues", name);
        }
    }

    debug!("Request queue '{}' worker stopped", name);
}
