//! Write buffer
//!
//! Coalesces snapshots between flushes: at most one pending snapshot per
//! symbol, and a snapshot with a lower sequence than the pending one is
//! dropped, so a slow resolution can never overwrite a fresher value.

use crate::sources::types::LiveSnapshot;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Outcome of an enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// First pending value for the symbol
    Inserted,
    /// Replaced an older pending value
    Replaced,
    /// Older than the pending value; dropped
    Stale,
}

/// Pending snapshots keyed by symbol
#[derive(Default)]
pub struct WriteBuffer {
    pending: Mutex<HashMap<String, LiveSnapshot>>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, snapshot: LiveSnapshot) -> Enqueued {
        let mut pending = self.pending.lock();
        match pending.get(&snapshot.symbol) {
            Some(existing) if existing.sequence > snapshot.sequence => Enqueued::Stale,
            Some(_) => {
                pending.insert(snapshot.symbol.clone(), snapshot);
                Enqueued::Replaced
            }
            None => {
                pending.insert(snapshot.symbol.clone(), snapshot);
                Enqueued::Inserted
            }
        }
    }

    /// Take everything pending, leaving the buffer empty
    pub fn drain(&self) -> Vec<LiveSnapshot> {
        let taken = std::mem::take(&mut *self.pending.lock());
        let mut snapshots: Vec<LiveSnapshot> = taken.into_values().collect();
        snapshots.sort_by_key(|s| s.sequence);
        snapshots
    }

    /// Return a failed flush to the buffer without clobbering newer entries
    pub fn requeue(&self, snapshots: Vec<LiveSnapshot>) -> usize {
        let mut pending = self.pending.lock();
        let mut restored = 0;
        for snapshot in snapshots {
            let newer_pending = pending
                .get(&snapshot.symbol)
                .map(|existing| existing.sequence >= snapshot.sequence)
                .unwrap_or(false);
            if !newer_pending {
                pending.insert(snapshot.symbol.clone(), snapshot);
                restored += 1;
            }
        }
        restored
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Pending value for one symbol, if any
    pub fn get(&self, symbol: &str) -> Option<LiveSnapshot> {
        self.pending.lock().get(symbol).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::mock::quote;

    fn snapshot(symbol: &str, price: f64, sequence: u64) -> LiveSnapshot {
        LiveSnapshot::from_quote(quote(symbol, price), "zerodha", sequence)
    }

    #[test]
    fn test_newer_sequence_replaces() {
        let buffer = WriteBuffer::new();
        assert_eq!(buffer.enqueue(snapshot("NIFTY", 24_500.0, 1)), Enqueued::Inserted);
        assert_eq!(buffer.enqueue(snapshot("NIFTY", 24_510.0, 2)), Enqueued::Replaced);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get("NIFTY").unwrap().price, 24_510.0);
    }

    #[test]
    fn test_older_sequence_is_dropped() {
        let buffer = WriteBuffer::new();
        buffer.enqueue(snapshot("NIFTY", 24_510.0, 7));
        assert_eq!(buffer.enqueue(snapshot("NIFTY", 24_400.0, 3)), Enqueued::Stale);

        let pending = buffer.get("NIFTY").unwrap();
        assert_eq!(pending.sequence, 7);
        assert_eq!(pending.price, 24_510.0);
    }

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = WriteBuffer::new();
        buffer.enqueue(snapshot("NIFTY", 1.0, 2));
        buffer.enqueue(snapshot("BANKNIFTY", 2.0, 1));

        let drained = buffer.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].symbol, "BANKNIFTY");
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_requeue_keeps_newer_pending_value() {
        let buffer = WriteBuffer::new();
        buffer.enqueue(snapshot("NIFTY", 1.0, 1));
        buffer.enqueue(snapshot("BANKNIFTY", 2.0, 2));
        let failed = buffer.drain();

        // A tick lands while the flush was failing
        buffer.enqueue(snapshot("NIFTY", 3.0, 5));

        assert_eq!(buffer.requeue(failed), 1);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.get("NIFTY").unwrap().sequence, 5);
        assert_eq!(buffer.get("BANKNIFTY").unwrap().sequence, 2);
    }
}
