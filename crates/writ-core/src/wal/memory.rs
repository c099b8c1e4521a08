//! Bounded in-memory WAL backend.

use super::{Wal, WalError, WalEvent, WalFilter};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Ring buffer of the most recent events. Not durable: restart loses
/// history and export is refused by the gate.
pub struct RingWal {
    events: Mutex<VecDeque<WalEvent>>,
    capacity: usize,
    seq: AtomicU64,
}

impl RingWal {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            seq: AtomicU64::new(0),
        }
    }
}

impl Wal for RingWal {
    fn append(&self, mut event: WalEvent) -> Result<WalEvent, WalError> {
        let mut events = self.events.lock().unwrap();
        event.seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(event)
    }

    fn query(&self, filter: &WalFilter) -> Result<Vec<WalEvent>, WalError> {
        let events = self.events.lock().unwrap();
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(events
            .iter()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    fn durable(&self) -> bool {
        false
    }
}
