//! Running counters derived from WAL events.
//!
//! The aggregator is a rebuildable view: replaying a WAL from empty state
//! reaches exactly the counters of an aggregator that observed the same
//! events live. The gate therefore only feeds it events that were
//! successfully appended.

use crate::wal::{EventKind, WalEvent, QUARANTINE_LIFTED};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const FAIL_CLOSED_REASON: &str = "E_UNAVAILABLE";

#[derive(Default)]
pub struct MetricsAggregator {
    issues: AtomicU64,
    consumes: AtomicU64,
    revokes: AtomicU64,
    quarantine_activations: AtomicU64,
    fail_closed: AtomicU64,
    denials_by_reason: Mutex<BTreeMap<String, u64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub issues: u64,
    pub consumes: u64,
    pub revokes: u64,
    pub denials_by_reason: BTreeMap<String, u64>,
    pub quarantine_activations: u64,
    pub fail_closed: u64,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an aggregator by replaying recorded events.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a WalEvent>) -> Self {
        let aggregator = Self::new();
        for event in events {
            aggregator.record_event(event);
        }
        aggregator
    }

    pub fn record_event(&self, event: &WalEvent) {
        match event.kind {
            EventKind::Issue => {
                self.issues.fetch_add(1, Ordering::Relaxed);
            }
            EventKind::Consume => {
                self.consumes.fetch_add(1, Ordering::Relaxed);
            }
            EventKind::Revoke => {
                self.revokes.fetch_add(1, Ordering::Relaxed);
            }
            EventKind::Deny => {
                let reason = event.reason_code.as_deref().unwrap_or("unknown");
                let mut denials = self.denials_by_reason.lock().unwrap();
                *denials.entry(reason.to_string()).or_insert(0) += 1;
                if reason == FAIL_CLOSED_REASON {
                    self.fail_closed.fetch_add(1, Ordering::Relaxed);
                }
            }
            EventKind::Quarantine => {
                // Lift events share the kind; only activations count.
                if event.reason_code.as_deref() != Some(QUARANTINE_LIFTED) {
                    self.quarantine_activations.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            issues: self.issues.load(Ordering::Relaxed),
            consumes: self.consumes.load(Ordering::Relaxed),
            revokes: self.revokes.load(Ordering::Relaxed),
            denials_by_reason: self.denials_by_reason.lock().unwrap().clone(),
            quarantine_activations: self.quarantine_activations.load(Ordering::Relaxed),
            fail_closed: self.fail_closed.load(Ordering::Relaxed),
        }
    }
}
