//! Abuse containment: per-session anomaly scoring and quarantine.
//!
//! Signals accumulate weight inside a rolling window; crossing the
//! configured threshold activates quarantine for the session. Activation is
//! deterministic and fires exactly once until the quarantine is lifted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Reason string recorded on threshold-triggered activations.
pub const REASON_ANOMALY_THRESHOLD: &str = "anomaly_threshold";

/// Anomaly signal kinds, weighted so that denials dominate: a burst of
/// denials trips the threshold long before ordinary issuance volume does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A consume request was denied.
    Deny,
    /// A token was issued (rapid-fire issuance detection).
    Issue,
}

impl Signal {
    pub fn weight(&self) -> u32 {
        match self {
            Self::Deny => 5,
            Self::Issue => 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyConfig {
    /// Accumulated signal weight within the window that triggers quarantine.
    pub threshold: u32,
    pub window_secs: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            threshold: 50,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub session_key: String,
    pub active: bool,
    pub reason: String,
    pub activated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifted_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct SessionState {
    /// (timestamp, weight) pairs inside the rolling window.
    signals: VecDeque<(DateTime<Utc>, u32)>,
    quarantine: Option<QuarantineRecord>,
}

impl SessionState {
    fn quarantined(&self) -> bool {
        self.quarantine.as_ref().is_some_and(|q| q.active)
    }
}

pub struct ContainmentController {
    config: AnomalyConfig,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl ContainmentController {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Record a signal; returns the quarantine record iff this signal
    /// activated quarantine.
    pub fn record_signal(
        &self,
        session_key: &str,
        signal: Signal,
        now: DateTime<Utc>,
    ) -> Option<QuarantineRecord> {
        let mut sessions = self.sessions.lock().unwrap();
        let state = sessions.entry(session_key.to_string()).or_default();
        if state.quarantined() {
            return None;
        }

        let window_start = now - Duration::seconds(self.config.window_secs as i64);
        while state
            .signals
            .front()
            .is_some_and(|(ts, _)| *ts < window_start)
        {
            state.signals.pop_front();
        }
        state.signals.push_back((now, signal.weight()));

        let score: u32 = state.signals.iter().map(|(_, w)| w).sum();
        if score < self.config.threshold {
            return None;
        }
        state.signals.clear();
        let record = QuarantineRecord {
            session_key: session_key.to_string(),
            active: true,
            reason: REASON_ANOMALY_THRESHOLD.to_string(),
            activated_at: now,
            lifted_at: None,
        };
        state.quarantine = Some(record.clone());
        tracing::warn!(session = session_key, score, "anomaly threshold crossed, session quarantined");
        Some(record)
    }

    /// Activate quarantine directly (administrative or cascade paths).
    /// Idempotent: returns the record iff this call activated it.
    pub fn quarantine(
        &self,
        session_key: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Option<QuarantineRecord> {
        let mut sessions = self.sessions.lock().unwrap();
        let state = sessions.entry(session_key.to_string()).or_default();
        if state.quarantined() {
            return None;
        }
        let record = QuarantineRecord {
            session_key: session_key.to_string(),
            active: true,
            reason: reason.to_string(),
            activated_at: now,
            lifted_at: None,
        };
        state.quarantine = Some(record.clone());
        Some(record)
    }

    /// Lift an active quarantine. Returns false when none was active.
    /// Does not retroactively validate previously-denied requests.
    pub fn lift(&self, session_key: &str, now: DateTime<Utc>) -> bool {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(state) = sessions.get_mut(session_key) else {
            return false;
        };
        match &mut state.quarantine {
            Some(q) if q.active => {
                q.active = false;
                q.lifted_at = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn is_quarantined(&self, session_key: &str) -> bool {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(session_key).is_some_and(SessionState::quarantined)
    }

    pub fn record(&self, session_key: &str) -> Option<QuarantineRecord> {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(session_key).and_then(|s| s.quarantine.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(threshold: u32, window_secs: u64) -> ContainmentController {
        ContainmentController::new(AnomalyConfig {
            threshold,
            window_secs,
        })
    }

    #[test]
    fn threshold_crossing_activates_exactly_once() {
        let c = controller(15, 60);
        let now = Utc::now();
        // Two denies: 10 < 15, no activation.
        assert!(c.record_signal("s1", Signal::Deny, now).is_none());
        assert!(c.record_signal("s1", Signal::Deny, now).is_none());
        // Third deny crosses.
        let activated = c.record_signal("s1", Signal::Deny, now);
        assert!(activated.is_some());
        assert!(c.is_quarantined("s1"));
        // Further signals while quarantined do not re-activate.
        assert!(c.record_signal("s1", Signal::Deny, now).is_none());
    }

    #[test]
    fn signals_outside_window_are_pruned() {
        let c = controller(10, 30);
        let now = Utc::now();
        assert!(c.record_signal("s1", Signal::Deny, now).is_none());
        // 40s later the first deny has aged out; one more deny stays below.
        let later = now + Duration::seconds(40);
        assert!(c.record_signal("s1", Signal::Deny, later).is_none());
        assert!(!c.is_quarantined("s1"));
    }

    #[test]
    fn issue_signals_need_more_volume_than_denies() {
        let c = controller(10, 60);
        let now = Utc::now();
        for _ in 0..9 {
            assert!(c.record_signal("s1", Signal::Issue, now).is_none());
        }
        assert!(c.record_signal("s1", Signal::Issue, now).is_some());
    }

    #[test]
    fn lift_clears_active_state() {
        let c = controller(5, 60);
        let now = Utc::now();
        assert!(c.record_signal("s1", Signal::Deny, now).is_some());
        assert!(c.is_quarantined("s1"));

        assert!(c.lift("s1", now));
        assert!(!c.is_quarantined("s1"));
        let record = c.record("s1").unwrap();
        assert!(!record.active);
        assert!(record.lifted_at.is_some());

        // Idempotent lift.
        assert!(!c.lift("s1", now));
        assert!(!c.lift("never-quarantined", now));
    }

    #[test]
    fn direct_quarantine_is_idempotent() {
        let c = controller(100, 60);
        let now = Utc::now();
        assert!(c.quarantine("s1", "manual", now).is_some());
        assert!(c.quarantine("s1", "manual", now).is_none());
        assert_eq!(c.record("s1").unwrap().reason, "manual");
    }

    #[test]
    fn sessions_are_isolated() {
        let c = controller(5, 60);
        let now = Utc::now();
        c.record_signal("s1", Signal::Deny, now);
        assert!(c.is_quarantined("s1"));
        assert!(!c.is_quarantined("s2"));
    }
}
