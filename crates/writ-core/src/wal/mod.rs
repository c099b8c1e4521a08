//! Append-only decision journal.
//!
//! Every gate decision becomes exactly one `WalEvent`. Events are never
//! mutated or deleted after append; ordering within a backend is monotonic
//! by the backend-assigned sequence number.

mod file;
mod memory;

pub use file::FileWal;
pub use memory::RingWal;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard cap on events returned by a single export call.
pub const MAX_EXPORT_EVENTS: usize = 10_000;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("wal append failed: {0}")]
    Append(String),
    #[error("wal read failed: {0}")]
    Read(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Issue,
    Consume,
    Deny,
    Revoke,
    Quarantine,
}

/// Reason string recorded on quarantine lift events.
pub const QUARANTINE_LIFTED: &str = "lifted";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEvent {
    /// Backend-assigned, monotonic per backend. Zero until appended.
    #[serde(default)]
    pub seq: u64,
    pub kind: EventKind,
    /// Deny reason code, or quarantine activation/lift reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    pub session_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub ts: DateTime<Utc>,
}

impl WalEvent {
    pub fn new(kind: EventKind, session_key: &str, ts: DateTime<Utc>) -> Self {
        Self {
            seq: 0,
            kind,
            reason_code: None,
            token_id: None,
            session_key: session_key.to_string(),
            tenant_id: None,
            correlation_id: None,
            tool: None,
            ts,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason_code = Some(reason.into());
        self
    }

    pub fn with_token(mut self, token_id: &str) -> Self {
        self.token_id = Some(token_id.to_string());
        self
    }

    pub fn with_tenant(mut self, tenant_id: Option<&str>) -> Self {
        self.tenant_id = tenant_id.map(ToString::to_string);
        self
    }

    pub fn with_correlation(mut self, correlation_id: Option<&str>) -> Self {
        self.correlation_id = correlation_id.map(ToString::to_string);
        self
    }

    pub fn with_tool(mut self, tool: &str) -> Self {
        self.tool = Some(tool.to_string());
        self
    }

    /// Serialize to one canonical JSON line (RFC 8785).
    pub fn to_canonical_line(&self) -> Result<String, WalError> {
        serde_jcs::to_string(self).map_err(|e| WalError::Append(e.to_string()))
    }
}

/// Time/identity filter for query and export.
#[derive(Debug, Clone, Default)]
pub struct WalFilter {
    pub session_key: Option<String>,
    pub tenant_id: Option<String>,
    pub correlation_id: Option<String>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
    pub limit: Option<usize>,
}

impl WalFilter {
    pub fn matches(&self, event: &WalEvent) -> bool {
        if let Some(session) = &self.session_key {
            if &event.session_key != session {
                return false;
            }
        }
        if let Some(tenant) = &self.tenant_id {
            if event.tenant_id.as_deref() != Some(tenant.as_str()) {
                return false;
            }
        }
        if let Some(correlation) = &self.correlation_id {
            if event.correlation_id.as_deref() != Some(correlation.as_str()) {
                return false;
            }
        }
        let ts_ms = event.ts.timestamp_millis();
        if self.since_ms.is_some_and(|since| ts_ms < since) {
            return false;
        }
        if self.until_ms.is_some_and(|until| ts_ms > until) {
            return false;
        }
        true
    }
}

pub trait Wal: Send + Sync {
    /// Append one event; returns the event stamped with its sequence number.
    /// Failure here means the decision was not durably recorded — the gate
    /// fails the originating operation closed.
    fn append(&self, event: WalEvent) -> Result<WalEvent, WalError>;

    /// Filtered scan in append order.
    fn query(&self, filter: &WalFilter) -> Result<Vec<WalEvent>, WalError>;

    /// Whether events survive process restart (required for export).
    fn durable(&self) -> bool;
}
