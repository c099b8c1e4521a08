//! Decision and reason-code surface returned to the tool-invocation choke point.
//!
//! Every gate operation resolves to a structured decision; the gate never
//! surfaces an unhandled fault to its caller. Reason codes are part of the
//! public contract and must be passed through to operators unmodified.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable reason codes for non-allow outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    /// Caller supplied no token for a gated tool.
    #[serde(rename = "E_NO_TOKEN")]
    NoToken,
    /// Token id unknown to the store.
    #[serde(rename = "E_TOKEN_NOT_FOUND")]
    NotFound,
    /// Token previously consumed (replay).
    #[serde(rename = "E_ALREADY_CONSUMED")]
    AlreadyConsumed,
    /// Token revoked before consumption.
    #[serde(rename = "E_REVOKED")]
    Revoked,
    /// Token TTL elapsed.
    #[serde(rename = "E_EXPIRED")]
    Expired,
    /// Token bound to a different tool.
    #[serde(rename = "E_TOOL_MISMATCH")]
    ToolMismatch,
    /// Token bound to a different session.
    #[serde(rename = "E_SESSION_MISMATCH")]
    SessionMismatch,
    /// Recomputed context hash differs from the hash at issuance.
    #[serde(rename = "E_CONTEXT_MISMATCH")]
    ContextMismatch,
    /// Trust tier at issuance does not permit the tool.
    #[serde(rename = "E_TIER_VIOLATION")]
    TierViolation,
    /// Session quarantined; no new tokens issuable.
    #[serde(rename = "E_QUARANTINE_ACTIVE")]
    QuarantineActive,
    /// Store or WAL backend failed. The single fail-closed case: absence of
    /// a definitive allow is a deny, never an allow.
    #[serde(rename = "E_UNAVAILABLE")]
    Unavailable,
    /// Export requested without durable storage configured.
    #[serde(rename = "E_EXPORT_UNAVAILABLE")]
    ExportUnavailable,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoToken => "E_NO_TOKEN",
            Self::NotFound => "E_TOKEN_NOT_FOUND",
            Self::AlreadyConsumed => "E_ALREADY_CONSUMED",
            Self::Revoked => "E_REVOKED",
            Self::Expired => "E_EXPIRED",
            Self::ToolMismatch => "E_TOOL_MISMATCH",
            Self::SessionMismatch => "E_SESSION_MISMATCH",
            Self::ContextMismatch => "E_CONTEXT_MISMATCH",
            Self::TierViolation => "E_TIER_VIOLATION",
            Self::QuarantineActive => "E_QUARANTINE_ACTIVE",
            Self::Unavailable => "E_UNAVAILABLE",
            Self::ExportUnavailable => "E_EXPORT_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a consume call.
///
/// `allowed` is the decision itself; `enforced` tells the caller whether a
/// denial blocks the invocation (enforce mode) or is advisory only
/// (observe-only mode, disabled gate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<ReasonCode>,
    pub enforced: bool,
}

impl Decision {
    pub fn allow(enforced: bool) -> Self {
        Self {
            allowed: true,
            reason_code: None,
            enforced,
        }
    }

    pub fn deny(reason: ReasonCode, enforced: bool) -> Self {
        Self {
            allowed: false,
            reason_code: Some(reason),
            enforced,
        }
    }

    /// True when the caller must block the invocation.
    pub fn blocks(&self) -> bool {
        !self.allowed && self.enforced
    }
}

/// Hard failures of gate operations that do not resolve to a consume decision.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("gate is disabled by configuration")]
    Disabled,

    #[error("session '{session_key}' is quarantined")]
    QuarantineActive { session_key: String },

    #[error("invalid ttl: {ttl_secs}s (must be positive)")]
    InvalidTtl { ttl_secs: i64 },

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("export requires durable storage")]
    ExportUnavailable,
}

impl GateError {
    /// Reason code equivalent for logging and serialized error surfaces.
    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            Self::QuarantineActive { .. } => Some(ReasonCode::QuarantineActive),
            Self::Unavailable(_) => Some(ReasonCode::Unavailable),
            Self::ExportUnavailable => Some(ReasonCode::ExportUnavailable),
            Self::Disabled | Self::InvalidTtl { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_serialize_as_stable_strings() {
        let json = serde_json::to_string(&ReasonCode::AlreadyConsumed).unwrap();
        assert_eq!(json, "\"E_ALREADY_CONSUMED\"");
        let back: ReasonCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ReasonCode::AlreadyConsumed);
    }

    #[test]
    fn deny_in_observe_mode_does_not_block() {
        let d = Decision::deny(ReasonCode::TierViolation, false);
        assert!(!d.allowed);
        assert!(!d.blocks());
    }

    #[test]
    fn deny_in_enforce_mode_blocks() {
        assert!(Decision::deny(ReasonCode::Expired, true).blocks());
        assert!(!Decision::allow(true).blocks());
    }
}
