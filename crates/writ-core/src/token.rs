//! Consent token record and its state machine.

use crate::policy::TrustTier;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token lifecycle state.
///
/// `pending → {consumed | revoked | expired}` exactly once; no transition
/// leaves a terminal state. Expiry is lazy: a pending token past its
/// `expires_at` is flipped to `expired` the next time the store reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Pending,
    Consumed,
    Revoked,
    Expired,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Consumed => "consumed",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "consumed" => Some(Self::Consumed),
            "revoked" => Some(Self::Revoked),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Single-use consent token bound to one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentToken {
    /// Opaque unique id ("jti"). Immutable after issuance.
    pub id: String,
    /// Gated capability this token authorizes.
    pub tool: String,
    /// Session the token is scoped to.
    pub session_key: String,
    /// Optional multi-tenant partition key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Digest of the exact invocation context the token was issued for.
    pub context_hash: String,
    /// Trust tier in effect at issuance.
    pub tier: TrustTier,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: TokenStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ConsentToken {
    /// Mint a fresh pending token. The id is a v4 UUID (cryptographically
    /// random via the OS RNG). `ttl_secs` must already be validated positive.
    pub fn mint(
        tool: &str,
        session_key: &str,
        tenant_id: Option<&str>,
        context_hash: &str,
        tier: TrustTier,
        ttl_secs: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool: tool.to_string(),
            session_key: session_key.to_string(),
            tenant_id: tenant_id.map(ToString::to_string),
            context_hash: context_hash.to_string(),
            tier,
            issued_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
            status: TokenStatus::Pending,
            consumed_at: None,
            revoked_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(ttl: i64, now: DateTime<Utc>) -> ConsentToken {
        ConsentToken::mint("exec", "sess-1", None, "sha256:abc", TrustTier::new(1), ttl, now)
    }

    #[test]
    fn mint_produces_unique_pending_tokens() {
        let now = Utc::now();
        let a = token(60, now);
        let b = token(60, now);
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, TokenStatus::Pending);
        assert_eq!(a.expires_at, now + Duration::seconds(60));
    }

    #[test]
    fn expiry_is_strict_after_deadline() {
        let now = Utc::now();
        let t = token(30, now);
        assert!(!t.is_expired(now));
        assert!(!t.is_expired(now + Duration::seconds(30)));
        assert!(t.is_expired(now + Duration::seconds(31)));
    }

    #[test]
    fn status_roundtrips_through_str() {
        for s in [
            TokenStatus::Pending,
            TokenStatus::Consumed,
            TokenStatus::Revoked,
            TokenStatus::Expired,
        ] {
            assert_eq!(TokenStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TokenStatus::parse("unknown"), None);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!TokenStatus::Pending.is_terminal());
        assert!(TokenStatus::Consumed.is_terminal());
        assert!(TokenStatus::Revoked.is_terminal());
        assert!(TokenStatus::Expired.is_terminal());
    }
}
