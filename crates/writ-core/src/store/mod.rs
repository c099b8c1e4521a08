//! Token store: atomic issue/consume/revoke/lookup.
//!
//! Two backends share one contract: `consume` is a compare-and-set on the
//! token's state — across any number of concurrent callers exactly one
//! observes success, the rest observe `AlreadyConsumed`. The memory backend
//! is process-local and lost on restart; the sqlite backend survives restart
//! without losing terminal-state information.

mod memory;
mod schema;
mod sqlite;

pub use memory::MemoryTokenStore;
pub use schema::TOKEN_SCHEMA;
pub use sqlite::SqliteTokenStore;

use crate::decision::ReasonCode;
use crate::policy::PolicyEngine;
use crate::token::ConsentToken;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Backend failure. Always maps to the fail-closed `Unavailable` reason.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Why a consume call did not flip the token to `consumed`.
///
/// Validation order is fixed: exists, not expired, not revoked, not already
/// consumed, tool match, session match, context match, tier permits tool.
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("token not found")]
    NotFound,
    #[error("token expired")]
    Expired,
    #[error("token revoked")]
    Revoked,
    #[error("token already consumed")]
    AlreadyConsumed,
    #[error("token bound to a different tool")]
    ToolMismatch,
    #[error("token bound to a different session")]
    SessionMismatch,
    #[error("context hash mismatch")]
    ContextMismatch,
    #[error("tier does not permit tool")]
    TierViolation,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ConsumeError {
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::NotFound => ReasonCode::NotFound,
            Self::Expired => ReasonCode::Expired,
            Self::Revoked => ReasonCode::Revoked,
            Self::AlreadyConsumed => ReasonCode::AlreadyConsumed,
            Self::ToolMismatch => ReasonCode::ToolMismatch,
            Self::SessionMismatch => ReasonCode::SessionMismatch,
            Self::ContextMismatch => ReasonCode::ContextMismatch,
            Self::TierViolation => ReasonCode::TierViolation,
            Self::Store(_) => ReasonCode::Unavailable,
        }
    }
}

/// What the caller presents at the choke point.
#[derive(Debug, Clone)]
pub struct ConsumeRequest<'a> {
    pub token_id: &'a str,
    pub tool: &'a str,
    pub session_key: &'a str,
    pub context_hash: &'a str,
}

/// Shared validation applied under the backend's atomic section, after the
/// token has been loaded and lazily expired. Returns the error to surface,
/// or `None` when the CAS may proceed.
pub(crate) fn validate_for_consume(
    token: &ConsentToken,
    req: &ConsumeRequest<'_>,
    policy: &PolicyEngine,
) -> Option<ConsumeError> {
    use crate::token::TokenStatus;

    match token.status {
        TokenStatus::Expired => return Some(ConsumeError::Expired),
        TokenStatus::Revoked => return Some(ConsumeError::Revoked),
        TokenStatus::Consumed => return Some(ConsumeError::AlreadyConsumed),
        TokenStatus::Pending => {}
    }
    if token.tool != req.tool {
        return Some(ConsumeError::ToolMismatch);
    }
    if token.session_key != req.session_key {
        return Some(ConsumeError::SessionMismatch);
    }
    if token.context_hash != req.context_hash {
        return Some(ConsumeError::ContextMismatch);
    }
    if !policy.is_tool_permitted(token.tier, &token.tool) {
        return Some(ConsumeError::TierViolation);
    }
    None
}

pub trait TokenStore: Send + Sync {
    /// Persist a freshly minted pending token.
    fn insert(&self, token: &ConsentToken) -> Result<(), StoreError>;

    /// Atomic consumption. Exactly one concurrent caller succeeds for a
    /// given id; all checks and the `pending → consumed` flip happen under
    /// a single atomic section.
    fn consume(
        &self,
        req: &ConsumeRequest<'_>,
        policy: &PolicyEngine,
        now: DateTime<Utc>,
    ) -> Result<ConsentToken, ConsumeError>;

    /// Lookup with lazy expiry applied.
    fn get(&self, id: &str, now: DateTime<Utc>) -> Result<Option<ConsentToken>, StoreError>;

    /// Tokens for a session, newest first, bounded by `limit`.
    fn list_by_session(
        &self,
        session_key: &str,
        since_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ConsentToken>, StoreError>;

    /// Revoke one token if still pending. Returns the ids actually
    /// transitioned (empty on idempotent repeat).
    fn revoke(&self, id: &str, now: DateTime<Utc>) -> Result<Vec<ConsentToken>, StoreError>;

    /// Revoke every pending token of a session.
    fn revoke_by_session(
        &self,
        session_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConsentToken>, StoreError>;

    /// Revoke every pending token of a tenant.
    fn revoke_by_tenant(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConsentToken>, StoreError>;
}
