//! In-memory token store. Process-local, lost on restart.

use super::{validate_for_consume, ConsumeError, ConsumeRequest, StoreError, TokenStore};
use crate::policy::PolicyEngine;
use crate::token::{ConsentToken, TokenStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Mutex-guarded map keyed by token id. The lock is held only for the
/// duration of a single record's check-and-set, never across I/O.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, ConsentToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Flip a time-expired pending token to its terminal `expired` state.
fn lazily_expire(token: &mut ConsentToken, now: DateTime<Utc>) {
    if token.status == TokenStatus::Pending && token.is_expired(now) {
        token.status = TokenStatus::Expired;
    }
}

fn revoke_in_place(token: &mut ConsentToken, now: DateTime<Utc>) -> bool {
    lazily_expire(token, now);
    if token.status != TokenStatus::Pending {
        return false;
    }
    token.status = TokenStatus::Revoked;
    token.revoked_at = Some(now);
    true
}

impl TokenStore for MemoryTokenStore {
    fn insert(&self, token: &ConsentToken) -> Result<(), StoreError> {
        let mut tokens = self.tokens.lock().unwrap();
        tokens.insert(token.id.clone(), token.clone());
        Ok(())
    }

    fn consume(
        &self,
        req: &ConsumeRequest<'_>,
        policy: &PolicyEngine,
        now: DateTime<Utc>,
    ) -> Result<ConsentToken, ConsumeError> {
        let mut tokens = self.tokens.lock().unwrap();
        let token = tokens.get_mut(req.token_id).ok_or(ConsumeError::NotFound)?;
        lazily_expire(token, now);
        if let Some(err) = validate_for_consume(token, req, policy) {
            return Err(err);
        }
        token.status = TokenStatus::Consumed;
        token.consumed_at = Some(now);
        Ok(token.clone())
    }

    fn get(&self, id: &str, now: DateTime<Utc>) -> Result<Option<ConsentToken>, StoreError> {
        let mut tokens = self.tokens.lock().unwrap();
        Ok(tokens.get_mut(id).map(|token| {
            lazily_expire(token, now);
            token.clone()
        }))
    }

    fn list_by_session(
        &self,
        session_key: &str,
        since_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ConsentToken>, StoreError> {
        let tokens = self.tokens.lock().unwrap();
        let mut matching: Vec<ConsentToken> = tokens
            .values()
            .filter(|t| t.session_key == session_key)
            .filter(|t| since_ms.is_none_or(|since| t.issued_at.timestamp_millis() >= since))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        matching.truncate(limit);
        Ok(matching)
    }

    fn revoke(&self, id: &str, now: DateTime<Utc>) -> Result<Vec<ConsentToken>, StoreError> {
        let mut tokens = self.tokens.lock().unwrap();
        if let Some(token) = tokens.get_mut(id) {
            if revoke_in_place(token, now) {
                return Ok(vec![token.clone()]);
            }
        }
        Ok(Vec::new())
    }

    fn revoke_by_session(
        &self,
        session_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConsentToken>, StoreError> {
        let mut tokens = self.tokens.lock().unwrap();
        Ok(tokens
            .values_mut()
            .filter(|t| t.session_key == session_key)
            .filter_map(|token| revoke_in_place(token, now).then(|| token.clone()))
            .collect())
    }

    fn revoke_by_tenant(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConsentToken>, StoreError> {
        let mut tokens = self.tokens.lock().unwrap();
        Ok(tokens
            .values_mut()
            .filter(|t| t.tenant_id.as_deref() == Some(tenant_id))
            .filter_map(|token| revoke_in_place(token, now).then(|| token.clone()))
            .collect())
    }
}
