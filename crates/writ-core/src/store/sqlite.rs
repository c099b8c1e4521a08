//! SQLite-backed token store.
//!
//! Mutations run inside `BEGIN IMMEDIATE` transactions so two handles on the
//! same database file (including handles in different processes) serialize on
//! the write lock. The consume CAS is a conditional
//! `UPDATE ... WHERE status = 'pending'`: whichever transaction commits the
//! row flip first wins, the loser re-reads a terminal state.

use super::schema::TOKEN_SCHEMA;
use super::{validate_for_consume, ConsumeError, ConsumeRequest, StoreError, TokenStore};
use crate::policy::{PolicyEngine, TrustTier};
use crate::token::{ConsentToken, TokenStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteTokenStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTokenStore {
    /// Open a file-backed store.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database behind the sqlite backend (for testing the SQL
    /// paths without a file).
    pub fn memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_connection(conn: &Connection) -> Result<(), StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL journal mode for file-backed DBs (no-op for in-memory)
        let _ = conn.execute("PRAGMA journal_mode = WAL", []);
        conn.execute_batch(TOKEN_SCHEMA)?;
        Ok(())
    }

    fn row_to_token(row: &Row<'_>) -> rusqlite::Result<ConsentToken> {
        let tier_text: String = row.get("tier")?;
        let status_text: String = row.get("status")?;
        Ok(ConsentToken {
            id: row.get("id")?,
            tool: row.get("tool")?,
            session_key: row.get("session_key")?,
            tenant_id: row.get("tenant_id")?,
            context_hash: row.get("context_hash")?,
            tier: TrustTier::parse(&tier_text).unwrap_or(TrustTier::new(0)),
            issued_at: parse_ts(row, "issued_at")?,
            expires_at: parse_ts(row, "expires_at")?,
            status: TokenStatus::parse(&status_text).unwrap_or(TokenStatus::Revoked),
            consumed_at: parse_opt_ts(row, "consumed_at")?,
            revoked_at: parse_opt_ts(row, "revoked_at")?,
        })
    }

    fn load(conn: &Connection, id: &str) -> Result<Option<ConsentToken>, StoreError> {
        conn.query_row("SELECT * FROM tokens WHERE id = ?1", [id], |row| {
            Self::row_to_token(row)
        })
        .optional()
        .map_err(Into::into)
    }

    /// Flip a time-expired pending row to `expired`. Must run inside the
    /// caller's transaction.
    fn lazily_expire(
        conn: &Connection,
        token: &mut ConsentToken,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if token.status == TokenStatus::Pending && token.is_expired(now) {
            conn.execute(
                "UPDATE tokens SET status = 'expired' WHERE id = ?1 AND status = 'pending'",
                [&token.id],
            )?;
            token.status = TokenStatus::Expired;
        }
        Ok(())
    }

    /// Run `f` inside `BEGIN IMMEDIATE`. Business-rule denials still commit
    /// (they may have legitimately flipped a pending row to `expired`);
    /// only backend errors roll back.
    fn in_immediate_txn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, ConsumeError>,
    ) -> Result<T, ConsumeError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("BEGIN IMMEDIATE", [])
            .map_err(StoreError::from)?;
        let result = f(&conn);
        let finalize = match &result {
            Err(ConsumeError::Store(_)) => "ROLLBACK",
            _ => "COMMIT",
        };
        if let Err(e) = conn.execute(finalize, []) {
            let _ = conn.execute("ROLLBACK", []);
            return Err(StoreError::from(e).into());
        }
        result
    }

    fn revoke_where(
        &self,
        where_clause: &str,
        arg: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConsentToken>, StoreError> {
        self.in_immediate_txn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT * FROM tokens WHERE {where_clause} AND status = 'pending'"
                ))
                .map_err(StoreError::from)?;
            let candidates: Vec<ConsentToken> = stmt
                .query_map([arg], |row| Self::row_to_token(row))
                .map_err(StoreError::from)?
                .filter_map(|r| r.ok())
                .collect();
            drop(stmt);

            let mut revoked = Vec::new();
            for mut token in candidates {
                Self::lazily_expire(conn, &mut token, now)?;
                if token.status != TokenStatus::Pending {
                    continue;
                }
                let changed = conn
                    .execute(
                        "UPDATE tokens SET status = 'revoked', revoked_at = ?1
                         WHERE id = ?2 AND status = 'pending'",
                        params![now.to_rfc3339(), token.id],
                    )
                    .map_err(StoreError::from)?;
                if changed == 1 {
                    token.status = TokenStatus::Revoked;
                    token.revoked_at = Some(now);
                    revoked.push(token);
                }
            }
            Ok(revoked)
        })
        .map_err(|e| match e {
            ConsumeError::Store(s) => s,
            other => StoreError::Backend(other.to_string()),
        })
    }
}

fn parse_ts(row: &Row<'_>, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(col)?;
    parse_ts_str(&text)
}

fn parse_opt_ts(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(col)?;
    match text {
        Some(t) => parse_ts_str(&t).map(Some),
        None => Ok(None),
    }
}

fn parse_ts_str(text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

impl TokenStore for SqliteTokenStore {
    fn insert(&self, token: &ConsentToken) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO tokens (
                id, tool, session_key, tenant_id, context_hash, tier,
                issued_at, expires_at, status, consumed_at, revoked_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, NULL)
            "#,
            params![
                token.id,
                token.tool,
                token.session_key,
                token.tenant_id,
                token.context_hash,
                token.tier.to_string(),
                token.issued_at.to_rfc3339(),
                token.expires_at.to_rfc3339(),
                token.status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn consume(
        &self,
        req: &ConsumeRequest<'_>,
        policy: &PolicyEngine,
        now: DateTime<Utc>,
    ) -> Result<ConsentToken, ConsumeError> {
        self.in_immediate_txn(|conn| {
            let mut token = Self::load(conn, req.token_id)?.ok_or(ConsumeError::NotFound)?;
            Self::lazily_expire(conn, &mut token, now)?;
            if let Some(err) = validate_for_consume(&token, req, policy) {
                return Err(err);
            }
            let changed = conn
                .execute(
                    "UPDATE tokens SET status = 'consumed', consumed_at = ?1
                     WHERE id = ?2 AND status = 'pending'",
                    params![now.to_rfc3339(), token.id],
                )
                .map_err(StoreError::from)?;
            if changed != 1 {
                // CAS lost: the row is no longer pending.
                return Err(ConsumeError::AlreadyConsumed);
            }
            token.status = TokenStatus::Consumed;
            token.consumed_at = Some(now);
            Ok(token)
        })
    }

    fn get(&self, id: &str, now: DateTime<Utc>) -> Result<Option<ConsentToken>, StoreError> {
        self.in_immediate_txn(|conn| {
            let Some(mut token) = Self::load(conn, id)? else {
                return Ok(None);
            };
            Self::lazily_expire(conn, &mut token, now)?;
            Ok(Some(token))
        })
        .map_err(|e| match e {
            ConsumeError::Store(s) => s,
            other => StoreError::Backend(other.to_string()),
        })
    }

    fn list_by_session(
        &self,
        session_key: &str,
        since_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ConsentToken>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM tokens WHERE session_key = ?1 ORDER BY issued_at DESC",
        )?;
        let rows = stmt
            .query_map([session_key], |row| Self::row_to_token(row))?
            .filter_map(|r| r.ok())
            .filter(|t| since_ms.is_none_or(|since| t.issued_at.timestamp_millis() >= since))
            .take(limit)
            .collect();
        Ok(rows)
    }

    fn revoke(&self, id: &str, now: DateTime<Utc>) -> Result<Vec<ConsentToken>, StoreError> {
        self.revoke_where("id = ?1", id, now)
    }

    fn revoke_by_session(
        &self,
        session_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConsentToken>, StoreError> {
        self.revoke_where("session_key = ?1", session_key, now)
    }

    fn revoke_by_tenant(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConsentToken>, StoreError> {
        self.revoke_where("tenant_id = ?1", tenant_id, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn policy() -> PolicyEngine {
        let mut matrix = BTreeMap::new();
        matrix.insert(
            TrustTier::new(1),
            BTreeSet::from(["fs_write".to_string()]),
        );
        PolicyEngine::new(TrustTier::new(0), &BTreeMap::new(), &matrix)
    }

    fn pending(now: DateTime<Utc>) -> ConsentToken {
        ConsentToken::mint("fs_write", "s1", Some("acme"), "sha256:h1", TrustTier::new(1), 60, now)
    }

    fn req(token: &ConsentToken) -> ConsumeRequest<'_> {
        ConsumeRequest {
            token_id: &token.id,
            tool: "fs_write",
            session_key: "s1",
            context_hash: "sha256:h1",
        }
    }

    #[test]
    fn consume_roundtrip() {
        let store = SqliteTokenStore::memory().unwrap();
        let now = Utc::now();
        let token = pending(now);
        store.insert(&token).unwrap();

        let consumed = store.consume(&req(&token), &policy(), now).unwrap();
        assert_eq!(consumed.status, TokenStatus::Consumed);

        let again = store.consume(&req(&token), &policy(), now);
        assert!(matches!(again, Err(ConsumeError::AlreadyConsumed)));
    }

    #[test]
    fn get_applies_lazy_expiry() {
        let store = SqliteTokenStore::memory().unwrap();
        let now = Utc::now();
        let token = pending(now);
        store.insert(&token).unwrap();

        let later = now + chrono::Duration::seconds(120);
        let got = store.get(&token.id, later).unwrap().unwrap();
        assert_eq!(got.status, TokenStatus::Expired);

        // Expired is terminal: revoke must not touch it.
        assert!(store.revoke(&token.id, later).unwrap().is_empty());
    }

    #[test]
    fn revoke_by_tenant_only_touches_pending() {
        let store = SqliteTokenStore::memory().unwrap();
        let now = Utc::now();
        let a = pending(now);
        let b = pending(now);
        store.insert(&a).unwrap();
        store.insert(&b).unwrap();
        store.consume(&req(&a), &policy(), now).unwrap();

        let revoked = store.revoke_by_tenant("acme", now).unwrap();
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].id, b.id);
        assert_eq!(
            store.get(&a.id, now).unwrap().unwrap().status,
            TokenStatus::Consumed
        );
    }

    #[test]
    fn timestamps_survive_storage() {
        let store = SqliteTokenStore::memory().unwrap();
        let now = Utc::now();
        let token = pending(now);
        store.insert(&token).unwrap();
        let got = store.get(&token.id, now).unwrap().unwrap();
        assert_eq!(got.issued_at, token.issued_at);
        assert_eq!(got.expires_at, token.expires_at);
        assert_eq!(got.tenant_id.as_deref(), Some("acme"));
    }
}
