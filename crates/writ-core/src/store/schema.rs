//! SQLite schema for the durable token store.

/// DDL for the token table.
///
/// `status` carries the state machine; terminal rows are never updated
/// again. Timestamps are RFC 3339 UTC text.
pub const TOKEN_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tokens (
    id           TEXT PRIMARY KEY,
    tool         TEXT NOT NULL,
    session_key  TEXT NOT NULL,
    tenant_id    TEXT,
    context_hash TEXT NOT NULL,
    tier         TEXT NOT NULL,
    issued_at    TEXT NOT NULL,
    expires_at   TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending',
    consumed_at  TEXT,
    revoked_at   TEXT
);

CREATE INDEX IF NOT EXISTS idx_tokens_session ON tokens(session_key);
CREATE INDEX IF NOT EXISTS idx_tokens_tenant ON tokens(tenant_id);
CREATE INDEX IF NOT EXISTS idx_tokens_status ON tokens(status);
"#;
