//! Deterministic context hashing (RFC 8785 canonical JSON).
//!
//! The same digest is computed at issuance (to bind a token) and at
//! consumption (to detect tampering or reuse outside the original context).
//! Uses `serde_jcs`, which guarantees lexicographic key ordering at every
//! nesting level, so semantically identical argument structures hash
//! identically regardless of key order.

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextHashError {
    #[error("context canonicalization failed: {0}")]
    Canonicalize(String),
}

pub fn sha256_hex(input: &str) -> String {
    let mut h = Sha256::new();
    h.update(input.as_bytes());
    hex::encode(h.finalize())
}

/// Compute the digest binding a token to `tool` + `session_key` + `args`.
///
/// Returns a `sha256:<hex>` string. Fails only on inputs JCS cannot
/// canonicalize (lone surrogates, non-finite floats).
pub fn context_hash(
    tool: &str,
    session_key: &str,
    args: &Value,
) -> Result<String, ContextHashError> {
    let envelope = serde_json::json!({
        "tool": tool,
        "session": session_key,
        "args": args,
    });
    let canonical =
        serde_jcs::to_string(&envelope).map_err(|e| ContextHashError::Canonicalize(e.to_string()))?;
    Ok(format!("sha256:{}", sha256_hex(&canonical)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_key_order_independent() {
        let a = json!({"path": "/tmp/x", "mode": "append", "flags": {"b": 2, "a": 1}});
        let b = json!({"flags": {"a": 1, "b": 2}, "mode": "append", "path": "/tmp/x"});
        let ha = context_hash("fs_write", "sess-1", &a).unwrap();
        let hb = context_hash("fs_write", "sess-1", &b).unwrap();
        assert_eq!(ha, hb);
    }

    #[test]
    fn hash_changes_with_any_component() {
        let args = json!({"cmd": "ls"});
        let base = context_hash("exec", "sess-1", &args).unwrap();
        assert_ne!(base, context_hash("exec2", "sess-1", &args).unwrap());
        assert_ne!(base, context_hash("exec", "sess-2", &args).unwrap());
        assert_ne!(
            base,
            context_hash("exec", "sess-1", &json!({"cmd": "ls -la"})).unwrap()
        );
    }

    #[test]
    fn hash_has_sha256_prefix() {
        let h = context_hash("exec", "s", &json!({})).unwrap();
        assert!(h.starts_with("sha256:"));
        assert_eq!(h.len(), "sha256:".len() + 64);
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let args = json!([null, 1.5, {"nested": ["x", "y"]}]);
        let h1 = context_hash("t", "s", &args).unwrap();
        let h2 = context_hash("t", "s", &args).unwrap();
        assert_eq!(h1, h2);
    }
}
