//! Explicit, immutable gate configuration.
//!
//! Everything the gate needs is passed in as one value at construction, so
//! tests can run multiple independently-configured instances in one process.
//! Loaded from YAML; all fields except `default_tier` have defaults.

use crate::containment::AnomalyConfig;
use crate::policy::TrustTier;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Audit-mirror destination (e.g. SIEM ingestion file/pipe).
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    pub path: PathBuf,
    /// Replace session keys and tenant ids with digests before emission.
    #[serde(default)]
    pub redact: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Decisions are computed and logged but never block execution.
    #[serde(default)]
    pub observe_only: bool,

    /// Absent = in-memory only (tokens and WAL lost on restart, export
    /// unavailable).
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Tier for sessions with no prefix mapping.
    pub default_tier: TrustTier,

    /// Tier → permitted tool names. Tiers absent here deny every gated tool.
    #[serde(default)]
    pub tiers: BTreeMap<TrustTier, BTreeSet<String>>,

    /// Session-key prefix → tier, longest prefix wins.
    #[serde(default)]
    pub session_tiers: BTreeMap<String, TrustTier>,

    /// Tools subject to consent gating. Tools not listed bypass the gate
    /// entirely.
    #[serde(default)]
    pub gated_tools: BTreeSet<String>,

    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: i64,

    /// Fsync WAL appends before acknowledging. Turning this off trades
    /// durability of the last few audit events on crash for latency.
    #[serde(default = "default_enabled")]
    pub sync_durability: bool,

    /// Capacity of the in-memory WAL ring buffer.
    #[serde(default = "default_wal_ring_capacity")]
    pub wal_ring_capacity: usize,

    #[serde(default)]
    pub mirror: Option<MirrorConfig>,

    #[serde(default)]
    pub anomaly: AnomalyConfig,

    /// Revoke all pending tokens of a session when it is quarantined.
    #[serde(default)]
    pub cascade_revoke: bool,

    /// Capacity of the outbound notice channel.
    #[serde(default = "default_notice_capacity")]
    pub notice_capacity: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_ttl_secs() -> i64 {
    300
}

fn default_wal_ring_capacity() -> usize {
    10_000
}

fn default_notice_capacity() -> usize {
    64
}

impl GateConfig {
    /// Minimal in-memory config for embedding and tests.
    pub fn in_memory(default_tier: TrustTier) -> Self {
        Self {
            enabled: true,
            observe_only: false,
            storage_dir: None,
            default_tier,
            tiers: BTreeMap::new(),
            session_tiers: BTreeMap::new(),
            gated_tools: BTreeSet::new(),
            default_ttl_secs: default_ttl_secs(),
            sync_durability: true,
            wal_ring_capacity: default_wal_ring_capacity(),
            mirror: None,
            anomaly: AnomalyConfig::default(),
            cascade_revoke: false,
            notice_capacity: default_notice_capacity(),
        }
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl_secs <= 0 {
            return Err(ConfigError::Invalid(format!(
                "default_ttl_secs must be positive, got {}",
                self.default_ttl_secs
            )));
        }
        if self.anomaly.threshold == 0 {
            return Err(ConfigError::Invalid(
                "anomaly.threshold must be at least 1".to_string(),
            ));
        }
        if self.anomaly.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "anomaly.window_secs must be at least 1".to_string(),
            ));
        }
        if self.wal_ring_capacity == 0 {
            return Err(ConfigError::Invalid(
                "wal_ring_capacity must be at least 1".to_string(),
            ));
        }
        if self.notice_capacity == 0 {
            return Err(ConfigError::Invalid(
                "notice_capacity must be at least 1".to_string(),
            ));
        }
        if self.enabled && self.gated_tools.is_empty() {
            tracing::warn!("gate enabled with an empty gated_tools set; nothing will be gated");
        }
        Ok(())
    }
}
