//! writ-core: consent-token authorization gate for AI agent tool calls.
//!
//! Before a high-risk capability (shell execution, filesystem writes,
//! outbound messaging, skill installation, sub-agent spawning) runs, the
//! gate decides allow/deny based on a short-lived, single-use consent token
//! bound to the exact tool, session and argument context. Every decision
//! lands in an append-only WAL; abusive sessions are quarantined; backend
//! failure always fails closed.
//!
//! Entry point is [`gate::ConsentGate`], constructed from an explicit
//! [`config::GateConfig`].

pub mod config;
pub mod containment;
pub mod context;
pub mod decision;
pub mod gate;
pub mod metrics;
pub mod notify;
pub mod policy;
pub mod store;
pub mod token;
pub mod wal;

pub use config::{ConfigError, GateConfig, MirrorConfig};
pub use containment::{AnomalyConfig, QuarantineRecord, Signal};
pub use context::context_hash;
pub use decision::{Decision, GateError, ReasonCode};
pub use gate::{
    ConsentGate, ConsumeInput, ExportQuery, IssueRequest, IssuedToken, RevokeSelector, StatusQuery,
};
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use notify::{GateNotice, TokenWatch};
pub use policy::{PolicyEngine, TrustTier};
pub use store::{MemoryTokenStore, SqliteTokenStore, TokenStore};
pub use token::{ConsentToken, TokenStatus};
pub use wal::{EventKind, FileWal, RingWal, Wal, WalEvent, WalFilter, MAX_EXPORT_EVENTS};
