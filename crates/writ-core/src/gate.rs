//! The gate façade consumed by the tool-invocation choke point.
//!
//! Composes policy, token store, containment, WAL and metrics behind the
//! operations of the external interface. All state is owned here; the WAL
//! is append-only and the metrics view is derived strictly from appended
//! events, so a replay reproduces the live counters.

use crate::config::GateConfig;
use crate::containment::{ContainmentController, QuarantineRecord, Signal};
use crate::decision::{Decision, GateError, ReasonCode};
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::notify::{GateNotice, NoticeSender, TokenWatch, TokenWatchers};
use crate::policy::PolicyEngine;
use crate::store::{ConsumeRequest, MemoryTokenStore, SqliteTokenStore, TokenStore};
use crate::token::{ConsentToken, TokenStatus};
use crate::wal::{
    EventKind, FileWal, RingWal, Wal, WalEvent, WalFilter, MAX_EXPORT_EVENTS, QUARANTINE_LIFTED,
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const TOKEN_DB_FILE: &str = "tokens.db";
const WAL_FILE: &str = "wal.ndjson";

/// Issuance request from the choke point.
#[derive(Debug, Clone)]
pub struct IssueRequest<'a> {
    pub tool: &'a str,
    pub session_key: &'a str,
    pub tenant_id: Option<&'a str>,
    pub context_hash: &'a str,
    /// Defaults to the configured TTL.
    pub ttl_secs: Option<i64>,
    pub correlation_id: Option<&'a str>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IssuedToken {
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Consumption request from the choke point. `token_id: None` models a
/// caller that presented no token for a gated tool.
#[derive(Debug, Clone)]
pub struct ConsumeInput<'a> {
    pub token_id: Option<&'a str>,
    pub tool: &'a str,
    pub session_key: &'a str,
    pub tenant_id: Option<&'a str>,
    pub context_hash: &'a str,
    pub correlation_id: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub enum RevokeSelector<'a> {
    Token(&'a str),
    Session(&'a str),
    Tenant(&'a str),
}

#[derive(Debug, Clone, Default)]
pub struct StatusQuery {
    pub session_key: Option<String>,
    pub tenant_id: Option<String>,
    pub since_ms: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportQuery {
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
    pub correlation_id: Option<String>,
    pub limit: Option<usize>,
}

pub struct ConsentGate {
    config: GateConfig,
    policy: PolicyEngine,
    store: Arc<dyn TokenStore>,
    wal: Arc<dyn Wal>,
    containment: ContainmentController,
    metrics: MetricsAggregator,
    watchers: TokenWatchers,
    notices: NoticeSender,
    notice_rx: Mutex<Option<mpsc::Receiver<GateNotice>>>,
}

impl ConsentGate {
    /// Build a gate with backends chosen by `storage_dir`: sqlite + NDJSON
    /// WAL when set, in-memory otherwise.
    pub fn new(config: GateConfig) -> Result<Self, GateError> {
        let (store, wal): (Arc<dyn TokenStore>, Arc<dyn Wal>) = match &config.storage_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .map_err(|e| GateError::Unavailable(format!("create {}: {e}", dir.display())))?;
                let store = SqliteTokenStore::open(&dir.join(TOKEN_DB_FILE))
                    .map_err(|e| GateError::Unavailable(e.to_string()))?;
                let mut wal = FileWal::open(&dir.join(WAL_FILE), config.sync_durability)
                    .map_err(|e| GateError::Unavailable(e.to_string()))?;
                if let Some(mirror) = &config.mirror {
                    wal = wal
                        .with_mirror(&mirror.path, mirror.redact)
                        .map_err(|e| GateError::Unavailable(e.to_string()))?;
                }
                (Arc::new(store), Arc::new(wal))
            }
            None => {
                if config.mirror.is_some() {
                    tracing::warn!("audit mirror configured without storage_dir; ignoring");
                }
                (
                    Arc::new(MemoryTokenStore::new()),
                    Arc::new(RingWal::new(config.wal_ring_capacity)),
                )
            }
        };
        Ok(Self::with_backends(config, store, wal))
    }

    /// Assemble a gate over explicit backends (test seam, embedding).
    pub fn with_backends(
        config: GateConfig,
        store: Arc<dyn TokenStore>,
        wal: Arc<dyn Wal>,
    ) -> Self {
        let policy = PolicyEngine::new(config.default_tier, &config.session_tiers, &config.tiers);
        let containment = ContainmentController::new(config.anomaly.clone());
        let (notices, notice_rx) = NoticeSender::channel(config.notice_capacity);
        Self {
            config,
            policy,
            store,
            wal,
            containment,
            metrics: MetricsAggregator::new(),
            watchers: TokenWatchers::new(),
            notices,
            notice_rx: Mutex::new(Some(notice_rx)),
        }
    }

    /// Take the outbound notice stream. Yields `None` after the first call.
    pub fn take_notices(&self) -> Option<mpsc::Receiver<GateNotice>> {
        self.notice_rx.lock().unwrap().take()
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    fn enforced(&self) -> bool {
        self.config.enabled && !self.config.observe_only
    }

    /// Append + feed metrics. Metrics only ever see appended events, which
    /// keeps replay-from-WAL equal to live observation.
    fn log_event(&self, event: WalEvent) -> Result<WalEvent, GateError> {
        let stamped = self
            .wal
            .append(event)
            .map_err(|e| GateError::Unavailable(e.to_string()))?;
        self.metrics.record_event(&stamped);
        Ok(stamped)
    }

    /// Logging on paths that already resolve to a denial: the denial stands
    /// even if the audit write fails, so failures are logged and swallowed.
    fn log_event_best_effort(&self, event: WalEvent) {
        if let Err(e) = self.log_event(event) {
            tracing::error!(error = %e, "failed to append wal event");
        }
    }

    fn handle_activation(&self, record: QuarantineRecord, now: DateTime<Utc>) {
        self.log_event_best_effort(
            WalEvent::new(EventKind::Quarantine, &record.session_key, now)
                .with_reason(record.reason.clone()),
        );
        if self.config.cascade_revoke {
            match self.store.revoke_by_session(&record.session_key, now) {
                Ok(revoked) => {
                    for token in &revoked {
                        self.log_event_best_effort(revoke_event(token, now));
                        self.watchers.resolve(&token.id, TokenStatus::Revoked);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, session = %record.session_key, "cascade revoke failed");
                }
            }
        }
        self.notices.publish(GateNotice::QuarantineActivated(record));
    }

    // -------------------------------------------------------------------
    // Issue
    // -------------------------------------------------------------------

    pub fn issue(&self, req: &IssueRequest<'_>) -> Result<IssuedToken, GateError> {
        self.issue_at(Utc::now(), req)
    }

    /// Like [`issue`](Self::issue) with an explicit clock, for tests.
    pub fn issue_at(
        &self,
        now: DateTime<Utc>,
        req: &IssueRequest<'_>,
    ) -> Result<IssuedToken, GateError> {
        if !self.config.enabled {
            return Err(GateError::Disabled);
        }
        let ttl_secs = req.ttl_secs.unwrap_or(self.config.default_ttl_secs);
        if ttl_secs <= 0 {
            return Err(GateError::InvalidTtl { ttl_secs });
        }
        if self.containment.is_quarantined(req.session_key) {
            return self.deny_issue(req, now);
        }
        // Rapid-fire issuance is itself an anomaly signal; crossing the
        // threshold here denies this issuance as the first quarantined call.
        if let Some(record) = self
            .containment
            .record_signal(req.session_key, Signal::Issue, now)
        {
            self.handle_activation(record, now);
            return self.deny_issue(req, now);
        }

        let tier = self.policy.resolve_tier(req.session_key);
        let token = ConsentToken::mint(
            req.tool,
            req.session_key,
            req.tenant_id,
            req.context_hash,
            tier,
            ttl_secs,
            now,
        );
        if let Err(e) = self.store.insert(&token) {
            tracing::error!(error = %e, "token insert failed");
            self.log_event_best_effort(
                deny_event(req.session_key, req.tenant_id, req.correlation_id, now)
                    .with_tool(req.tool)
                    .with_reason(ReasonCode::Unavailable.as_str()),
            );
            return Err(GateError::Unavailable(e.to_string()));
        }
        // Quarantine may have activated between the check and the insert;
        // re-checking after the write closes the race, revoking what was
        // just minted.
        if self.containment.is_quarantined(req.session_key) {
            if let Err(e) = self.store.revoke(&token.id, now) {
                tracing::error!(error = %e, token = %token.id, "post-quarantine revoke failed");
            }
            return self.deny_issue(req, now);
        }

        self.log_event(
            WalEvent::new(EventKind::Issue, req.session_key, now)
                .with_token(&token.id)
                .with_tool(req.tool)
                .with_tenant(req.tenant_id)
                .with_correlation(req.correlation_id),
        )
        .map_err(|e| {
            // Unrecorded issuance may not stand: fail closed and retire the
            // token.
            let _ = self.store.revoke(&token.id, now);
            e
        })?;

        Ok(IssuedToken {
            token_id: token.id,
            expires_at: token.expires_at,
        })
    }

    fn deny_issue(
        &self,
        req: &IssueRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, GateError> {
        self.log_event_best_effort(
            deny_event(req.session_key, req.tenant_id, req.correlation_id, now)
                .with_tool(req.tool)
                .with_reason(ReasonCode::QuarantineActive.as_str()),
        );
        Err(GateError::QuarantineActive {
            session_key: req.session_key.to_string(),
        })
    }

    // -------------------------------------------------------------------
    // Consume
    // -------------------------------------------------------------------

    pub fn consume(&self, input: &ConsumeInput<'_>) -> Decision {
        self.consume_at(Utc::now(), input)
    }

    /// Like [`consume`](Self::consume) with an explicit clock, for tests.
    ///
    /// Always returns a structured decision; backend failures surface as the
    /// fail-closed `E_UNAVAILABLE` denial, never as an allow or a panic.
    pub fn consume_at(&self, now: DateTime<Utc>, input: &ConsumeInput<'_>) -> Decision {
        if !self.config.enabled {
            return Decision::allow(false);
        }
        let enforced = self.enforced();
        // Ungated tools bypass the model entirely.
        if !self.config.gated_tools.contains(input.tool) {
            return Decision::allow(enforced);
        }

        let token_id = match input.token_id {
            Some(id) if !id.is_empty() => id,
            _ => return self.deny_consume(input, None, ReasonCode::NoToken, now),
        };

        let request = ConsumeRequest {
            token_id,
            tool: input.tool,
            session_key: input.session_key,
            context_hash: input.context_hash,
        };
        match self.store.consume(&request, &self.policy, now) {
            Ok(token) => {
                if let Err(e) = self.log_event(
                    WalEvent::new(EventKind::Consume, &token.session_key, now)
                        .with_token(&token.id)
                        .with_tool(&token.tool)
                        .with_tenant(token.tenant_id.as_deref())
                        .with_correlation(input.correlation_id),
                ) {
                    // The flip is already durable but the decision is not:
                    // without its audit record the allow may not stand.
                    tracing::error!(error = %e, token = %token.id, "consume recorded but not logged");
                    return Decision::deny(ReasonCode::Unavailable, enforced);
                }
                self.watchers.resolve(&token.id, TokenStatus::Consumed);
                Decision::allow(enforced)
            }
            Err(e) => {
                let reason = e.reason_code();
                if reason == ReasonCode::Unavailable {
                    tracing::error!(error = %e, token = token_id, "token store unavailable");
                }
                if reason == ReasonCode::Expired {
                    self.watchers.resolve(token_id, TokenStatus::Expired);
                }
                self.deny_consume(input, Some(token_id), reason, now)
            }
        }
    }

    fn deny_consume(
        &self,
        input: &ConsumeInput<'_>,
        token_id: Option<&str>,
        reason: ReasonCode,
        now: DateTime<Utc>,
    ) -> Decision {
        let mut event = deny_event(input.session_key, input.tenant_id, input.correlation_id, now)
            .with_tool(input.tool)
            .with_reason(reason.as_str());
        if let Some(id) = token_id {
            event = event.with_token(id);
        }
        self.log_event_best_effort(event);
        // Backend outages are not session behavior; they never feed the
        // anomaly score.
        if reason != ReasonCode::Unavailable {
            if let Some(record) = self
                .containment
                .record_signal(input.session_key, Signal::Deny, now)
            {
                self.handle_activation(record, now);
            }
        }
        Decision::deny(reason, self.enforced())
    }

    // -------------------------------------------------------------------
    // Revoke / quarantine administration
    // -------------------------------------------------------------------

    pub fn revoke(&self, selector: &RevokeSelector<'_>) -> Result<u64, GateError> {
        self.revoke_at(Utc::now(), selector)
    }

    pub fn revoke_at(
        &self,
        now: DateTime<Utc>,
        selector: &RevokeSelector<'_>,
    ) -> Result<u64, GateError> {
        let revoked = match selector {
            RevokeSelector::Token(id) => self.store.revoke(id, now),
            RevokeSelector::Session(session) => self.store.revoke_by_session(session, now),
            RevokeSelector::Tenant(tenant) => self.store.revoke_by_tenant(tenant, now),
        }
        .map_err(|e| GateError::Unavailable(e.to_string()))?;

        for token in &revoked {
            self.log_event(revoke_event(token, now))?;
            self.watchers.resolve(&token.id, TokenStatus::Revoked);
        }
        Ok(revoked.len() as u64)
    }

    pub fn lift_quarantine(&self, session_key: &str) -> Result<bool, GateError> {
        self.lift_quarantine_at(Utc::now(), session_key)
    }

    pub fn lift_quarantine_at(
        &self,
        now: DateTime<Utc>,
        session_key: &str,
    ) -> Result<bool, GateError> {
        if !self.containment.lift(session_key, now) {
            return Ok(false);
        }
        self.log_event(
            WalEvent::new(EventKind::Quarantine, session_key, now)
                .with_reason(QUARANTINE_LIFTED),
        )?;
        self.notices.publish(GateNotice::QuarantineLifted {
            session_key: session_key.to_string(),
        });
        Ok(true)
    }

    pub fn quarantine_record(&self, session_key: &str) -> Option<QuarantineRecord> {
        self.containment.record(session_key)
    }

    // -------------------------------------------------------------------
    // Read surface
    // -------------------------------------------------------------------

    pub fn status(&self, query: &StatusQuery) -> Result<Vec<WalEvent>, GateError> {
        let filter = WalFilter {
            session_key: query.session_key.clone(),
            tenant_id: query.tenant_id.clone(),
            since_ms: query.since_ms,
            limit: query.limit,
            ..Default::default()
        };
        self.wal
            .query(&filter)
            .map_err(|e| GateError::Unavailable(e.to_string()))
    }

    pub fn token(&self, id: &str) -> Result<Option<ConsentToken>, GateError> {
        self.store
            .get(id, Utc::now())
            .map_err(|e| GateError::Unavailable(e.to_string()))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Newline-delimited canonical JSON, capped at [`MAX_EXPORT_EVENTS`]
    /// regardless of the requested limit.
    pub fn export(&self, query: &ExportQuery) -> Result<String, GateError> {
        if !self.wal.durable() {
            return Err(GateError::ExportUnavailable);
        }
        let limit = query
            .limit
            .unwrap_or(MAX_EXPORT_EVENTS)
            .min(MAX_EXPORT_EVENTS);
        let filter = WalFilter {
            since_ms: query.since_ms,
            until_ms: query.until_ms,
            correlation_id: query.correlation_id.clone(),
            limit: Some(limit),
            ..Default::default()
        };
        let events = self
            .wal
            .query(&filter)
            .map_err(|e| GateError::Unavailable(e.to_string()))?;
        let mut out = String::new();
        for event in &events {
            let line = event
                .to_canonical_line()
                .map_err(|e| GateError::Unavailable(e.to_string()))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    /// Watch one token's terminal transition (wait/notify with timeout for
    /// surrounding approval flows).
    pub fn watch(&self, token_id: &str) -> TokenWatch {
        self.watchers.watch(token_id)
    }
}

fn deny_event(
    session_key: &str,
    tenant_id: Option<&str>,
    correlation_id: Option<&str>,
    now: DateTime<Utc>,
) -> WalEvent {
    WalEvent::new(EventKind::Deny, session_key, now)
        .with_tenant(tenant_id)
        .with_correlation(correlation_id)
}

fn revoke_event(token: &ConsentToken, now: DateTime<Utc>) -> WalEvent {
    WalEvent::new(EventKind::Revoke, &token.session_key, now)
        .with_token(&token.id)
        .with_tool(&token.tool)
        .with_tenant(token.tenant_id.as_deref())
}
