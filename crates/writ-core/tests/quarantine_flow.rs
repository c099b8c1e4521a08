//! Quarantine behavior: storm activation, issuance blocking, cascade
//! revoke, lift, and operator notices.

use std::collections::BTreeSet;
use writ_core::decision::ReasonCode;
use writ_core::gate::{ConsentGate, ConsumeInput, IssueRequest, StatusQuery};
use writ_core::notify::GateNotice;
use writ_core::policy::TrustTier;
use writ_core::wal::EventKind;
use writ_core::GateConfig;

/// 50 denials at weight 5 cross a threshold of 250 on the 50th signal.
const STORM_THRESHOLD: u32 = 250;

fn storm_config(cascade_revoke: bool) -> GateConfig {
    let mut config = GateConfig::in_memory(TrustTier::new(1));
    config.gated_tools = BTreeSet::from(["fs_write".to_string()]);
    config.tiers.insert(
        TrustTier::new(1),
        BTreeSet::from(["fs_write".to_string()]),
    );
    config.anomaly.threshold = STORM_THRESHOLD;
    config.anomaly.window_secs = 300;
    config.cascade_revoke = cascade_revoke;
    config
}

fn issue_req<'a>(session: &'a str, hash: &'a str) -> IssueRequest<'a> {
    IssueRequest {
        tool: "fs_write",
        session_key: session,
        tenant_id: None,
        context_hash: hash,
        ttl_secs: Some(300),
        correlation_id: None,
    }
}

fn bad_consume<'a>(session: &'a str) -> ConsumeInput<'a> {
    ConsumeInput {
        token_id: Some("no-such-token"),
        tool: "fs_write",
        session_key: session,
        tenant_id: None,
        context_hash: "sha256:h1",
        correlation_id: None,
    }
}

#[test]
fn deny_storm_quarantines_once_and_lift_restores_issuance() {
    let gate = ConsentGate::new(storm_config(false)).unwrap();
    let mut notices = gate.take_notices().unwrap();

    for _ in 0..50 {
        let d = gate.consume(&bad_consume("s2"));
        assert!(!d.allowed);
    }

    // Exactly one quarantine activation event despite 50 signals.
    let events = gate.status(&StatusQuery::default()).unwrap();
    let activations = events
        .iter()
        .filter(|e| e.kind == EventKind::Quarantine)
        .count();
    assert_eq!(activations, 1);
    assert_eq!(gate.metrics().quarantine_activations, 1);

    // Issuance is blocked while active.
    let denied = gate.issue(&issue_req("s2", "sha256:h1"));
    assert!(matches!(
        denied,
        Err(writ_core::GateError::QuarantineActive { .. })
    ));

    // Lift restores issuance and emits the lift notice.
    assert!(gate.lift_quarantine("s2").unwrap());
    assert!(!gate.lift_quarantine("s2").unwrap());
    assert!(gate.issue(&issue_req("s2", "sha256:h1")).is_ok());

    let first = notices.try_recv().unwrap();
    assert!(matches!(first, GateNotice::QuarantineActivated(record) if record.session_key == "s2"));
    let second = notices.try_recv().unwrap();
    assert!(matches!(second, GateNotice::QuarantineLifted { session_key } if session_key == "s2"));

    let record = gate.quarantine_record("s2").unwrap();
    assert!(!record.active);
    assert!(record.lifted_at.is_some());
}

#[test]
fn quarantine_blocks_issuance_but_not_existing_tokens() {
    let gate = ConsentGate::new(storm_config(false)).unwrap();
    let issued = gate.issue(&issue_req("s2", "sha256:h1")).unwrap();

    for _ in 0..50 {
        gate.consume(&bad_consume("s2"));
    }
    assert!(gate.issue(&issue_req("s2", "sha256:h2")).is_err());

    // Without cascade revoke, the pre-quarantine token is still consumable.
    let d = gate.consume(&ConsumeInput {
        token_id: Some(&issued.token_id),
        tool: "fs_write",
        session_key: "s2",
        tenant_id: None,
        context_hash: "sha256:h1",
        correlation_id: None,
    });
    assert!(d.allowed);
}

#[test]
fn cascade_revoke_retires_pending_tokens_on_activation() {
    let gate = ConsentGate::new(storm_config(true)).unwrap();
    let issued = gate.issue(&issue_req("s2", "sha256:h1")).unwrap();

    for _ in 0..50 {
        gate.consume(&bad_consume("s2"));
    }

    let d = gate.consume(&ConsumeInput {
        token_id: Some(&issued.token_id),
        tool: "fs_write",
        session_key: "s2",
        tenant_id: None,
        context_hash: "sha256:h1",
        correlation_id: None,
    });
    assert!(!d.allowed);
    assert_eq!(d.reason_code, Some(ReasonCode::Revoked));

    // The cascade produced a revoke event for the retired token.
    let events = gate.status(&StatusQuery::default()).unwrap();
    let revokes = events
        .iter()
        .filter(|e| e.kind == EventKind::Revoke)
        .count();
    assert_eq!(revokes, 1);
    assert_eq!(gate.metrics().revokes, 1);
}

#[test]
fn quarantine_is_scoped_to_the_session() {
    let gate = ConsentGate::new(storm_config(false)).unwrap();
    for _ in 0..50 {
        gate.consume(&bad_consume("s2"));
    }
    assert!(gate.issue(&issue_req("s2", "sha256:h1")).is_err());
    assert!(gate.issue(&issue_req("s3", "sha256:h1")).is_ok());
}
