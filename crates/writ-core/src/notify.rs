//! Outbound notices and token watches.
//!
//! Operator-facing notifications leave the gate on an explicit bounded
//! channel; a slow consumer drops messages instead of stalling the hot
//! path. Waiting on a human decision is modeled as a watch on the token's
//! terminal transition with a hard timeout resolving to `Expired`.

use crate::containment::QuarantineRecord;
use crate::token::TokenStatus;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Events surfaced to operator-facing consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateNotice {
    QuarantineActivated(QuarantineRecord),
    QuarantineLifted { session_key: String },
}

pub struct NoticeSender {
    tx: mpsc::Sender<GateNotice>,
}

impl NoticeSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<GateNotice>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Non-blocking publish. Dropped notices are logged, never retried.
    pub fn publish(&self, notice: GateNotice) {
        match self.tx.try_send(notice) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::warn!(?dropped, "notice channel full, dropping notice");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("notice channel closed, dropping notice");
            }
        }
    }
}

/// Registry of per-token terminal-state watches.
#[derive(Default)]
pub struct TokenWatchers {
    watchers: Mutex<HashMap<String, watch::Sender<Option<TokenStatus>>>>,
}

/// Handle returned to a caller waiting on one token's outcome.
pub struct TokenWatch {
    rx: watch::Receiver<Option<TokenStatus>>,
}

impl TokenWatchers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&self, token_id: &str) -> TokenWatch {
        let mut watchers = self.watchers.lock().unwrap();
        let tx = watchers
            .entry(token_id.to_string())
            .or_insert_with(|| watch::channel(None).0);
        TokenWatch {
            rx: tx.subscribe(),
        }
    }

    /// Notify a terminal transition and drop the registration.
    pub fn resolve(&self, token_id: &str, status: TokenStatus) {
        debug_assert!(status.is_terminal());
        let mut watchers = self.watchers.lock().unwrap();
        if let Some(tx) = watchers.remove(token_id) {
            let _ = tx.send(Some(status));
        }
    }
}

impl TokenWatch {
    /// Wait until the token reaches a terminal state, or the timeout
    /// elapses — the timeout resolves to `Expired`, matching the token's
    /// eventual fate once its TTL passes.
    pub async fn wait_terminal(mut self, timeout: Duration) -> TokenStatus {
        let waited = tokio::time::timeout(timeout, async {
            loop {
                if let Some(status) = *self.rx.borrow_and_update() {
                    return status;
                }
                if self.rx.changed().await.is_err() {
                    return TokenStatus::Expired;
                }
            }
        })
        .await;
        waited.unwrap_or(TokenStatus::Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watch_resolves_on_terminal_transition() {
        let watchers = TokenWatchers::new();
        let watch = watchers.watch("tok-1");
        watchers.resolve("tok-1", TokenStatus::Consumed);
        let status = watch.wait_terminal(Duration::from_secs(1)).await;
        assert_eq!(status, TokenStatus::Consumed);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_times_out_to_expired() {
        let watchers = TokenWatchers::new();
        let watch = watchers.watch("tok-1");
        let status = watch.wait_terminal(Duration::from_millis(50)).await;
        assert_eq!(status, TokenStatus::Expired);
    }

    #[tokio::test]
    async fn resolve_before_watch_is_lost_but_watch_after_reregisters() {
        let watchers = TokenWatchers::new();
        // Resolving an unwatched token is a no-op.
        watchers.resolve("tok-1", TokenStatus::Revoked);
        let watch = watchers.watch("tok-1");
        watchers.resolve("tok-1", TokenStatus::Revoked);
        assert_eq!(
            watch.wait_terminal(Duration::from_secs(1)).await,
            TokenStatus::Revoked
        );
    }

    #[tokio::test]
    async fn full_notice_channel_drops_instead_of_blocking() {
        let (sender, mut rx) = NoticeSender::channel(1);
        sender.publish(GateNotice::QuarantineLifted {
            session_key: "s1".into(),
        });
        sender.publish(GateNotice::QuarantineLifted {
            session_key: "s2".into(),
        });
        // Only the first fits.
        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            GateNotice::QuarantineLifted {
                session_key: "s1".into()
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
