//! Request multiplexer (spec §4.F): the correlation table between G's
//! JSON-RPC calls and the one active agent session, modeled on the
//! teacher's `ForwarderCommand` oneshot-reply pattern (`state.rs`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use bridge_protocol::ActionFrame;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::CoreError;
use crate::session::{SessionHandle, SessionRegistry, SessionState};
use crate::snapshot::SnapshotCache;

pub enum DispatchReply {
    Success(Value),
    AgentError(String),
}

struct PendingCall {
    session_id: String,
    reply: oneshot::Sender<DispatchReply>,
}

#[derive(Default)]
pub struct PendingTable {
    calls: Mutex<HashMap<String, PendingCall>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(&self, correlation_id: String, session_id: String, reply: oneshot::Sender<DispatchReply>) {
        self.calls
            .lock()
            .await
            .insert(correlation_id, PendingCall { session_id, reply });
    }

    async fn remove(&self, correlation_id: &str) -> Option<PendingCall> {
        self.calls.lock().await.remove(correlation_id)
    }

    /// Fulfils a pending call with a successful agent reply. Silently
    /// drops the reply if the correlation id is unknown (already timed
    /// out, cancelled, or never existed) — this is spec-mandated, not a
    /// bug.
    pub async fn resolve_success(&self, correlation_id: &str, payload: Value) {
        if let Some(call) = self.remove(correlation_id).await {
            let _ = call.reply.send(DispatchReply::Success(payload));
        }
    }

    pub async fn resolve_agent_error(&self, correlation_id: &str, message: String) {
        if let Some(call) = self.remove(correlation_id).await {
            let _ = call.reply.send(DispatchReply::AgentError(message));
        }
    }

    /// Drops every pending call routed to `session_id` without resolving
    /// their reply sinks; the dispatcher's own `wait_evicted` race is what
    /// actually surfaces `PEER_GONE` to each waiter (spec §4.F step 6c).
    pub async fn fail_session(&self, session_id: &str) {
        self.calls.lock().await.retain(|_, call| call.session_id != session_id);
    }

    /// Removes a pending call without resolving it, used for cancellation
    /// (spec §4.F "Cancellation"). A reply arriving after this point is
    /// dropped because the entry is already gone.
    pub async fn cancel(&self, correlation_id: &str) {
        self.remove(correlation_id).await;
    }

    /// Repoints an existing pending call at a different session, keeping its
    /// original reply sink intact. Used when the enqueue-retry (spec §5)
    /// moves a call from a session that raced into `evicting` onto whichever
    /// session is current now.
    async fn rebind(&self, correlation_id: &str, new_session_id: String) {
        if let Some(call) = self.calls.lock().await.get_mut(correlation_id) {
            call.session_id = new_session_id;
        }
    }
}

/// Sends `json` on `session`'s outbound queue. If the send fails because the
/// session raced into `evicting`/`closed` between selection and this call,
/// retries once against whatever session is current now (spec §5: "must
/// re-validate the session is not evicting before enqueueing a write; if it
/// is, retry selection once"). A failure for any other reason (a genuinely
/// full or closed outbound queue on a still-`Active` session) is reported
/// as congestion without retrying.
async fn enqueue_with_retry(
    mut session: SessionHandle,
    json: &str,
    registry: &SessionRegistry,
    pending: &PendingTable,
    correlation_id: &str,
    write_timeout: Duration,
) -> Result<SessionHandle, CoreError> {
    let mut retried = false;
    loop {
        let frame = Message::Text(json.to_owned().into());
        if session.inner.enqueue_frame(frame, write_timeout).await.is_ok() {
            return Ok(session);
        }

        let raced_eviction = session.inner.state_async().await != SessionState::Active;
        if raced_eviction && !retried {
            retried = true;
            match registry.current().await {
                Some(next) if next.inner.id != session.inner.id => {
                    pending.rebind(correlation_id, next.inner.id.clone()).await;
                    session = next;
                    continue;
                }
                _ => return Err(CoreError::PeerGone),
            }
        }

        return Err(CoreError::PeerCongested);
    }
}

/// The one entry point G calls into. Resolves the action name, picks the
/// current session, arms a timeout, submits the frame, and races reply vs.
/// timeout vs. eviction — exactly one of which determines the outcome.
pub async fn dispatch(
    action: &'static str,
    params: Value,
    tab_id: Option<u64>,
    timeout_override_ms: Option<u64>,
    config: &Config,
    registry: &SessionRegistry,
    pending: &Arc<PendingTable>,
    snapshots: &SnapshotCache,
) -> Result<Value, CoreError> {
    let session = registry.current().await.ok_or(CoreError::NoPeer)?;
    let correlation_id = Uuid::new_v4().to_string();
    let deadline = config.action_timeout(action, timeout_override_ms);

    let frame = ActionFrame {
        action,
        request_id: correlation_id.clone(),
        tab_id,
        params,
    };
    let json = serde_json::to_string(&frame).map_err(|e| CoreError::Internal(e.to_string()))?;

    let (reply_tx, reply_rx) = oneshot::channel();
    pending.insert(correlation_id.clone(), session.inner.id.clone(), reply_tx).await;

    let session = match enqueue_with_retry(session, &json, registry, pending, &correlation_id, config.write_timeout).await {
        Ok(session) => session,
        Err(e) => {
            pending.cancel(&correlation_id).await;
            return Err(e);
        }
    };

    info!(correlation_id = %correlation_id, action, "dispatched action to agent");

    let outcome = tokio::select! {
        reply = reply_rx => {
            match reply {
                Ok(DispatchReply::Success(payload)) => Ok(payload),
                Ok(DispatchReply::AgentError(message)) => Err(CoreError::AgentError(message)),
                Err(_) => Err(CoreError::PeerGone),
            }
        }
        () = tokio::time::sleep(deadline) => {
            pending.cancel(&correlation_id).await;
            warn!(correlation_id = %correlation_id, action, "action timed out");
            Err(CoreError::Timeout { action, configured: deadline })
        }
        () = session.inner.wait_evicted() => {
            pending.cancel(&correlation_id).await;
            Err(CoreError::PeerGone)
        }
    };

    if let Ok(payload) = &outcome {
        if let Some(tab_id) = tab_id {
            snapshots.apply_action_reply(tab_id, action, payload).await;
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionHandle, SessionInner, SessionRegistry, SessionState};
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use tokio::sync::{mpsc, Notify, RwLock};

    fn make_session(queue_depth: usize) -> (SessionHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        let inner = Arc::new(SessionInner {
            id: "s1".to_owned(),
            state: RwLock::new(SessionState::Active),
            last_activity_ms: AtomicU64::new(0),
            last_pong_ms: AtomicU64::new(0),
            consecutive_ping_failures: AtomicU32::new(0),
            outbound: tx,
            evicted: Notify::new(),
        });
        (SessionHandle { inner }, rx)
    }

    #[tokio::test]
    async fn dispatch_fails_fast_with_no_peer_when_no_session_active() {
        let config = Config::default();
        let registry = SessionRegistry::new();
        let pending = Arc::new(PendingTable::new());
        let snapshots = SnapshotCache::new();

        let result = dispatch(
            bridge_protocol::actions::GET_ALL_TABS,
            Value::Null,
            None,
            None,
            &config,
            &registry,
            &pending,
            &snapshots,
        )
        .await;
        assert!(matches!(result, Err(CoreError::NoPeer)));
    }

    #[tokio::test]
    async fn dispatch_resolves_success_when_reply_arrives() {
        let config = Config::default();
        let registry = SessionRegistry::new();
        let pending = Arc::new(PendingTable::new());
        let snapshots = SnapshotCache::new();

        let (session, mut rx) = make_session(8);
        registry.insert(session).await;

        let pending_clone = pending.clone();
        let responder = tokio::spawn(async move {
            let Some(Message::Text(text)) = rx.recv().await else {
                panic!("expected a frame to be sent");
            };
            let frame: Value = serde_json::from_str(&text).unwrap();
            let request_id = frame["requestId"].as_str().unwrap().to_owned();
            pending_clone
                .resolve_success(&request_id, serde_json::json!({"ok": true}))
                .await;
        });

        let result = dispatch(
            bridge_protocol::actions::GET_ALL_TABS,
            Value::Null,
            None,
            None,
            &config,
            &registry,
            &pending,
            &snapshots,
        )
        .await;

        responder.await.unwrap();
        assert_eq!(result.unwrap(), serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn dispatch_times_out_when_no_reply_arrives() {
        let mut config = Config::default();
        config.default_action_timeout = Duration::from_millis(20);
        let registry = SessionRegistry::new();
        let pending = Arc::new(PendingTable::new());
        let snapshots = SnapshotCache::new();

        let (session, _rx) = make_session(8);
        registry.insert(session).await;

        let result = dispatch(
            bridge_protocol::actions::GET_ALL_TABS,
            Value::Null,
            None,
            None,
            &config,
            &registry,
            &pending,
            &snapshots,
        )
        .await;
        assert!(matches!(result, Err(CoreError::Timeout { .. })));
    }

    #[tokio::test]
    async fn dispatch_reports_peer_gone_when_session_evicted_mid_call() {
        let mut config = Config::default();
        config.default_action_timeout = Duration::from_secs(5);
        let registry = SessionRegistry::new();
        let pending = Arc::new(PendingTable::new());
        let snapshots = SnapshotCache::new();

        let (session, _rx) = make_session(8);
        let inner = session.inner.clone();
        registry.insert(session).await;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            inner.begin_evicting().await;
        });

        let result = dispatch(
            bridge_protocol::actions::GET_ALL_TABS,
            Value::Null,
            None,
            None,
            &config,
            &registry,
            &pending,
            &snapshots,
        )
        .await;
        assert!(matches!(result, Err(CoreError::PeerGone)));
    }

    #[tokio::test]
    async fn enqueue_with_retry_succeeds_immediately_on_an_active_session() {
        let registry = SessionRegistry::new();
        let pending = PendingTable::new();
        let (session, mut rx) = make_session(8);
        pending.insert("c1".to_owned(), session.inner.id.clone(), oneshot::channel().0).await;

        let result = enqueue_with_retry(session.clone(), "{}", &registry, &pending, "c1", Duration::from_secs(1))
            .await
            .expect("should succeed without needing a retry");
        assert_eq!(result.inner.id, session.inner.id);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn enqueue_with_retry_moves_a_racily_evicted_call_onto_the_new_current_session() {
        let registry = SessionRegistry::new();
        let pending = PendingTable::new();

        let (stale, _stale_rx) = make_session(8);
        stale.inner.begin_evicting().await;

        let (fresh, mut fresh_rx) = make_session(8);
        registry.insert(fresh.clone()).await;

        pending.insert("c1".to_owned(), stale.inner.id.clone(), oneshot::channel().0).await;

        let result = enqueue_with_retry(stale, "{}", &registry, &pending, "c1", Duration::from_secs(1))
            .await
            .expect("should retry onto the fresh session");
        assert_eq!(result.inner.id, fresh.inner.id);
        assert!(fresh_rx.recv().await.is_some());

        let rebound = pending.calls.lock().await;
        assert_eq!(rebound.get("c1").unwrap().session_id, fresh.inner.id);
    }

    #[tokio::test]
    async fn enqueue_with_retry_reports_peer_gone_when_no_session_replaces_the_evicted_one() {
        let registry = SessionRegistry::new();
        let pending = PendingTable::new();
        let (stale, _rx) = make_session(8);
        stale.inner.begin_evicting().await;
        pending.insert("c1".to_owned(), stale.inner.id.clone(), oneshot::channel().0).await;

        let result = enqueue_with_retry(stale, "{}", &registry, &pending, "c1", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(CoreError::PeerGone)));
    }

    #[tokio::test]
    async fn enqueue_with_retry_reports_congestion_without_retrying_when_session_is_still_active() {
        let registry = SessionRegistry::new();
        let pending = PendingTable::new();
        let (congested, rx) = make_session(8);
        drop(rx); // closes the outbound channel while the session stays Active

        let (other, _other_rx) = make_session(8);
        registry.insert(other).await;

        pending.insert("c1".to_owned(), congested.inner.id.clone(), oneshot::channel().0).await;

        let result = enqueue_with_retry(congested, "{}", &registry, &pending, "c1", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(CoreError::PeerCongested)));
    }

    #[tokio::test]
    async fn cancelled_call_does_not_deliver_a_late_reply() {
        let pending = PendingTable::new();
        let (tx, rx) = oneshot::channel();
        pending.insert("corr-1".to_owned(), "s1".to_owned(), tx).await;
        pending.cancel("corr-1").await;
        pending.resolve_success("corr-1", Value::Null).await;
        assert!(rx.await.is_err());
    }
}
