//! Agent session (spec §4.E): owns exactly one browser-extension WebSocket
//! peer, its reader/writer/liveness tasks, and the evicting-session state
//! machine. Generalizes the teacher's single combined `tokio::select!` loop
//! (see `ws_forwarder.rs`) into three cooperating tasks, since exactly two
//! long-lived tasks plus a liveness timer is what the spec requires per
//! session.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bridge_protocol::AgentFrame;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::dispatch::PendingTable;
use crate::snapshot::SnapshotCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepting,
    Active,
    Evicting,
    Closed,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Shared session bookkeeping, reachable from the reader, writer, liveness
/// timer, the registry, and the dispatcher.
pub struct SessionInner {
    pub id: String,
    pub(crate) state: RwLock<SessionState>,
    pub(crate) last_activity_ms: AtomicU64,
    pub(crate) last_pong_ms: AtomicU64,
    pub(crate) consecutive_ping_failures: AtomicU32,
    pub(crate) outbound: mpsc::Sender<Message>,
    pub(crate) evicted: Notify,
}

impl SessionInner {
    pub async fn state_async(&self) -> SessionState {
        *self.state.read().await
    }

    pub fn touch_activity(&self) {
        self.last_activity_ms.store(now_millis() as u64, Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::Relaxed) as i64
    }

    pub fn record_pong(&self) {
        self.last_pong_ms.store(now_millis() as u64, Ordering::Relaxed);
        self.consecutive_ping_failures.store(0, Ordering::Relaxed);
    }

    /// Moves the session into `evicting` if it is currently `active`.
    /// Idempotent: a second call is a no-op. Wakes every waiter blocked on
    /// `wait_evicted`.
    pub async fn begin_evicting(&self) {
        let mut state = self.state.write().await;
        if *state == SessionState::Active || *state == SessionState::Accepting {
            *state = SessionState::Evicting;
            self.evicted.notify_waiters();
        }
    }

    pub async fn mark_closed(&self) {
        *self.state.write().await = SessionState::Closed;
        self.evicted.notify_waiters();
    }

    /// Resolves once this session enters `evicting` or `closed`. Captures
    /// the `Notify` future before checking state, so a transition that
    /// happens between the check and the await is never missed.
    pub async fn wait_evicted(&self) {
        loop {
            let notified = self.evicted.notified();
            if !matches!(*self.state.read().await, SessionState::Active | SessionState::Accepting) {
                return;
            }
            notified.await;
        }
    }

    pub async fn enqueue_frame(&self, frame: Message, write_timeout: Duration) -> Result<(), ()> {
        if !matches!(self.state_async().await, SessionState::Active) {
            return Err(());
        }
        tokio::time::timeout(write_timeout, self.outbound.send(frame))
            .await
            .map_err(|_| ())?
            .map_err(|_| ())
    }
}

#[derive(Clone)]
pub struct SessionHandle {
    pub inner: Arc<SessionInner>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<Vec<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: SessionHandle) {
        self.sessions.write().await.push(handle);
    }

    pub async fn remove(&self, id: &str) {
        self.sessions.write().await.retain(|h| h.inner.id != id);
    }

    /// Among `active` sessions, the one with the most recent activity.
    /// `None` if no session is active — the caller maps this to `NO_PEER`.
    pub async fn current(&self) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        let mut best: Option<&SessionHandle> = None;
        for handle in sessions.iter() {
            if handle.inner.state_async().await != SessionState::Active {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => handle.inner.last_activity_ms() > current.inner.last_activity_ms(),
            };
            if better {
                best = Some(handle);
            }
        }
        best.cloned()
    }

    pub async fn active_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        let mut count = 0;
        for handle in sessions.iter() {
            if handle.inner.state_async().await == SessionState::Active {
                count += 1;
            }
        }
        count
    }

    /// Evicts every currently active session. Used both when a fresh agent
    /// connects (only one agent is expected at a time) and by the stale
    /// sweep.
    pub async fn evict_all_active(&self) {
        let sessions = self.sessions.read().await;
        for handle in sessions.iter() {
            handle.inner.begin_evicting().await;
        }
    }

    /// Forces any `active` session whose `last_activity` predates
    /// `stale_threshold` into `evicting`. Returns the resulting active
    /// count.
    pub async fn sweep_stale(&self, stale_threshold: Duration) -> usize {
        let now = now_millis();
        let sessions = self.sessions.read().await;
        for handle in sessions.iter() {
            if handle.inner.state_async().await == SessionState::Active {
                let age = now - handle.inner.last_activity_ms();
                if age > stale_threshold.as_millis() as i64 {
                    handle.inner.begin_evicting().await;
                }
            }
        }
        drop(sessions);
        self.active_count().await
    }
}

/// Drives one accepted WebSocket connection end to end: spawns reader,
/// writer, and liveness tasks, registers the session, and evicts whatever
/// agent session preceded it (spec's decided open question: at most one
/// agent expected; a fresh connect proactively wins).
pub async fn run_session(
    socket: WebSocket,
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    pending: Arc<PendingTable>,
    snapshots: Arc<SnapshotCache>,
) {
    registry.evict_all_active().await;

    let id = Uuid::new_v4().to_string();
    let (outbound_tx, outbound_rx) = mpsc::channel(config.write_queue_depth);
    let inner = Arc::new(SessionInner {
        id: id.clone(),
        state: RwLock::new(SessionState::Active),
        last_activity_ms: AtomicU64::new(now_millis() as u64),
        last_pong_ms: AtomicU64::new(now_millis() as u64),
        consecutive_ping_failures: AtomicU32::new(0),
        outbound: outbound_tx,
        evicted: Notify::new(),
    });
    let handle = SessionHandle { inner: inner.clone() };
    registry.insert(handle.clone()).await;
    info!(session_id = %id, "agent session accepted");

    let (mut ws_write, mut ws_read) = socket.split();

    let writer_inner = inner.clone();
    let writer_task = tokio::spawn(async move {
        let mut outbound_rx = outbound_rx;
        while let Some(msg) = outbound_rx.recv().await {
            if ws_write.send(msg).await.is_err() {
                writer_inner.begin_evicting().await;
                break;
            }
        }
    });

    let liveness_inner = inner.clone();
    let liveness_config = config.clone();
    let liveness_task = tokio::spawn(async move {
        run_liveness(liveness_inner, liveness_config).await;
    });

    let reader_pending = pending.clone();
    let reader_snapshots = snapshots.clone();
    let reader_inner = inner.clone();
    let reader_id = id.clone();
    while let Some(frame) = ws_read.next().await {
        let Ok(msg) = frame else {
            break;
        };
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };
        reader_inner.touch_activity();
        handle_inbound(
            &text,
            &reader_inner,
            &reader_pending,
            &reader_snapshots,
            &reader_id,
        )
        .await;
    }

    inner.begin_evicting().await;
    liveness_task.abort();
    writer_task.abort();
    pending.fail_session(&id).await;
    inner.mark_closed().await;
    registry.remove(&id).await;
    info!(session_id = %id, "agent session closed");
}

async fn handle_inbound(
    text: &str,
    inner: &Arc<SessionInner>,
    pending: &Arc<PendingTable>,
    snapshots: &Arc<SnapshotCache>,
    session_id: &str,
) {
    let frame: AgentFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(session_id, error = %e, "dropping malformed agent frame");
            return;
        }
    };

    match frame {
        AgentFrame::Connection => {}
        AgentFrame::Ping(ping) => {
            let reply = bridge_protocol::DirectFrame::Pong {
                timestamp: now_millis(),
                original_timestamp: ping.timestamp,
            };
            if let Ok(json) = serde_json::to_string(&reply) {
                let _ = inner.enqueue_frame(Message::Text(json.into()), Duration::from_secs(5)).await;
            }
        }
        AgentFrame::Pong(_) => inner.record_pong(),
        AgentFrame::BrowserData(data) => {
            snapshots
                .apply_content_update(data.tab_id, &data.source, data.url, data.data, now_millis())
                .await;
        }
        AgentFrame::Response(resp) => {
            pending.resolve_success(&resp.request_id, resp.data).await;
        }
        AgentFrame::Error(err) => {
            pending.resolve_agent_error(&err.request_id, err.error).await;
        }
        AgentFrame::DevtoolsMessage(event) | AgentFrame::DebuggerEvent(event) => {
            if let Some(tab_id) = event.tab_id {
                snapshots.apply_debugger_event(tab_id, event.payload).await;
            }
        }
    }
}

/// Drives the per-session ping/pong liveness check. Each tick sends one
/// ping and then explicitly waits up to `config.ping_timeout` for
/// `record_pong` to move `last_pong_ms` forward — a ping that gets no pong
/// in that window counts as a failure in its own right, independent of the
/// outbound-queue backpressure timeout (`config.write_timeout`) used to
/// enqueue the ping frame itself. Three consecutive failures evicts the
/// session.
async fn run_liveness(inner: Arc<SessionInner>, config: Arc<Config>) {
    let mut ticker = tokio::time::interval(config.ping_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = inner.wait_evicted() => break,
        }
        if inner.state_async().await != SessionState::Active {
            break;
        }

        let pong_before = inner.last_pong_ms.load(Ordering::Relaxed);
        let ping = bridge_protocol::DirectFrame::Ping { timestamp: now_millis() };
        let sent = match serde_json::to_string(&ping) {
            Ok(json) => inner.enqueue_frame(Message::Text(json.into()), config.write_timeout).await.is_ok(),
            Err(_) => false,
        };

        let mut failed = !sent;
        if sent {
            tokio::select! {
                () = tokio::time::sleep(config.ping_timeout) => {
                    let pong_after = inner.last_pong_ms.load(Ordering::Relaxed);
                    failed = pong_after == pong_before;
                }
                () = inner.wait_evicted() => break,
            }
        }

        if failed {
            let failures = inner.consecutive_ping_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if failures >= 3 {
                warn!(session_id = %inner.id, "liveness threshold exceeded, evicting session");
                inner.begin_evicting().await;
                break;
            }
        } else {
            inner.consecutive_ping_failures.store(0, Ordering::Relaxed);
        }
    }
}
