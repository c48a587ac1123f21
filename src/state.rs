//! Process-wide shared state, wiring every component together. Mirrors the
//! teacher's `AppState` (see `state.rs`): one `Clone`-cheap struct threaded
//! through axum via `State`, holding `Arc`-wrapped component handles rather
//! than owning them directly.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::Config;
use crate::cursor::CursorStore;
use crate::dispatch::{self, PendingTable};
use crate::error::CoreError;
use crate::filter::{ConsoleMessage, ShapedNetworkRequest};
use crate::session::SessionRegistry;
use crate::snapshot::SnapshotCache;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub pending: Arc<PendingTable>,
    pub snapshots: Arc<SnapshotCache>,
    pub console_cursors: Arc<CursorStore<ConsoleMessage>>,
    pub network_cursors: Arc<CursorStore<ShapedNetworkRequest>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let cursor_ttl = config.cursor_ttl;
        Self {
            config: Arc::new(config),
            sessions: Arc::new(SessionRegistry::new()),
            pending: Arc::new(PendingTable::new()),
            snapshots: Arc::new(SnapshotCache::new()),
            console_cursors: Arc::new(CursorStore::new(cursor_ttl)),
            network_cursors: Arc::new(CursorStore::new(cursor_ttl)),
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::new(Config::default())
    }

    /// Thin wrapper over the dispatcher (spec §4.F) so call sites in G
    /// never need to reach into `sessions`/`pending` directly.
    pub async fn dispatch_action(
        &self,
        action: &'static str,
        params: Value,
        tab_id: Option<u64>,
        timeout_override_ms: Option<u64>,
    ) -> Result<Value, CoreError> {
        dispatch::dispatch(
            action,
            params,
            tab_id,
            timeout_override_ms,
            &self.config,
            &self.sessions,
            &self.pending,
            &self.snapshots,
        )
        .await
    }

    /// Forces the stale-session sweep described in spec §4.E, returning
    /// the resulting active count (used by `POST /cleanup-connections`).
    pub async fn sweep_stale_sessions(&self) -> usize {
        self.sessions.sweep_stale(self.config.stale_session_threshold).await
    }

    pub async fn active_connection_count(&self) -> usize {
        self.sessions.active_count().await
    }

    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval
    }
}
