// bridge-protocol: wire types for the browser-agent WebSocket channel.
//
// All inbound frames (agent -> server) use a top-level `type` field for
// discriminated deserialization; field names are camelCase to match what the
// browser-side agent actually emits.

use serde::{Deserialize, Serialize};

/// One frame received from the browser agent over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "kebab-case")]
pub enum AgentFrame {
    /// Informational hello on connect; no response expected.
    Connection,
    /// Unsolicited liveness probe from the agent; must be echoed as `Pong`.
    Ping(PingFrame),
    /// Reply to a server-initiated `Ping`, or an unsolicited keepalive.
    Pong(PongFrame),
    /// Merges into the per-tab snapshot cache.
    #[serde(rename = "browser-data")]
    BrowserData(BrowserData),
    /// Successful reply to an outstanding action.
    Response(ActionResponse),
    /// Failed reply to an outstanding action.
    Error(ActionError),
    /// Ancillary devtools protocol traffic, appended to the debug ring buffer.
    #[serde(rename = "devtools-message")]
    DevtoolsMessage(DebugEvent),
    /// Ancillary debugger-domain event, appended to the debug ring buffer.
    #[serde(rename = "debugger-event")]
    DebuggerEvent(DebugEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingFrame {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongFrame {
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserData {
    /// One of `content`, `devtools`, `debugger`.
    pub source: String,
    pub tab_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub request_id: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionError {
    pub request_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<u64>,
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

/// An outbound action request: server -> agent.
///
/// `params` is flattened so the wire shape is `{action, requestId, tabId,
/// ...params}` rather than a nested object, matching the agent's expected
/// frame layout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionFrame {
    pub action: &'static str,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<u64>,
    #[serde(flatten)]
    pub params: serde_json::Value,
}

/// Outbound direct messages that are not action requests.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "kebab-case")]
pub enum DirectFrame {
    Ping { timestamp: i64 },
    Pong { timestamp: i64, original_timestamp: i64 },
}

/// The closed set of action names the agent understands (spec §6.2).
pub mod actions {
    pub const GET_PAGE_CONTENT: &str = "getPageContent";
    pub const GET_DOM_SNAPSHOT: &str = "getDOMSnapshot";
    pub const EXECUTE_SCRIPT: &str = "executeScript";
    pub const GET_CONSOLE_MESSAGES: &str = "getConsoleMessages";
    pub const GET_NETWORK_DATA: &str = "getNetworkData";
    pub const CAPTURE_SCREENSHOT: &str = "captureScreenshot";
    pub const GET_PERFORMANCE_METRICS: &str = "getPerformanceMetrics";
    pub const GET_ACCESSIBILITY_TREE: &str = "getAccessibilityTree";
    pub const GET_ALL_TABS: &str = "getAllTabs";
    pub const ATTACH_DEBUGGER: &str = "attachDebugger";
    pub const DETACH_DEBUGGER: &str = "detachDebugger";
    pub const GET_COOKIES: &str = "getCookies";
    pub const GET_STORAGE_DATA: &str = "getStorageData";
    pub const EMULATE_DEVICE: &str = "emulateDevice";
    pub const SET_USER_AGENT: &str = "setUserAgent";

    pub const ALL: &[&str] = &[
        GET_PAGE_CONTENT,
        GET_DOM_SNAPSHOT,
        EXECUTE_SCRIPT,
        GET_CONSOLE_MESSAGES,
        GET_NETWORK_DATA,
        CAPTURE_SCREENSHOT,
        GET_PERFORMANCE_METRICS,
        GET_ACCESSIBILITY_TREE,
        GET_ALL_TABS,
        ATTACH_DEBUGGER,
        DETACH_DEBUGGER,
        GET_COOKIES,
        GET_STORAGE_DATA,
        EMULATE_DEVICE,
        SET_USER_AGENT,
    ];

    /// Resolve a literal action name to its `'static str` form, so callers
    /// never need to own a heap string for something from the closed set.
    pub fn resolve(name: &str) -> Option<&'static str> {
        ALL.iter().copied().find(|a| *a == name)
    }
}

/// Frozen internal error tags (spec §7). Mapped to JSON-RPC/HTTP at the
/// boundary; never compared against by string literal at call sites.
pub mod error_codes {
    pub const NO_PEER: &str = "NO_PEER";
    pub const PEER_CONGESTED: &str = "PEER_CONGESTED";
    pub const PEER_GONE: &str = "PEER_GONE";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const INVALID_URI: &str = "INVALID_URI";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
    pub const UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";
    pub const AGENT_ERROR: &str = "AGENT_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}
