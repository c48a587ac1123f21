use std::fmt;
use std::time::Duration;

use bridge_protocol::error_codes;
use serde_json::Value;

/// The core's internal error taxonomy (spec §7). Each variant carries what
/// it needs to render both a JSON-RPC `data.message` and, for the two
/// auxiliary HTTP endpoints, a status code.
#[derive(Debug, Clone)]
pub enum CoreError {
    NoPeer,
    PeerCongested,
    PeerGone,
    Timeout {
        action: &'static str,
        configured: Duration,
    },
    InvalidUri(String),
    NotFound(String),
    InvalidParams(String),
    UnknownMethod(String),
    AgentError(String),
    Internal(String),
}

impl CoreError {
    pub fn tag(&self) -> &'static str {
        match self {
            CoreError::NoPeer => error_codes::NO_PEER,
            CoreError::PeerCongested => error_codes::PEER_CONGESTED,
            CoreError::PeerGone => error_codes::PEER_GONE,
            CoreError::Timeout { .. } => error_codes::TIMEOUT,
            CoreError::InvalidUri(_) => error_codes::INVALID_URI,
            CoreError::NotFound(_) => error_codes::NOT_FOUND,
            CoreError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            CoreError::UnknownMethod(_) => error_codes::UNKNOWN_METHOD,
            CoreError::AgentError(_) => error_codes::AGENT_ERROR,
            CoreError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// The JSON-RPC error code this maps to at the HTTP boundary (spec §6.1, §7).
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            CoreError::InvalidParams(_) => -32602,
            CoreError::UnknownMethod(_) => -32601,
            _ => -32603,
        }
    }

    pub fn to_data(&self) -> Value {
        serde_json::json!({ "tag": self.tag(), "message": self.to_string() })
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::NoPeer => write!(f, "no browser extensions connected"),
            CoreError::PeerCongested => write!(f, "browser connection is congested, try again"),
            CoreError::PeerGone => write!(f, "browser extension disconnected before replying"),
            CoreError::Timeout { action, configured } => write!(
                f,
                "{action} timed out waiting for the browser extension (timeout: {}s)",
                configured.as_secs()
            ),
            CoreError::InvalidUri(uri) => write!(f, "invalid resource uri: {uri}"),
            CoreError::NotFound(what) => write!(f, "not found: {what}"),
            CoreError::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            CoreError::UnknownMethod(method) => write!(f, "unknown method: {method}"),
            CoreError::AgentError(text) => write!(f, "browser extension reported an error: {text}"),
            CoreError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}
