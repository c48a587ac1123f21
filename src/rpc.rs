//! Client JSON-RPC handler (spec §4.G): decodes one request per `/mcp`
//! POST, dispatches it to the right component, and centralizes error
//! mapping so no call site hand-assembles a JSON-RPC error code (spec
//! §4.K).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::cursor::{NextOutcome, PagedResult};
use crate::error::CoreError;
use crate::filter::{self, ConsoleFilter, ConsoleMessage, DomFilter, DomFilterOutcome, NetworkFilter, Selector};
use crate::state::AppState;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, err: &CoreError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(JsonRpcError {
                code: err.jsonrpc_code(),
                message: err.to_string(),
                data: Some(err.to_data()),
            }),
        }
    }

    fn unknown_method(id: Value, method: &str) -> Self {
        Self::err(id, &CoreError::UnknownMethod(method.to_owned()))
    }
}

/// `None` means "respond with bare HTTP 204", used only for
/// `notifications/initialized`.
pub async fn handle_request(request: JsonRpcRequest, state: &AppState) -> Option<JsonRpcResponse> {
    let id = request.id.clone().unwrap_or(Value::Null);

    match request.method.as_str() {
        "initialize" => Some(JsonRpcResponse::ok(id, initialize_result())),
        "notifications/initialized" => None,
        "tools/list" => Some(JsonRpcResponse::ok(id, tools_list_result())),
        "resources/list" => Some(JsonRpcResponse::ok(id, resources_list_result(state).await)),
        "resources/read" => Some(match resources_read(request.params, state).await {
            Ok(result) => JsonRpcResponse::ok(id, result),
            Err(e) => JsonRpcResponse::err(id, &e),
        }),
        "tools/call" => Some(match tools_call(request.params, state).await {
            Ok(result) => JsonRpcResponse::ok(id, result),
            Err(e) => JsonRpcResponse::err(id, &e),
        }),
        other => {
            warn!(method = other, "unrecognized JSON-RPC method");
            Some(JsonRpcResponse::unknown_method(id, other))
        }
    }
}

fn initialize_result() -> Value {
    serde_json::json!({
        "protocolVersion": "2024-11-05",
        "serverInfo": { "name": "browser-bridge", "version": env!("CARGO_PKG_VERSION") },
        "capabilities": { "tools": {}, "resources": {} },
    })
}

struct ToolDescriptor {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn tool_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "get_page_content",
            description: "Fetch the rendered page content of a browser tab.",
            input_schema: object_schema(
                serde_json::json!({
                    "tabId": {"type": "integer"},
                    "includeMetadata": {"type": "boolean", "default": true},
                    "includeHtml": {"type": "boolean", "default": false},
                    "maxTextLength": {"type": "integer", "default": 30_000},
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: "get_dom_snapshot",
            description: "Fetch a (possibly selector-scoped) DOM snapshot of a browser tab.",
            input_schema: object_schema(
                serde_json::json!({
                    "tabId": {"type": "integer"},
                    "selector": {"type": "string"},
                    "maxDepth": {"type": "integer", "default": 5, "maximum": 15},
                    "maxNodes": {"type": "integer", "default": 500, "maximum": 2000},
                    "includeStyles": {"type": "boolean", "default": false},
                    "excludeScripts": {"type": "boolean", "default": true},
                    "excludeStyles": {"type": "boolean", "default": true},
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: "get_console_messages",
            description: "Fetch filtered, paginated console messages for a browser tab.",
            input_schema: object_schema(
                serde_json::json!({
                    "tabId": {"type": "integer"},
                    "logLevels": {"type": "array", "items": {"type": "string"}},
                    "searchTerm": {"type": "string"},
                    "since": {"type": "integer"},
                    "pageSize": {"type": "integer", "default": 50, "maximum": 200},
                    "cursor": {"type": "string"},
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: "get_network_requests",
            description: "Fetch filtered, paginated network requests for a browser tab.",
            input_schema: object_schema(
                serde_json::json!({
                    "tabId": {"type": "integer"},
                    "method": {"type": "string"},
                    "status": {},
                    "resourceType": {},
                    "domain": {"type": "string"},
                    "failedOnly": {"type": "boolean", "default": false},
                    "pageSize": {"type": "integer", "default": 50, "maximum": 200},
                    "cursor": {"type": "string"},
                    "includeResponseBodies": {"type": "boolean", "default": false},
                    "includeRequestBodies": {"type": "boolean", "default": false},
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: "capture_screenshot",
            description: "Capture a screenshot of a browser tab.",
            input_schema: object_schema(
                serde_json::json!({
                    "tabId": {"type": "integer"},
                    "format": {"type": "string", "enum": ["png", "jpeg"]},
                    "quality": {"type": "integer", "minimum": 0, "maximum": 100},
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: "execute_javascript",
            description: "Execute a JavaScript snippet in the context of a browser tab.",
            input_schema: object_schema(
                serde_json::json!({
                    "tabId": {"type": "integer"},
                    "code": {"type": "string"},
                }),
                &["code"],
            ),
        },
        ToolDescriptor {
            name: "get_performance_metrics",
            description: "Fetch performance metrics for a browser tab.",
            input_schema: object_schema(serde_json::json!({"tabId": {"type": "integer"}}), &[]),
        },
        ToolDescriptor {
            name: "get_accessibility_tree",
            description: "Fetch the accessibility tree for a browser tab.",
            input_schema: object_schema(
                serde_json::json!({
                    "tabId": {"type": "integer"},
                    "timeout": {"type": "integer", "minimum": 5_000, "maximum": 120_000},
                }),
                &[],
            ),
        },
        ToolDescriptor {
            name: "get_browser_tabs",
            description: "List all tabs the browser extension currently knows about.",
            input_schema: object_schema(serde_json::json!({}), &[]),
        },
        ToolDescriptor {
            name: "attach_debugger",
            description: "Attach the Chrome DevTools Protocol debugger to a browser tab.",
            input_schema: object_schema(serde_json::json!({"tabId": {"type": "integer"}}), &["tabId"]),
        },
        ToolDescriptor {
            name: "detach_debugger",
            description: "Detach the Chrome DevTools Protocol debugger from a browser tab.",
            input_schema: object_schema(serde_json::json!({"tabId": {"type": "integer"}}), &["tabId"]),
        },
        ToolDescriptor {
            name: "get_cookies",
            description: "Fetch cookies visible to a browser tab.",
            input_schema: object_schema(serde_json::json!({"tabId": {"type": "integer"}}), &[]),
        },
        ToolDescriptor {
            name: "get_storage_data",
            description: "Fetch local/session storage data for a browser tab.",
            input_schema: object_schema(serde_json::json!({"tabId": {"type": "integer"}}), &[]),
        },
        ToolDescriptor {
            name: "emulate_device",
            description: "Apply device emulation to a browser tab.",
            input_schema: object_schema(
                serde_json::json!({"tabId": {"type": "integer"}, "device": {"type": "string"}}),
                &["device"],
            ),
        },
        ToolDescriptor {
            name: "set_user_agent",
            description: "Override the user agent string for a browser tab.",
            input_schema: object_schema(
                serde_json::json!({"tabId": {"type": "integer"}, "userAgent": {"type": "string"}}),
                &["userAgent"],
            ),
        },
    ]
}

fn tools_list_result() -> Value {
    let tools: Vec<Value> = tool_descriptors()
        .into_iter()
        .map(|t| {
            serde_json::json!({
                "name": t.name,
                "description": t.description,
                "inputSchema": t.input_schema,
            })
        })
        .collect();
    serde_json::json!({ "tools": tools })
}

async fn resources_list_result(state: &AppState) -> Value {
    let descriptors = state.snapshots.list_available().await;
    let resources: Vec<Value> = descriptors
        .into_iter()
        .map(|d| {
            serde_json::json!({
                "uri": d.uri,
                "name": format!("tab {} {}", d.tab_id, d.kind),
                "mimeType": if d.kind == "content" { "text/html" } else { "application/json" },
            })
        })
        .collect();
    serde_json::json!({ "resources": resources })
}

async fn resources_read(params: Value, state: &AppState) -> Result<Value, CoreError> {
    let uri = params
        .get("uri")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::InvalidParams("missing required field `uri`".to_owned()))?;
    let contents = crate::resource::read_resource(uri, &state.config, &state.snapshots).await?;
    Ok(serde_json::json!({
        "contents": [{ "uri": uri, "text": contents.to_string() }],
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

async fn tools_call(params: Value, state: &AppState) -> Result<Value, CoreError> {
    let call: ToolCallParams = serde_json::from_value(params)
        .map_err(|e| CoreError::InvalidParams(format!("malformed tools/call params: {e}")))?;
    let args = call.arguments;

    match call.name.as_str() {
        "get_page_content" => get_page_content(args, state).await,
        "get_dom_snapshot" => get_dom_snapshot(args, state).await,
        "get_console_messages" => get_console_messages(args, state).await,
        "get_network_requests" => get_network_requests(args, state).await,
        "capture_screenshot" => simple_action_tool(bridge_protocol::actions::CAPTURE_SCREENSHOT, args, state).await,
        "execute_javascript" => execute_javascript(args, state).await,
        "get_performance_metrics" => {
            simple_action_tool(bridge_protocol::actions::GET_PERFORMANCE_METRICS, args, state).await
        }
        "get_accessibility_tree" => get_accessibility_tree(args, state).await,
        "get_browser_tabs" => simple_action_tool(bridge_protocol::actions::GET_ALL_TABS, args, state).await,
        "attach_debugger" => simple_action_tool(bridge_protocol::actions::ATTACH_DEBUGGER, args, state).await,
        "detach_debugger" => simple_action_tool(bridge_protocol::actions::DETACH_DEBUGGER, args, state).await,
        "get_cookies" => simple_action_tool(bridge_protocol::actions::GET_COOKIES, args, state).await,
        "get_storage_data" => simple_action_tool(bridge_protocol::actions::GET_STORAGE_DATA, args, state).await,
        "emulate_device" => simple_action_tool(bridge_protocol::actions::EMULATE_DEVICE, args, state).await,
        "set_user_agent" => simple_action_tool(bridge_protocol::actions::SET_USER_AGENT, args, state).await,
        other => Err(CoreError::InvalidParams(format!("unknown tool: {other}"))),
    }
}

fn tab_id_of(args: &Value) -> Option<u64> {
    args.get("tabId").and_then(Value::as_u64)
}

/// Tools whose params pass straight through to the agent with no shaping
/// on the reply.
async fn simple_action_tool(action: &'static str, args: Value, state: &AppState) -> Result<Value, CoreError> {
    let tab_id = tab_id_of(&args);
    state.dispatch_action(action, args, tab_id, None).await
}

async fn get_page_content(args: Value, state: &AppState) -> Result<Value, CoreError> {
    let tab_id = tab_id_of(&args);
    let max_text_length = args
        .get("maxTextLength")
        .and_then(Value::as_u64)
        .map_or(state.config.max_text_chars, |v| v as usize);

    let reply = state
        .dispatch_action(bridge_protocol::actions::GET_PAGE_CONTENT, args, tab_id, None)
        .await?;

    let mut shaped = reply;
    if let Some(text) = shaped.get("text").and_then(Value::as_str).map(str::to_owned) {
        let (truncated, original_len, was_truncated) = crate::buffer::truncate_text(&text, max_text_length);
        if let Some(obj) = shaped.as_object_mut() {
            obj.insert("text".to_owned(), Value::String(truncated));
            obj.insert("originalTextLength".to_owned(), serde_json::json!(original_len));
            obj.insert("truncated".to_owned(), serde_json::json!(was_truncated));
        }
    }
    Ok(shaped)
}

async fn get_dom_snapshot(args: Value, state: &AppState) -> Result<Value, CoreError> {
    let tab_id = tab_id_of(&args);
    let max_nodes = args
        .get("maxNodes")
        .and_then(Value::as_u64)
        .map_or(state.config.max_dom_nodes_default, |v| v as usize)
        .min(state.config.max_dom_nodes_ceiling);
    let max_depth = args
        .get("maxDepth")
        .and_then(Value::as_u64)
        .map_or(state.config.dom_max_depth_default, |v| v as usize)
        .clamp(1, state.config.dom_max_depth_ceiling);
    let selector = args
        .get("selector")
        .and_then(Value::as_str)
        .map(|raw| Selector::parse(raw).ok_or_else(|| CoreError::InvalidParams(format!("invalid selector: {raw}"))))
        .transpose()?;

    let reply = state
        .dispatch_action(bridge_protocol::actions::GET_DOM_SNAPSHOT, args.clone(), tab_id, None)
        .await?;
    let dom: crate::buffer::DomNode = serde_json::from_value(reply)
        .map_err(|e| CoreError::AgentError(format!("agent returned an unparsable DOM snapshot: {e}")))?;

    let exclude_scripts = args.get("excludeScripts").and_then(Value::as_bool).unwrap_or(true);
    let exclude_styles = args.get("excludeStyles").and_then(Value::as_bool).unwrap_or(true);
    let include_styles = args.get("includeStyles").and_then(Value::as_bool).unwrap_or(false);

    let filter = DomFilter {
        selector,
        remove_scripts: exclude_scripts,
        remove_styles: exclude_styles,
        strip_computed_style: !include_styles,
        max_nodes,
        max_depth,
    };

    match filter::filter_dom(&dom, &filter) {
        DomFilterOutcome::SelectorNotFound => Err(CoreError::NotFound("selector matched no node".to_owned())),
        DomFilterOutcome::Tree { root, visited, truncated } => Ok(serde_json::json!({
            "dom": root,
            "nodeCount": visited,
            "truncated": truncated,
        })),
    }
}

fn parse_log_levels(args: &Value) -> Option<BTreeSet<filter::ConsoleLevel>> {
    let raw = args.get("logLevels")?.as_array()?;
    let mut levels = BTreeSet::new();
    for v in raw {
        let s = v.as_str()?;
        let level = serde_json::from_value(Value::String(s.to_owned())).ok()?;
        levels.insert(level);
    }
    Some(levels)
}

async fn get_console_messages(args: Value, state: &AppState) -> Result<Value, CoreError> {
    if let Some(cursor) = args.get("cursor").and_then(Value::as_str) {
        let page_size = page_size(&args, state);
        return match state.console_cursors.next(cursor, page_size).await {
            NextOutcome::NotFound => Err(CoreError::NotFound("cursor expired or unknown".to_owned())),
            NextOutcome::Page(page) => Ok(serde_json::to_value(PagedResult::from_page(page)).unwrap()),
        };
    }

    let tab_id = tab_id_of(&args);
    let reply = state
        .dispatch_action(bridge_protocol::actions::GET_CONSOLE_MESSAGES, args.clone(), tab_id, None)
        .await?;
    let messages: Vec<ConsoleMessage> = serde_json::from_value(reply.get("messages").cloned().unwrap_or(reply))
        .map_err(|e| CoreError::AgentError(format!("agent returned unparsable console messages: {e}")))?;

    let filter = ConsoleFilter {
        levels: parse_log_levels(&args),
        search_term: args.get("searchTerm").and_then(Value::as_str).map(str::to_owned),
        since: args.get("since").and_then(Value::as_i64),
    };
    let filtered = filter::filter_console(&messages, &filter);
    let page_size = page_size(&args, state);
    let page = state.console_cursors.open(filtered, page_size).await;
    Ok(serde_json::to_value(PagedResult::from_page(page)).unwrap())
}

async fn get_network_requests(args: Value, state: &AppState) -> Result<Value, CoreError> {
    if let Some(cursor) = args.get("cursor").and_then(Value::as_str) {
        let page_size = page_size(&args, state);
        return match state.network_cursors.next(cursor, page_size).await {
            NextOutcome::NotFound => Err(CoreError::NotFound("cursor expired or unknown".to_owned())),
            NextOutcome::Page(page) => Ok(serde_json::to_value(PagedResult::from_page(page)).unwrap()),
        };
    }

    let tab_id = tab_id_of(&args);
    let reply = state
        .dispatch_action(bridge_protocol::actions::GET_NETWORK_DATA, args.clone(), tab_id, None)
        .await?;
    let requests: Vec<filter::NetworkRequest> =
        serde_json::from_value(reply.get("requests").cloned().unwrap_or(reply))
            .map_err(|e| CoreError::AgentError(format!("agent returned unparsable network data: {e}")))?;

    let status_set = |v: &Value| -> Option<BTreeSet<u32>> {
        if let Some(n) = v.as_u64() {
            return Some(BTreeSet::from([n as u32]));
        }
        v.as_array().map(|a| a.iter().filter_map(Value::as_u64).map(|n| n as u32).collect())
    };
    let strings_set = |v: &Value| -> Option<BTreeSet<String>> {
        if let Some(s) = v.as_str() {
            return Some(BTreeSet::from([s.to_owned()]));
        }
        v.as_array()
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_owned).collect())
    };

    let filter = NetworkFilter {
        method: args.get("method").and_then(Value::as_str).map(str::to_owned),
        status: args.get("status").and_then(status_set),
        resource_type: args.get("resourceType").and_then(strings_set),
        domain: args.get("domain").and_then(Value::as_str).map(str::to_owned),
        failed_only: args.get("failedOnly").and_then(Value::as_bool).unwrap_or(false),
        include_request_bodies: args.get("includeRequestBodies").and_then(Value::as_bool).unwrap_or(false),
        include_response_bodies: args.get("includeResponseBodies").and_then(Value::as_bool).unwrap_or(false),
    };
    let shaped = filter::filter_network(&requests, &filter, state.config.max_response_body_bytes);
    let page_size = page_size(&args, state);
    let page = state.network_cursors.open(shaped, page_size).await;
    Ok(serde_json::to_value(PagedResult::from_page(page)).unwrap())
}

fn page_size(args: &Value, state: &AppState) -> usize {
    args.get("pageSize")
        .and_then(Value::as_u64)
        .map_or(state.config.default_page_size, |v| v as usize)
        .min(state.config.max_page_size)
}

async fn execute_javascript(args: Value, state: &AppState) -> Result<Value, CoreError> {
    if args.get("code").and_then(Value::as_str).is_none_or(str::is_empty) {
        return Err(CoreError::InvalidParams("`code` is required and must be non-empty".to_owned()));
    }
    let tab_id = tab_id_of(&args);
    state
        .dispatch_action(bridge_protocol::actions::EXECUTE_SCRIPT, args, tab_id, None)
        .await
}

async fn get_accessibility_tree(args: Value, state: &AppState) -> Result<Value, CoreError> {
    let tab_id = tab_id_of(&args);
    let timeout_ms = args.get("timeout").and_then(Value::as_u64);
    state
        .dispatch_action(bridge_protocol::actions::GET_ACCESSIBILITY_TREE, args.clone(), tab_id, timeout_ms)
        .await
}
