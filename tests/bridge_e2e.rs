//! End-to-end HTTP + WebSocket scenarios, mirroring the teacher's
//! integration-test convention (one server per test, bound to an
//! ephemeral port, driven with `reqwest`) but with a mock browser agent
//! standing in for the teacher's Postgres fixtures.

use browser_bridge::config::Config;
use browser_bridge::{build_router, AppState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::MaybeTlsStream;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct MockAgent {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockAgent {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let url = format!("ws://{addr}/ws");
        let (stream, _response) = tokio_tungstenite::connect_async(url).await.expect("ws connect");
        let (write, read) = stream.split();
        Self { write, read }
    }

    async fn send_json(&mut self, value: Value) {
        self.write
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("send frame");
    }

    /// Waits for the next action request frame and returns its decoded JSON.
    async fn recv_action(&mut self) -> Value {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).expect("valid json frame"),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => panic!("expected an action frame, got {other:?}"),
            }
        }
    }

    async fn reply_success(&mut self, request_id: &str, data: Value) {
        self.send_json(json!({"type": "response", "requestId": request_id, "data": data})).await;
    }

    async fn reply_error(&mut self, request_id: &str, error: &str) {
        self.send_json(json!({"type": "error", "requestId": request_id, "error": error})).await;
    }
}

async fn spawn_server(config: Config) -> std::net::SocketAddr {
    let state = AppState::new(config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    addr
}

async fn rpc_call(addr: std::net::SocketAddr, method: &str, params: Value) -> Value {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/mcp"))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}))
        .send()
        .await
        .expect("request should succeed");
    response.json().await.expect("response should be valid json")
}

#[tokio::test]
async fn health_endpoint_reports_zero_connections_before_any_agent_attaches() {
    let addr = spawn_server(Config::default()).await;
    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);
}

#[tokio::test]
async fn tools_call_without_an_agent_returns_no_peer_error() {
    let addr = spawn_server(Config::default()).await;
    let response = rpc_call(addr, "tools/call", json!({"name": "get_browser_tabs", "arguments": {}})).await;
    assert_eq!(response["error"]["code"], -32603);
    assert_eq!(response["error"]["data"]["tag"], "NO_PEER");
}

#[tokio::test]
async fn tools_list_and_initialize_describe_the_server_capabilities() {
    let addr = spawn_server(Config::default()).await;

    let init = rpc_call(addr, "initialize", json!({})).await;
    assert_eq!(init["result"]["serverInfo"]["name"], "browser-bridge");

    let tools = rpc_call(addr, "tools/list", json!({})).await;
    let names: Vec<&str> = tools["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"get_page_content"));
    assert!(names.contains(&"get_dom_snapshot"));
}

#[tokio::test]
async fn agent_round_trip_resolves_a_tools_call_successfully() {
    let addr = spawn_server(Config::default()).await;
    let mut agent = MockAgent::connect(addr).await;

    let call = tokio::spawn(async move {
        rpc_call(addr, "tools/call", json!({"name": "get_browser_tabs", "arguments": {}})).await
    });

    let action_frame = agent.recv_action().await;
    assert_eq!(action_frame["action"], "getAllTabs");
    let request_id = action_frame["requestId"].as_str().unwrap().to_owned();
    agent.reply_success(&request_id, json!([{"id": 1, "url": "https://example.com"}])).await;

    let response = call.await.unwrap();
    assert_eq!(response["result"][0]["id"], 1);
}

#[tokio::test]
async fn agent_error_reply_surfaces_as_agent_error_tag() {
    let addr = spawn_server(Config::default()).await;
    let mut agent = MockAgent::connect(addr).await;

    let call = tokio::spawn(async move {
        rpc_call(addr, "tools/call", json!({"name": "get_browser_tabs", "arguments": {}})).await
    });

    let action_frame = agent.recv_action().await;
    let request_id = action_frame["requestId"].as_str().unwrap().to_owned();
    agent.reply_error(&request_id, "tab closed mid-call").await;

    let response = call.await.unwrap();
    assert_eq!(response["error"]["data"]["tag"], "AGENT_ERROR");
    assert!(response["error"]["message"].as_str().unwrap().contains("tab closed mid-call"));
}

#[tokio::test]
async fn action_times_out_with_message_naming_the_action_and_configured_seconds() {
    let mut config = Config::default();
    config.default_action_timeout = std::time::Duration::from_millis(50);
    let addr = spawn_server(config).await;
    let mut agent = MockAgent::connect(addr).await;

    let call = tokio::spawn(async move {
        rpc_call(addr, "tools/call", json!({"name": "get_browser_tabs", "arguments": {}})).await
    });

    let _action_frame = agent.recv_action().await;
    // Deliberately never reply.

    let response = call.await.unwrap();
    assert_eq!(response["error"]["data"]["tag"], "TIMEOUT");
    let message = response["error"]["message"].as_str().unwrap();
    assert!(message.contains("timeout"));
}

#[tokio::test]
async fn console_messages_paginate_via_cursor_over_a_frozen_result_set() {
    let addr = spawn_server(Config::default()).await;
    let mut agent = MockAgent::connect(addr).await;

    let call = tokio::spawn(async move {
        rpc_call(
            addr,
            "tools/call",
            json!({"name": "get_console_messages", "arguments": {"pageSize": 50, "logLevels": ["error", "warn", "info", "log", "debug"]}}),
        )
        .await
    });

    let action_frame = agent.recv_action().await;
    let request_id = action_frame["requestId"].as_str().unwrap().to_owned();
    let messages: Vec<Value> = (0..120)
        .map(|i| json!({"level": "error", "text": format!("message {i}"), "timestamp": i}))
        .collect();
    agent.reply_success(&request_id, json!({"messages": messages})).await;

    let first_page = call.await.unwrap();
    let first_result = &first_page["result"];
    assert_eq!(first_result["count"], 50);
    assert_eq!(first_result["total"], 120);
    assert_eq!(first_result["hasMore"], true);
    let cursor = first_result["nextCursor"].as_str().unwrap().to_owned();

    let second = rpc_call(
        addr,
        "tools/call",
        json!({"name": "get_console_messages", "arguments": {"cursor": cursor, "pageSize": 50}}),
    )
    .await;
    assert_eq!(second["result"]["count"], 50);
    let cursor2 = second["result"]["nextCursor"].as_str().unwrap().to_owned();

    let third = rpc_call(
        addr,
        "tools/call",
        json!({"name": "get_console_messages", "arguments": {"cursor": cursor2, "pageSize": 50}}),
    )
    .await;
    assert_eq!(third["result"]["count"], 20);
    assert_eq!(third["result"]["hasMore"], false);
}

#[tokio::test]
async fn resources_read_returns_not_found_for_a_tab_with_no_snapshot() {
    let addr = spawn_server(Config::default()).await;
    let response = rpc_call(addr, "resources/read", json!({"uri": "tab/1/content"})).await;
    assert_eq!(response["error"]["data"]["tag"], "NOT_FOUND");
}

#[tokio::test]
async fn a_second_agent_connection_evicts_the_first() {
    let addr = spawn_server(Config::default()).await;
    let mut first = MockAgent::connect(addr).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let _second = MockAgent::connect(addr).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // The first agent's socket should now be closed server-side.
    let closed = matches!(first.read.next().await, Some(Ok(Message::Close(_))) | None);
    assert!(closed);
}
