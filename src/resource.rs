//! Resource reader (spec §4.H): parses `tab/{id}/{kind}` URIs and serves
//! cache-backed reads, truncating via 4.A on the way out.

use serde::Serialize;
use serde_json::Value;

use crate::buffer;
use crate::config::Config;
use crate::error::CoreError;
use crate::snapshot::SnapshotCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Content,
    Dom,
    Console,
}

pub struct ParsedUri {
    pub tab_id: u64,
    pub kind: ResourceKind,
}

/// Parses the exact form `tab/{integer_id}/{content|dom|console}`.
/// Anything else, including a missing/garbled scheme, is `INVALID_URI`.
pub fn parse_uri(uri: &str) -> Result<ParsedUri, CoreError> {
    let mut parts = uri.splitn(3, '/');
    let (Some("tab"), Some(id_part), Some(kind_part)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(CoreError::InvalidUri(uri.to_owned()));
    };
    let tab_id: u64 = id_part
        .parse()
        .map_err(|_| CoreError::InvalidUri(uri.to_owned()))?;
    let kind = match kind_part {
        "content" => ResourceKind::Content,
        "dom" => ResourceKind::Dom,
        "console" => ResourceKind::Console,
        _ => return Err(CoreError::InvalidUri(uri.to_owned())),
    };
    Ok(ParsedUri { tab_id, kind })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsoleResourcePayload {
    messages: Value,
    count: usize,
    limited: bool,
}

/// Reads the resource named by `uri`. `NOT_FOUND` if the tab has never
/// reported a snapshot.
pub async fn read_resource(uri: &str, config: &Config, snapshots: &SnapshotCache) -> Result<Value, CoreError> {
    let parsed = parse_uri(uri)?;
    let snapshot = snapshots
        .get(parsed.tab_id)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("tab {}", parsed.tab_id)))?;

    match parsed.kind {
        ResourceKind::Content => {
            let html = snapshot
                .page_content
                .as_ref()
                .and_then(|v| v.get("html"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let (text, original_len, truncated) = buffer::truncate_text(html, config.max_html_bytes);
            Ok(serde_json::json!({
                "html": text,
                "originalSize": original_len,
                "truncated": truncated,
            }))
        }
        ResourceKind::Dom => {
            let Some(dom) = snapshot.dom_snapshot.as_ref() else {
                return Ok(serde_json::json!(null));
            };
            let (tree, visited, truncated) = buffer::truncate_tree(dom, config.max_dom_nodes_default, usize::MAX);
            Ok(serde_json::json!({
                "dom": tree,
                "nodeCount": visited,
                "truncated": truncated,
            }))
        }
        ResourceKind::Console => {
            // `console_log_buffer` is always stored as a plain array (snapshot.rs
            // normalizes both write paths), so this only comes up empty when the
            // tab has never reported console data.
            let all: Vec<Value> = snapshot
                .console_log_buffer
                .as_ref()
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let total = all.len();
            let limit = config.console_ring_buffer_limit;
            let recent = if total > limit { all[total - limit..].to_vec() } else { all };
            let payload = ConsoleResourcePayload {
                count: recent.len(),
                messages: Value::Array(recent),
                limited: total > limit,
            };
            Ok(serde_json::to_value(payload).map_err(|e| CoreError::Internal(e.to_string()))?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uri_accepts_the_three_known_kinds() {
        let parsed = parse_uri("tab/7/content").unwrap();
        assert_eq!(parsed.tab_id, 7);
        assert_eq!(parsed.kind, ResourceKind::Content);

        assert_eq!(parse_uri("tab/7/dom").unwrap().kind, ResourceKind::Dom);
        assert_eq!(parse_uri("tab/7/console").unwrap().kind, ResourceKind::Console);
    }

    #[test]
    fn parse_uri_rejects_malformed_uris() {
        assert!(matches!(parse_uri("tab/abc/content"), Err(CoreError::InvalidUri(_))));
        assert!(matches!(parse_uri("tab/7/unknown"), Err(CoreError::InvalidUri(_))));
        assert!(matches!(parse_uri("not-a-tab-uri"), Err(CoreError::InvalidUri(_))));
    }

    #[tokio::test]
    async fn read_resource_reports_not_found_for_unknown_tab() {
        let config = Config::default();
        let snapshots = SnapshotCache::new();
        let result = read_resource("tab/1/content", &config, &snapshots).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn read_resource_returns_console_payload_with_count() {
        let config = Config::default();
        let snapshots = SnapshotCache::new();
        snapshots
            .apply_content_update(
                1,
                "content",
                None,
                serde_json::json!({"consoleLogBuffer": [{"level": "error", "text": "x"}]}),
                0,
            )
            .await;
        let result = read_resource("tab/1/console", &config, &snapshots).await.unwrap();
        assert_eq!(result["count"], 1);
        assert_eq!(result["limited"], false);
    }

    #[tokio::test]
    async fn read_resource_console_keeps_only_the_most_recent_limit_messages() {
        let config = Config::default();
        let snapshots = SnapshotCache::new();
        let messages: Vec<Value> = (0..150).map(|i| serde_json::json!({"text": format!("m{i}")})).collect();
        snapshots
            .apply_action_reply(1, bridge_protocol::actions::GET_CONSOLE_MESSAGES, &serde_json::json!({"messages": messages}))
            .await;

        let result = read_resource("tab/1/console", &config, &snapshots).await.unwrap();
        assert_eq!(result["count"], 100);
        assert_eq!(result["limited"], true);
        assert_eq!(result["messages"][0]["text"], "m50");
        assert_eq!(result["messages"][99]["text"], "m149");
    }
}
