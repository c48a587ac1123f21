//! Filter/shape engine (spec §4.C): stateless pure functions over the three
//! collections the tools expose. Nothing here touches the network or the
//! session layer — it only reshapes data already sitting in the snapshot
//! cache.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::buffer::{self, DomNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Error,
    Warn,
    Info,
    Log,
    Debug,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessage {
    pub level: ConsoleLevel,
    pub text: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ConsoleFilter {
    pub levels: Option<BTreeSet<ConsoleLevel>>,
    pub search_term: Option<String>,
    pub since: Option<i64>,
}

fn default_console_levels() -> BTreeSet<ConsoleLevel> {
    BTreeSet::from([ConsoleLevel::Error, ConsoleLevel::Warn])
}

/// Filters console messages, preserving input order. Pagination happens
/// afterward, in the cursor store.
pub fn filter_console(messages: &[ConsoleMessage], filter: &ConsoleFilter) -> Vec<ConsoleMessage> {
    let levels = filter.levels.clone().unwrap_or_else(default_console_levels);
    let search_term = filter.search_term.as_ref().map(|s| s.to_lowercase());

    messages
        .iter()
        .filter(|m| levels.contains(&m.level))
        .filter(|m| filter.since.map_or(true, |since| m.timestamp >= since))
        .filter(|m| {
            search_term
                .as_ref()
                .is_none_or(|term| m.text.to_lowercase().contains(term))
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequest {
    pub method: String,
    /// 0 means "no response observed" (connection error, aborted, etc.).
    pub status: u32,
    pub url: String,
    pub resource_type: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkFilter {
    pub method: Option<String>,
    pub status: Option<BTreeSet<u32>>,
    pub resource_type: Option<BTreeSet<String>>,
    pub domain: Option<String>,
    pub failed_only: bool,
    pub include_request_bodies: bool,
    pub include_response_bodies: bool,
}

fn is_failed(status: u32) -> bool {
    status >= 400 || status == 0
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_owned))
}

fn shape_body(body: &Option<String>, include: bool, byte_limit: usize) -> serde_json::Value {
    match body {
        None => serde_json::json!({ "omitted": true, "originalSize": 0 }),
        Some(text) if !include => {
            serde_json::json!({ "omitted": true, "originalSize": text.len() })
        }
        Some(text) => {
            let (truncated, original_len, was_truncated) = buffer::truncate_text(text, byte_limit);
            serde_json::json!({
                "omitted": false,
                "text": truncated,
                "originalSize": original_len,
                "truncated": was_truncated,
            })
        }
    }
}

/// One network request after body shaping, ready to serialize as a tool
/// result row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapedNetworkRequest {
    pub method: String,
    pub status: u32,
    pub url: String,
    pub resource_type: String,
    pub timestamp: i64,
    pub request_body: serde_json::Value,
    pub response_body: serde_json::Value,
}

/// Filters, then (if no structural filter narrowed the set, or `failed_only`
/// was requested) stably sorts failed requests ahead of successful ones,
/// then shapes bodies per `filter`'s inclusion flags.
pub fn filter_network(
    requests: &[NetworkRequest],
    filter: &NetworkFilter,
    body_byte_limit: usize,
) -> Vec<ShapedNetworkRequest> {
    let structural_filter_active = filter.method.is_some()
        || filter.status.is_some()
        || filter.resource_type.is_some()
        || filter.domain.is_some();

    let mut filtered: Vec<&NetworkRequest> = requests
        .iter()
        .filter(|r| {
            filter
                .method
                .as_ref()
                .is_none_or(|m| m.eq_ignore_ascii_case(&r.method))
        })
        .filter(|r| filter.status.as_ref().is_none_or(|set| set.contains(&r.status)))
        .filter(|r| {
            filter
                .resource_type
                .as_ref()
                .is_none_or(|set| set.contains(&r.resource_type))
        })
        .filter(|r| match &filter.domain {
            None => true,
            Some(domain) => host_of(&r.url).is_some_and(|host| host.contains(domain.as_str())),
        })
        .filter(|r| !filter.failed_only || is_failed(r.status))
        .collect();

    if !structural_filter_active || filter.failed_only {
        filtered.sort_by_key(|r| !is_failed(r.status));
    }

    filtered
        .into_iter()
        .map(|r| ShapedNetworkRequest {
            method: r.method.clone(),
            status: r.status,
            url: r.url.clone(),
            resource_type: r.resource_type.clone(),
            timestamp: r.timestamp,
            request_body: shape_body(&r.request_body, filter.include_request_bodies, body_byte_limit),
            response_body: shape_body(&r.response_body, filter.include_response_bodies, body_byte_limit),
        })
        .collect()
}

/// A parsed `#id` / `.class` / bare-`tag` selector. Anything else is
/// rejected by `Selector::parse` rather than silently ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Id(String),
    Class(String),
    Tag(String),
}

impl Selector {
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(id) = raw.strip_prefix('#') {
            (!id.is_empty()).then(|| Selector::Id(id.to_owned()))
        } else if let Some(class) = raw.strip_prefix('.') {
            (!class.is_empty()).then(|| Selector::Class(class.to_owned()))
        } else if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            Some(Selector::Tag(raw.to_owned()))
        } else {
            None
        }
    }

    fn matches(&self, node: &DomNode) -> bool {
        match self {
            Selector::Id(id) => node.attrs.get("id").is_some_and(|v| v == id),
            Selector::Class(class) => node
                .attrs
                .get("class")
                .is_some_and(|v| v.split_whitespace().any(|c| c == class)),
            Selector::Tag(tag) => node.tag.eq_ignore_ascii_case(tag),
        }
    }
}

fn find_first(node: &DomNode, selector: &Selector) -> Option<DomNode> {
    if selector.matches(node) {
        return Some(node.clone());
    }
    node.children.iter().find_map(|child| find_first(child, selector))
}

fn prune_tags(node: &DomNode, drop_tags: &BTreeSet<&str>) -> DomNode {
    DomNode {
        tag: node.tag.clone(),
        attrs: node.attrs.clone(),
        text: node.text.clone(),
        truncated: node.truncated,
        children: node
            .children
            .iter()
            .filter(|child| !drop_tags.contains(child.tag.as_str()))
            .map(|child| prune_tags(child, drop_tags))
            .collect(),
    }
}

fn strip_computed_style(node: &DomNode) -> DomNode {
    DomNode {
        tag: node.tag.clone(),
        attrs: node
            .attrs
            .iter()
            .filter(|(k, _)| k.as_str() != "computed-style")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        text: node.text.clone(),
        truncated: node.truncated,
        children: node.children.iter().map(strip_computed_style).collect(),
    }
}

#[derive(Debug, Clone)]
pub struct DomFilter {
    pub selector: Option<Selector>,
    pub remove_scripts: bool,
    pub remove_styles: bool,
    pub strip_computed_style: bool,
    pub max_nodes: usize,
    pub max_depth: usize,
}

impl Default for DomFilter {
    fn default() -> Self {
        Self {
            selector: None,
            remove_scripts: true,
            remove_styles: true,
            strip_computed_style: false,
            max_nodes: 500,
            max_depth: usize::MAX,
        }
    }
}

pub enum DomFilterOutcome {
    Tree { root: DomNode, visited: usize, truncated: bool },
    SelectorNotFound,
}

/// Applies selection, structural pruning, computed-style stripping, and
/// node-count truncation, in that order (spec §4.C).
pub fn filter_dom(root: &DomNode, filter: &DomFilter) -> DomFilterOutcome {
    let selected = match &filter.selector {
        Some(selector) => match find_first(root, selector) {
            Some(subtree) => subtree,
            None => return DomFilterOutcome::SelectorNotFound,
        },
        None => root.clone(),
    };

    let mut drop_tags = BTreeSet::new();
    if filter.remove_scripts {
        drop_tags.insert("script");
    }
    if filter.remove_styles {
        drop_tags.insert("style");
    }
    let pruned = if drop_tags.is_empty() {
        selected
    } else {
        prune_tags(&selected, &drop_tags)
    };

    let styled = if filter.strip_computed_style {
        strip_computed_style(&pruned)
    } else {
        pruned
    };

    let (root, visited, truncated) = buffer::truncate_tree(&styled, filter.max_nodes, filter.max_depth);
    DomFilterOutcome::Tree {
        root,
        visited,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(level: ConsoleLevel, text: &str, ts: i64) -> ConsoleMessage {
        ConsoleMessage {
            level,
            text: text.to_owned(),
            timestamp: ts,
        }
    }

    #[test]
    fn console_filter_defaults_to_error_and_warn() {
        let messages = vec![
            msg(ConsoleLevel::Error, "boom", 1),
            msg(ConsoleLevel::Info, "fyi", 2),
            msg(ConsoleLevel::Warn, "careful", 3),
        ];
        let result = filter_console(&messages, &ConsoleFilter::default());
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].text, "boom");
        assert_eq!(result[1].text, "careful");
    }

    #[test]
    fn console_filter_search_term_is_case_insensitive() {
        let messages = vec![msg(ConsoleLevel::Error, "Network Timeout", 1)];
        let filter = ConsoleFilter {
            levels: Some(BTreeSet::from([ConsoleLevel::Error])),
            search_term: Some("timeout".to_owned()),
            since: None,
        };
        assert_eq!(filter_console(&messages, &filter).len(), 1);
    }

    fn req(method: &str, status: u32, url: &str) -> NetworkRequest {
        NetworkRequest {
            method: method.to_owned(),
            status,
            url: url.to_owned(),
            resource_type: "fetch".to_owned(),
            timestamp: 0,
            request_body: None,
            response_body: Some("{\"ok\":true}".to_owned()),
        }
    }

    #[test]
    fn network_filter_sorts_failed_requests_first_when_no_structural_filter() {
        let requests = vec![
            req("GET", 200, "https://example.com/a"),
            req("GET", 500, "https://example.com/b"),
            req("GET", 200, "https://example.com/c"),
        ];
        let shaped = filter_network(&requests, &NetworkFilter::default(), 1000);
        assert_eq!(shaped[0].url, "https://example.com/b");
        assert_eq!(shaped[1].url, "https://example.com/a");
        assert_eq!(shaped[2].url, "https://example.com/c");
    }

    #[test]
    fn network_filter_domain_matches_host_substring() {
        let requests = vec![
            req("GET", 200, "https://api.example.com/a"),
            req("GET", 200, "https://other.test/b"),
        ];
        let filter = NetworkFilter {
            domain: Some("example.com".to_owned()),
            ..Default::default()
        };
        let shaped = filter_network(&requests, &filter, 1000);
        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped[0].url, "https://api.example.com/a");
    }

    #[test]
    fn network_filter_omits_bodies_unless_requested() {
        let requests = vec![req("GET", 200, "https://example.com/a")];
        let shaped = filter_network(&requests, &NetworkFilter::default(), 1000);
        assert_eq!(shaped[0].response_body["omitted"], true);
        assert!(shaped[0].response_body.get("text").is_none());
    }

    #[test]
    fn network_filter_includes_and_truncates_bodies_when_requested() {
        let requests = vec![req("GET", 200, "https://example.com/a")];
        let filter = NetworkFilter {
            include_response_bodies: true,
            ..Default::default()
        };
        let shaped = filter_network(&requests, &filter, 5);
        assert_eq!(shaped[0].response_body["omitted"], false);
        assert_eq!(shaped[0].response_body["truncated"], true);
    }

    #[test]
    fn selector_parse_accepts_only_three_forms() {
        assert_eq!(Selector::parse("#main"), Some(Selector::Id("main".into())));
        assert_eq!(Selector::parse(".card"), Some(Selector::Class("card".into())));
        assert_eq!(Selector::parse("div"), Some(Selector::Tag("div".into())));
        assert_eq!(Selector::parse("div > p"), None);
        assert_eq!(Selector::parse("#"), None);
    }

    fn node(tag: &str, attrs: &[(&str, &str)], children: Vec<DomNode>) -> DomNode {
        DomNode {
            tag: tag.to_owned(),
            attrs: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            children,
            text: None,
            truncated: None,
        }
    }

    #[test]
    fn dom_filter_selector_returns_first_matching_subtree() {
        let tree = node(
            "html",
            &[],
            vec![node(
                "body",
                &[],
                vec![node("div", &[("id", "main")], vec![node("p", &[], vec![])])],
            )],
        );
        let filter = DomFilter {
            selector: Selector::parse("#main"),
            ..Default::default()
        };
        match filter_dom(&tree, &filter) {
            DomFilterOutcome::Tree { root, .. } => assert_eq!(root.tag, "div"),
            DomFilterOutcome::SelectorNotFound => panic!("expected a match"),
        }
    }

    #[test]
    fn dom_filter_selector_not_found_is_reported_distinctly() {
        let tree = node("html", &[], vec![]);
        let filter = DomFilter {
            selector: Selector::parse("#missing"),
            ..Default::default()
        };
        assert!(matches!(filter_dom(&tree, &filter), DomFilterOutcome::SelectorNotFound));
    }

    #[test]
    fn dom_filter_caps_depth_when_max_depth_is_set() {
        let tree = node(
            "html",
            &[],
            vec![node("body", &[], vec![node("div", &[], vec![node("p", &[], vec![])])])],
        );
        let filter = DomFilter {
            max_depth: 2,
            ..Default::default()
        };
        match filter_dom(&tree, &filter) {
            DomFilterOutcome::Tree { root, truncated, .. } => {
                assert!(truncated);
                let body = &root.children[0];
                assert!(body.children[0].truncated.is_some());
            }
            DomFilterOutcome::SelectorNotFound => panic!("no selector was set"),
        }
    }

    #[test]
    fn dom_filter_removes_script_and_style_by_default() {
        let tree = node(
            "html",
            &[],
            vec![node("script", &[], vec![]), node("style", &[], vec![]), node("p", &[], vec![])],
        );
        match filter_dom(&tree, &DomFilter::default()) {
            DomFilterOutcome::Tree { root, .. } => {
                assert_eq!(root.children.len(), 1);
                assert_eq!(root.children[0].tag, "p");
            }
            DomFilterOutcome::SelectorNotFound => panic!("no selector was set"),
        }
    }
}
