//! Bounded-buffer utilities (spec §4.A): deterministic truncation for text
//! and trees, plus a diagnostic size helper. None of these allocate
//! unboundedly and none treat truncation as an error condition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const MARKER_PREFIX: &str = "\n… [truncated; original length ";
const MARKER_SUFFIX: &str = " characters]";

fn marker_for(original_len: usize) -> String {
    format!("{MARKER_PREFIX}{original_len}{MARKER_SUFFIX}")
}

/// If `s` already ends with a truncation marker, returns the original
/// length recorded in it. Used so that re-truncating an already-truncated
/// string is a no-op (idempotency, spec §8 property 5).
fn already_truncated_len(s: &str) -> Option<usize> {
    let start = s.rfind(MARKER_PREFIX)?;
    let tail = &s[start + MARKER_PREFIX.len()..];
    let digits_end = tail.find(MARKER_SUFFIX)?;
    if &tail[digits_end..] != MARKER_SUFFIX {
        return None;
    }
    tail[..digits_end].parse().ok()
}

/// Truncate `s` to the first `limit` Unicode scalar values, appending a
/// marker noting the original length. Returns `(text, original_length,
/// was_truncated)`.
pub fn truncate_text(s: &str, limit: usize) -> (String, usize, bool) {
    if let Some(original_len) = already_truncated_len(s) {
        return (s.to_owned(), original_len, true);
    }

    let char_count = s.chars().count();
    if char_count <= limit {
        return (s.to_owned(), char_count, false);
    }

    let head: String = s.chars().take(limit).collect();
    let marked = format!("{head}{}", marker_for(char_count));
    (marked, char_count, true)
}

/// One node of a DOM-shaped tree. `truncated` is set only on the synthetic
/// placeholder node inserted where a traversal ran out of budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomNode {
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DomNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<TruncationMarker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationMarker {
    pub remaining_siblings: usize,
}

impl DomNode {
    pub fn leaf(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
            text: None,
            truncated: None,
        }
    }

    fn truncation_placeholder(remaining_siblings: usize) -> Self {
        Self {
            tag: String::new(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
            text: None,
            truncated: Some(TruncationMarker { remaining_siblings }),
        }
    }
}

/// Depth-first copy of `root` that halts once `visited_count >= max_nodes`
/// or a subtree reaches `max_depth`, inserting a placeholder node where the
/// walk stopped in either case. Returns `(tree, visited_count,
/// was_truncated)`. Pass `usize::MAX` for `max_depth` to disable the depth
/// cap.
pub fn truncate_tree(root: &DomNode, max_nodes: usize, max_depth: usize) -> (DomNode, usize, bool) {
    if max_nodes == 0 {
        return (DomNode::truncation_placeholder(1), 0, true);
    }

    let max_depth = max_depth.max(1);
    let mut visited = 0usize;
    let mut was_truncated = false;
    let tree = walk(root, max_nodes, max_depth, 0, &mut visited, &mut was_truncated);
    (tree, visited, was_truncated)
}

fn walk(
    node: &DomNode,
    max_nodes: usize,
    max_depth: usize,
    depth: usize,
    visited: &mut usize,
    was_truncated: &mut bool,
) -> DomNode {
    *visited += 1;

    if depth + 1 >= max_depth && !node.children.is_empty() {
        *was_truncated = true;
        return DomNode {
            tag: node.tag.clone(),
            attrs: node.attrs.clone(),
            children: vec![DomNode::truncation_placeholder(node.children.len())],
            text: node.text.clone(),
            truncated: None,
        };
    }

    let mut children = Vec::with_capacity(node.children.len());
    for (i, child) in node.children.iter().enumerate() {
        if *visited >= max_nodes {
            let remaining = node.children.len() - i;
            if remaining > 0 {
                children.push(DomNode::truncation_placeholder(remaining));
                *was_truncated = true;
            }
            break;
        }
        children.push(walk(child, max_nodes, max_depth, depth + 1, visited, was_truncated));
    }
    DomNode {
        tag: node.tag.clone(),
        attrs: node.attrs.clone(),
        children,
        text: node.text.clone(),
        truncated: None,
    }
}

/// Length of `x`'s JSON encoding. Diagnostic only — never a correctness
/// predicate, per spec.
pub fn size_of<T: Serialize>(x: &T) -> usize {
    serde_json::to_string(x).map(|s| s.len()).unwrap_or(0)
}
