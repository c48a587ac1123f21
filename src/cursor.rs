//! Pagination cursor store (spec §4.B): TTL'd opaque handles over frozen
//! result slices. Modeled on the teacher's correlation-id tables — a plain
//! `HashMap` behind a mutex, swept on every access rather than by a
//! dedicated background task.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

struct CursorEntry<T> {
    frozen_list: Vec<T>,
    next_offset: usize,
    created_at: Instant,
}

/// Outcome of resolving a page. `next_cursor` is `None` once the frozen
/// list is exhausted.
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub total: usize,
}

pub enum NextOutcome<T> {
    Page(Page<T>),
    NotFound,
}

/// Stores one generation of paginated results per cursor id. One store per
/// tool family (console messages, network requests) — entries never mix
/// types because the store is generic over `T`.
pub struct CursorStore<T> {
    entries: Mutex<HashMap<String, CursorEntry<T>>>,
    ttl: Duration,
}

impl<T: Clone> CursorStore<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn sweep(entries: &mut HashMap<String, CursorEntry<T>>, ttl: Duration) {
        let now = Instant::now();
        entries.retain(|_, entry| now.duration_since(entry.created_at) < ttl);
    }

    fn fresh_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// First page over a freshly computed `list`. If the list is longer
    /// than `limit`, allocates a cursor pointing at offset `limit`.
    pub async fn open(&self, list: Vec<T>, limit: usize) -> Page<T> {
        let total = list.len();
        let mut entries = self.entries.lock().await;
        Self::sweep(&mut entries, self.ttl);

        let limit = limit.max(1);
        let items: Vec<T> = list.iter().take(limit).cloned().collect();
        let next_cursor = if total > limit {
            let id = Self::fresh_id();
            entries.insert(
                id.clone(),
                CursorEntry {
                    frozen_list: list,
                    next_offset: limit,
                    created_at: Instant::now(),
                },
            );
            Some(id)
        } else {
            None
        };

        Page {
            items,
            next_cursor,
            total,
        }
    }

    /// Advance an existing cursor chain by `limit` more items. Returns
    /// `NotFound` for an unknown or expired cursor; the caller treats this
    /// as "start over", not as an error to surface up the stack.
    pub async fn next(&self, cursor_id: &str, limit: usize) -> NextOutcome<T> {
        let mut entries = self.entries.lock().await;
        Self::sweep(&mut entries, self.ttl);

        let Some(entry) = entries.remove(cursor_id) else {
            return NextOutcome::NotFound;
        };

        let limit = limit.max(1);
        let total = entry.frozen_list.len();
        let offset = entry.next_offset;
        let items: Vec<T> = entry
            .frozen_list
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        let new_offset = offset + items.len();

        let next_cursor = if new_offset < total {
            let id = Self::fresh_id();
            entries.insert(
                id.clone(),
                CursorEntry {
                    frozen_list: entry.frozen_list,
                    next_offset: new_offset,
                    created_at: entry.created_at,
                },
            );
            Some(id)
        } else {
            None
        };

        NextOutcome::Page(Page {
            items,
            next_cursor,
            total,
        })
    }
}

/// JSON-serializable envelope shared by every paginated tool reply (§6.3).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResult<T: Serialize> {
    pub data: Vec<T>,
    pub count: usize,
    pub total: usize,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl<T: Serialize> PagedResult<T> {
    pub fn from_page(page: Page<T>) -> Self {
        Self {
            count: page.items.len(),
            total: page.total,
            has_more: page.next_cursor.is_some(),
            data: page.items,
            next_cursor: page.next_cursor,
        }
    }
}
