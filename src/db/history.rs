//! Query history log.
//!
//! Append-only record of every statement run through `execute_query`, shared by all tool
//! invocations in the process.

use crate::models::QueryHistoryEntry;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct QueryHistory {
    entries: RwLock<Vec<QueryHistoryEntry>>,
}

impl QueryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry. `error` is set only for failed statements.
    pub async fn record(
        &self,
        query: impl Into<String>,
        duration_secs: f64,
        row_count: usize,
        error: Option<String>,
    ) -> QueryHistoryEntry {
        let entry = QueryHistoryEntry {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            timestamp: Utc::now().to_rfc3339(),
            duration: duration_secs.max(0.0),
            row_count,
            success: error.is_none(),
            error,
        };
        debug!(
            id = %entry.id,
            success = entry.success,
            row_count = entry.row_count,
            "Recorded query history entry"
        );
        self.entries.write().await.push(entry.clone());
        entry
    }

    /// Up to `limit` most recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<QueryHistoryEntry> {
        let entries = self.entries.read().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
