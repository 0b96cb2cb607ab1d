//! Read-only reporting: progress, leaderboard, script inventory, export.
//!
//! Everything here is aggregation over the store; nothing writes. Counts
//! race with in-flight claims and finalizes, so a displayed number may be
//! stale by the time anyone reads it. That staleness is accepted. The write
//! path never depends on these reads.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tracing::debug;

use crate::anonymize::mask_identity;
use crate::error::Result;
use crate::model::{Status, WorkItem};
use crate::store::{CursorId, DocumentStore, KeywordField, SearchFilter};
use crate::telemetry::metrics;

/// Most groups (distinct statuses, annotators, or scripts) one aggregation
/// returns. Values beyond the cap are silently absent from the result.
pub const DEFAULT_MAX_GROUPS: usize = 1000;

/// Page size for cursor-backed exports.
const EXPORT_PAGE_SIZE: usize = 100;
/// Scan keep-alive between page fetches.
const EXPORT_CURSOR_TTL: Duration = Duration::from_secs(60);

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    /// Annotator identity, already masked for display.
    pub identity: String,
    /// Items this annotator has touched (in progress or finalized).
    pub count: u64,
}

/// Read-only progress and leaderboard queries over an injected store.
pub struct Reporter {
    store: Arc<dyn DocumentStore>,
    max_groups: usize,
}

impl Reporter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            max_groups: DEFAULT_MAX_GROUPS,
        }
    }

    /// Override the aggregation group cap.
    pub fn with_max_groups(mut self, max_groups: usize) -> Self {
        self.max_groups = max_groups;
        self
    }

    /// Fraction of items under `script` that have left `new`, in `[0, 1]`.
    ///
    /// An empty pool reports `0.0`, not an error: a script with nothing
    /// loaded is simply not started.
    pub async fn progress_fraction(&self, script: &str) -> Result<f64> {
        let filter = SearchFilter::for_script(script);
        let buckets = self
            .store
            .terms_counts(&filter, KeywordField::Status, self.max_groups)
            .await?;
        metrics::aggregation_reads().add(1, &[KeyValue::new("kind", "progress")]);

        let total: u64 = buckets.iter().map(|b| b.count).sum();
        if total == 0 {
            return Ok(0.0);
        }
        let worked: u64 = buckets
            .iter()
            .filter(|b| b.key != Status::New.as_str())
            .map(|b| b.count)
            .sum();
        Ok(worked as f64 / total as f64)
    }

    /// Per-annotator counts under `script`, identities masked, sorted
    /// ascending by count. Ties keep the store's bucket order.
    ///
    /// At most `max_groups` annotators are aggregated; anyone beyond the cap
    /// is silently missing from the board.
    pub async fn leaderboard(&self, script: &str) -> Result<Vec<LeaderboardEntry>> {
        let filter = SearchFilter::for_script(script);
        let buckets = self
            .store
            .terms_counts(&filter, KeywordField::UpdatedBy, self.max_groups)
            .await?;
        metrics::aggregation_reads().add(1, &[KeyValue::new("kind", "leaderboard")]);

        let mut entries: Vec<LeaderboardEntry> = buckets
            .into_iter()
            .map(|b| LeaderboardEntry {
                identity: mask_identity(&b.key),
                count: b.count,
            })
            .collect();
        // Stable sort, so equal counts stay in bucket order.
        entries.sort_by_key(|e| e.count);
        Ok(entries)
    }

    /// Distinct script identifiers present in the pool, busiest first.
    pub async fn scripts(&self) -> Result<Vec<String>> {
        let buckets = self
            .store
            .terms_counts(&SearchFilter::default(), KeywordField::Script, self.max_groups)
            .await?;
        metrics::aggregation_reads().add(1, &[KeyValue::new("kind", "scripts")]);
        Ok(buckets.into_iter().map(|b| b.key).collect())
    }

    /// Every accepted item under `script`, drained through a paged scan.
    ///
    /// The scan cursor holds server-side state, so it is released on every
    /// exit path, a failed page fetch included.
    pub async fn export_approved(&self, script: &str) -> Result<Vec<WorkItem>> {
        let filter = SearchFilter::for_script(script).with_status(Status::Ok);
        let cursor = self
            .store
            .open_cursor(&filter, EXPORT_PAGE_SIZE, EXPORT_CURSOR_TTL)
            .await?;
        metrics::cursor_operations().add(1, &[KeyValue::new("operation", "open")]);

        let drained = self.drain(&cursor).await;

        let closed = self.store.close_cursor(&cursor).await;
        metrics::cursor_operations().add(1, &[KeyValue::new("operation", "close")]);

        let items = drained?;
        closed?;
        debug!(script, count = items.len(), "exported approved items");
        Ok(items)
    }

    async fn drain(&self, cursor: &CursorId) -> Result<Vec<WorkItem>> {
        let mut items = Vec::new();
        loop {
            let page = self.store.fetch_page(cursor).await?;
            metrics::cursor_operations().add(1, &[KeyValue::new("operation", "fetch")]);
            if page.is_empty() {
                return Ok(items);
            }
            items.extend(page.into_iter().map(|stored| stored.item));
        }
    }
}
