//! Document-store contract: filtered search, conditional writes, terms
//! aggregations, and paged scans.
//!
//! All cross-actor coordination in this crate rides on the store's
//! per-document optimistic concurrency; nothing here takes a lock. The
//! contract is a trait so the claim and reporting layers stay
//! backend-agnostic and tests run against the bundled [`MemoryStore`]. A
//! networked backend implements the same surface against the real index.

pub mod memory;

pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::model::{ItemId, Payload, Status, WorkItem};

// ---------------------------------------------------------------------------
// Contract types
// ---------------------------------------------------------------------------

/// Opaque per-document concurrency token.
///
/// Backends put whatever they check and bump in here: a sequence number, an
/// etag, a generation. Callers never interpret it; they only carry it from a
/// read to the conditional write it guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document as reads return it: the body plus its store-side identity.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub id: ItemId,
    pub version: VersionToken,
    pub item: WorkItem,
}

/// Exact-match filters over the keyword fields of the stored schema.
///
/// An unset field means no filter on that field. There is no fuzzy matching
/// anywhere in the contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    /// Exact match on `meta.script`.
    pub script: Option<String>,
    /// Exact match on `status`.
    pub status: Option<Status>,
}

impl SearchFilter {
    pub fn for_script(script: impl Into<String>) -> Self {
        Self {
            script: Some(script.into()),
            status: None,
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Does `item` satisfy every set field?
    pub fn matches(&self, item: &WorkItem) -> bool {
        if let Some(script) = &self.script {
            if &item.meta.script != script {
                return false;
            }
        }
        if let Some(status) = self.status {
            if item.status != status {
                return false;
            }
        }
        true
    }
}

/// Partial document for conditional writes. Only set fields are written;
/// everything else in the stored body stays as it was.
///
/// Serializes to the exact partial `_source` fragment a remote backend
/// submits, payload under the `instruction` key like [`WorkItem`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(rename = "instruction", skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

/// What a conditional write came back with.
///
/// A version conflict is a normal outcome, not an error: the claim loop
/// matches on it and moves to a fresh candidate. Transport and availability
/// failures surface as `Err` instead.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The guarded write landed; the document now carries `version`.
    Applied { version: VersionToken },
    /// The expected token was stale. The document currently carries
    /// `current` and was not touched.
    VersionConflict { current: VersionToken },
}

/// Keyword fields the contract can aggregate over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordField {
    Status,
    UpdatedBy,
    Script,
}

impl KeywordField {
    /// The stored field path, exactly as indexed.
    pub fn field_name(self) -> &'static str {
        match self {
            KeywordField::Status => "status",
            KeywordField::UpdatedBy => "updated_by",
            KeywordField::Script => "meta.script",
        }
    }
}

/// One group of a terms aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermsBucket {
    pub key: String,
    pub count: u64,
}

/// Server-side scan handle. Holds state in the store until released with
/// `close_cursor` or until its keep-alive lapses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CursorId(String);

impl CursorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CursorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Backend contract for the claim protocol and the reporting layer.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// The first `limit` documents matching `filter`, in the store's natural
    /// order. That order is a stable tie-break, not a scheduling guarantee;
    /// callers must not read priority into it.
    async fn search(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<StoredItem>>;

    /// Point read by id. `None` if the document does not exist.
    async fn get(&self, id: &ItemId) -> Result<Option<StoredItem>>;

    /// Conditional partial write guarded by `expected`.
    ///
    /// The version check and the write are atomic on the store side: a stale
    /// `expected` yields [`UpdateOutcome::VersionConflict`] with the
    /// document untouched, never a silent overwrite.
    async fn update(
        &self,
        id: &ItemId,
        expected: &VersionToken,
        update: DocumentUpdate,
    ) -> Result<UpdateOutcome>;

    /// Per-value document counts for `field` among documents matching
    /// `filter`, capped at `max_buckets` groups. Buckets come back
    /// count-descending, ties key-ascending; values beyond the cap are
    /// silently absent.
    async fn terms_counts(
        &self,
        filter: &SearchFilter,
        field: KeywordField,
        max_buckets: usize,
    ) -> Result<Vec<TermsBucket>>;

    /// Open a paged scan over `filter` with the given page size and
    /// keep-alive. The handle must be released with `close_cursor` on every
    /// exit path, successful or not.
    async fn open_cursor(
        &self,
        filter: &SearchFilter,
        page_size: usize,
        ttl: Duration,
    ) -> Result<CursorId>;

    /// The next page of an open scan. An empty page means the scan is
    /// drained; fetching past an expired or unknown cursor is
    /// [`crate::error::Error::CursorExpired`].
    async fn fetch_page(&self, cursor: &CursorId) -> Result<Vec<StoredItem>>;

    /// Release a scan handle. Idempotent: closing an unknown or already
    /// expired cursor succeeds.
    async fn close_cursor(&self, cursor: &CursorId) -> Result<()>;
}
