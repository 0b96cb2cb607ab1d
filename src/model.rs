//! Core data model.
//!
//! A work item is one annotatable instruction record: an editable payload,
//! routing metadata, and a lifecycle status. The serde shape of [`WorkItem`]
//! matches the stored document field for field, so a serialized item is
//! exactly the `_source` body the index holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// The document body of one annotatable record.
///
/// The store-assigned id and version token are not part of the body; reads
/// carry them alongside it in [`crate::store::StoredItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Editable text fields, stored under the `instruction` key.
    #[serde(rename = "instruction")]
    pub payload: Payload,

    /// Current lifecycle status.
    pub status: Status,

    /// Identity of the last actor to change status. Absent until the first
    /// claim; a claim sets it, and a finalize overwrites it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,

    /// Refreshed on every status write.
    pub last_modified: DateTime<Utc>,

    /// Routing metadata.
    pub meta: Meta,
}

impl WorkItem {
    /// A freshly loaded record: `new`, unattributed, stamped now.
    pub fn new(script: impl Into<String>, payload: Payload) -> Self {
        Self {
            payload,
            status: Status::New,
            updated_by: None,
            last_modified: Utc::now(),
            meta: Meta {
                script: script.into(),
            },
        }
    }
}

/// The editable text fields of a work item. Annotators correct all three.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub instruction: String,
    pub input: String,
    pub output: String,
}

/// Document metadata. `script` names the task-set the record belongs to;
/// claims and reports are always scoped to one script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub script: String,
}

/// Newtype for store-assigned document identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemId(pub String);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Loaded into the pool, never claimed.
    New,
    /// Claimed by exactly one annotator, being edited.
    InProgress,
    /// Finalized with an accepted payload. Terminal.
    Ok,
    /// Finalized as unusable. Terminal.
    NotOk,
}

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (New, InProgress)       // claim
                | (InProgress, Ok)  // accept
                | (InProgress, NotOk) // reject; nothing ever returns to New
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Ok | Status::NotOk)
    }

    /// The status exactly as the store indexes it.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::New => "new",
            Status::InProgress => "in_progress",
            Status::Ok => "ok",
            Status::NotOk => "not_ok",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
