//! Error types for instructpad.

use thiserror::Error;

use crate::model::Status;

#[derive(Debug, Error)]
pub enum Error {
    #[error("work item not found: {0}")]
    NotFound(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("item is held by '{holder}', not '{claimant}'")]
    ClaimantMismatch { holder: String, claimant: String },

    #[error("claimant identity must not be empty")]
    EmptyClaimant,

    #[error("conditional write still conflicting after {attempts} attempts")]
    ConflictExhausted { attempts: u32 },

    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("scan cursor expired or unknown: {0}")]
    CursorExpired(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
