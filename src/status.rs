//! Status transition checks and the write bodies they authorize.
//!
//! Every status change flows through here before the store sees it: the
//! transition matrix on [`Status`] decides whether the edge exists, and the
//! holder check keeps a claimed item with its claimant. Validation never
//! writes anything; the returned [`DocumentUpdate`] is what the coordinator
//! hands to the store's conditional update, so a rejected request leaves the
//! document untouched.

use chrono::Utc;

use crate::error::{Error, Result};
use crate::model::{Payload, Status, WorkItem};
use crate::store::DocumentUpdate;

/// Finalization verdict for an in-progress item.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Accept: the edited payload is persisted with the status flip.
    Ok(Payload),
    /// Reject: status, claimant, and timestamp change; the payload stays.
    NotOk,
}

impl Verdict {
    /// The terminal status this verdict lands on.
    pub fn status(&self) -> Status {
        match self {
            Verdict::Ok(_) => Status::Ok,
            Verdict::NotOk => Status::NotOk,
        }
    }
}

/// Validate a requested transition against the matrix.
pub fn validate_transition(from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}

/// Validate that `claimant` may finalize `current`.
///
/// The holder is whoever the claim recorded in `updated_by`. A document
/// without a recorded holder was written by some out-of-band path and
/// accepts any claimant.
pub fn validate_holder(current: &WorkItem, claimant: &str) -> Result<()> {
    if let Some(holder) = &current.updated_by {
        if holder != claimant {
            return Err(Error::ClaimantMismatch {
                holder: holder.clone(),
                claimant: claimant.to_string(),
            });
        }
    }
    Ok(())
}

/// Reject blank claimant identities before any store traffic happens.
pub fn validate_claimant(claimant: &str) -> Result<()> {
    if claimant.trim().is_empty() {
        Err(Error::EmptyClaimant)
    } else {
        Ok(())
    }
}

/// The write body of a claim: `new -> in_progress`, attributed to
/// `claimant`, timestamp refreshed.
pub fn claim_update(claimant: &str) -> DocumentUpdate {
    DocumentUpdate {
        status: Some(Status::InProgress),
        updated_by: Some(claimant.to_string()),
        last_modified: Some(Utc::now()),
        payload: None,
    }
}

/// The write body of a finalization. Only an accepting verdict carries a
/// payload; a rejection leaves the stored text as the claim found it.
pub fn finalize_update(verdict: &Verdict, claimant: &str) -> DocumentUpdate {
    DocumentUpdate {
        status: Some(verdict.status()),
        updated_by: Some(claimant.to_string()),
        last_modified: Some(Utc::now()),
        payload: match verdict {
            Verdict::Ok(payload) => Some(payload.clone()),
            Verdict::NotOk => None,
        },
    }
}
