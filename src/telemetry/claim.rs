//! Claim and finalize span helpers.
//!
//! Provides span creation and status-transition recording for work items
//! moving through the claim protocol.

use tracing::Span;

use crate::model::ItemId;

/// Start a span wrapping one claim request, retries included.
///
/// The `claim.outcome` field is declared empty and filled in via
/// [`record_claim_outcome`] once the request settles.
pub fn start_claim_span(script: &str, claimant: &str) -> Span {
    tracing::info_span!(
        "claim.next",
        "claim.script" = script,
        "claim.claimant" = claimant,
        "claim.outcome" = tracing::field::Empty,
    )
}

/// Start a span wrapping one finalize request.
pub fn start_finalize_span(id: &ItemId, claimant: &str) -> Span {
    tracing::info_span!(
        "claim.finalize",
        "claim.item_id" = %id,
        "claim.claimant" = claimant,
        "claim.outcome" = tracing::field::Empty,
    )
}

/// Record how the request settled ("claimed", "nothing_new", ...).
pub fn record_claim_outcome(span: &Span, outcome: &str) {
    span.record("claim.outcome", outcome);
}

/// Record a committed status transition as an event on the given span.
pub fn record_status_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_transition");
    });
}
