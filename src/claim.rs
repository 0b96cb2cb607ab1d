//! Claim coordination: find the next unclaimed item and take it, at most
//! once per item.
//!
//! Many annotators race for the front of the same pool. There is no lock
//! anywhere in this crate; the store's per-document version check is the
//! only synchronization point. A lost race never re-fights for the same
//! document. The next attempt queries again, so the loser moves on to a
//! fresh candidate while the winner keeps the one that is already gone.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{Instrument, debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{ItemId, Status};
use crate::status::{self, Verdict};
use crate::store::{DocumentStore, SearchFilter, StoredItem, UpdateOutcome};
use crate::telemetry::claim::{
    record_claim_outcome, record_status_transition, start_claim_span, start_finalize_span,
};
use crate::telemetry::metrics;

/// Attempt budget and pacing for conflicted writes.
#[derive(Debug, Clone)]
pub struct ClaimConfig {
    /// Conditional-write attempts before a claim gives up with
    /// [`ClaimOutcome::ConflictExhausted`].
    pub max_attempts: u32,
    /// Fixed pause between conflicted attempts. Conflicts are rare relative
    /// to pool size, so there is no backoff curve to tune.
    pub retry_delay: Duration,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// How a claim request settled.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The item now belongs to the claimant.
    Claimed(Box<StoredItem>),
    /// No unclaimed item matches the script. Nothing to do, not an error.
    NothingNew,
    /// Every attempt lost its conditional write to another actor. The pool
    /// may still hold claimable items; try again later.
    ConflictExhausted {
        /// How many candidates were fetched and lost.
        attempts: u32,
    },
}

/// Hands out work items and commits verdicts on them.
///
/// The store handle is injected, so the coordinator runs unchanged against
/// the bundled memory store or a networked backend.
pub struct ClaimCoordinator {
    store: Arc<dyn DocumentStore>,
    config: ClaimConfig,
}

impl ClaimCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, ClaimConfig::default())
    }

    pub fn with_config(store: Arc<dyn DocumentStore>, config: ClaimConfig) -> Self {
        Self { store, config }
    }

    /// Claim the next unclaimed item under `script` for `claimant`.
    ///
    /// Each attempt fetches the current front-of-pool candidate and issues
    /// one conditional `new -> in_progress` write guarded by the candidate's
    /// version. A conflict means another actor took that document; the next
    /// attempt queries again instead of retrying the same id. Store errors
    /// surface immediately and are never retried here.
    pub async fn claim_next(&self, script: &str, claimant: &str) -> Result<ClaimOutcome> {
        status::validate_claimant(claimant)?;

        let span = start_claim_span(script, claimant);
        let filter = SearchFilter::for_script(script).with_status(Status::New);
        let started = Instant::now();

        async {
            for attempt in 1..=self.config.max_attempts {
                let Some(candidate) = self.store.search(&filter, 1).await?.into_iter().next()
                else {
                    debug!(script, claimant, "no new items to claim");
                    record_claim_outcome(&span, "nothing_new");
                    metrics::claims().add(
                        1,
                        &[
                            KeyValue::new("script", script.to_string()),
                            KeyValue::new("outcome", "nothing_new"),
                        ],
                    );
                    return Ok(ClaimOutcome::NothingNew);
                };

                status::validate_transition(candidate.item.status, Status::InProgress)?;

                match self
                    .store
                    .update(
                        &candidate.id,
                        &candidate.version,
                        status::claim_update(claimant),
                    )
                    .await?
                {
                    UpdateOutcome::Applied { .. } => {
                        info!(id = %candidate.id, script, claimant, attempt, "claimed work item");
                        record_claim_outcome(&span, "claimed");
                        record_status_transition(
                            &span,
                            Status::New.as_str(),
                            Status::InProgress.as_str(),
                        );
                        metrics::claims().add(
                            1,
                            &[
                                KeyValue::new("script", script.to_string()),
                                KeyValue::new("outcome", "claimed"),
                            ],
                        );
                        metrics::status_transitions().add(
                            1,
                            &[
                                KeyValue::new("from", Status::New.as_str()),
                                KeyValue::new("to", Status::InProgress.as_str()),
                            ],
                        );
                        metrics::operation_duration_ms().record(
                            started.elapsed().as_secs_f64() * 1000.0,
                            &[KeyValue::new("operation", "claim.next")],
                        );

                        let claimed = self.fetch_required(&candidate.id).await?;
                        return Ok(ClaimOutcome::Claimed(Box::new(claimed)));
                    }
                    UpdateOutcome::VersionConflict { .. } => {
                        debug!(
                            id = %candidate.id,
                            script,
                            claimant,
                            attempt,
                            "lost the claim race, moving to a fresh candidate"
                        );
                        metrics::write_conflicts().add(1, &[KeyValue::new("operation", "claim")]);
                        if attempt < self.config.max_attempts {
                            tokio::time::sleep(self.config.retry_delay).await;
                        }
                    }
                }
            }

            warn!(
                script,
                claimant,
                attempts = self.config.max_attempts,
                "claim attempts exhausted under contention"
            );
            record_claim_outcome(&span, "conflict_exhausted");
            metrics::claims().add(
                1,
                &[
                    KeyValue::new("script", script.to_string()),
                    KeyValue::new("outcome", "conflict_exhausted"),
                ],
            );
            Ok(ClaimOutcome::ConflictExhausted {
                attempts: self.config.max_attempts,
            })
        }
        .instrument(span.clone())
        .await
    }

    /// Commit a verdict on an in-progress item held by `claimant`.
    ///
    /// The document is re-read and validated on every attempt: the
    /// transition matrix first, then the holder check. A conflicted write
    /// means the document moved underneath us, so the loop re-reads and
    /// re-validates rather than overwriting blind; a finalize that loses to
    /// a real status change therefore fails validation instead of clobbering
    /// it. Exhausting the budget is [`Error::ConflictExhausted`].
    pub async fn finalize(
        &self,
        id: &ItemId,
        claimant: &str,
        verdict: Verdict,
    ) -> Result<StoredItem> {
        status::validate_claimant(claimant)?;

        let span = start_finalize_span(id, claimant);
        let to = verdict.status();
        let started = Instant::now();

        async {
            for attempt in 1..=self.config.max_attempts {
                let current = self.fetch_required(id).await?;

                status::validate_transition(current.item.status, to)?;
                status::validate_holder(&current.item, claimant)?;

                match self
                    .store
                    .update(
                        id,
                        &current.version,
                        status::finalize_update(&verdict, claimant),
                    )
                    .await?
                {
                    UpdateOutcome::Applied { .. } => {
                        info!(%id, claimant, status = %to, "finalized work item");
                        record_claim_outcome(&span, "finalized");
                        record_status_transition(&span, Status::InProgress.as_str(), to.as_str());
                        metrics::status_transitions().add(
                            1,
                            &[
                                KeyValue::new("from", Status::InProgress.as_str()),
                                KeyValue::new("to", to.as_str()),
                            ],
                        );
                        metrics::operation_duration_ms().record(
                            started.elapsed().as_secs_f64() * 1000.0,
                            &[KeyValue::new("operation", "claim.finalize")],
                        );

                        return self.fetch_required(id).await;
                    }
                    UpdateOutcome::VersionConflict { .. } => {
                        debug!(%id, claimant, attempt, "finalize hit a stale version, re-reading");
                        metrics::write_conflicts()
                            .add(1, &[KeyValue::new("operation", "finalize")]);
                        if attempt < self.config.max_attempts {
                            tokio::time::sleep(self.config.retry_delay).await;
                        }
                    }
                }
            }

            warn!(%id, claimant, attempts = self.config.max_attempts, "finalize attempts exhausted");
            record_claim_outcome(&span, "conflict_exhausted");
            Err(Error::ConflictExhausted {
                attempts: self.config.max_attempts,
            })
        }
        .instrument(span.clone())
        .await
    }

    /// Point read that treats absence as an error.
    async fn fetch_required(&self, id: &ItemId) -> Result<StoredItem> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))
    }
}
