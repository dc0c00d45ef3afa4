//! Submitter reliability scoring.
//!
//! Every confirmation is a chance to grade the submitters who worked on the
//! target: disagreeing with the confirmed value raises their score, agreeing
//! lowers it. A submitter whose score reaches the threshold is excluded. All
//! their claims are invalidated and their targets reconsolidated on the next
//! pass.

use std::collections::BTreeMap;

use opentelemetry::KeyValue;
use tracing::{info, warn};

use super::Engine;
use super::consolidation::{agrees_with, split_by_agreement};
use crate::config::AntiTrollSettings;
use crate::error::Result;
use crate::event::EventKind;
use crate::model::{
    CountClaim, IdentificationClaim, Origin, PlaceId, Submitter, SubmitterId, vote_difference,
};
use crate::store::Store;
use crate::telemetry::metrics;

/// Score changes after an attachment was identified as `place`.
pub fn identification_deltas(
    place: PlaceId,
    effective: &[&IdentificationClaim],
    settings: &AntiTrollSettings,
) -> BTreeMap<SubmitterId, i64> {
    let mut deltas = BTreeMap::new();
    for claim in effective.iter().filter(|c| c.origin == Origin::Interactive) {
        let delta = if agrees_with(claim, place) {
            -settings.agreement_reward
        } else {
            settings.identification_mismatch_penalty
        };
        *deltas.entry(claim.submitter.clone()).or_default() += delta;
    }
    deltas
}

/// Score changes after a work unit stage was confirmed by `witness`.
///
/// Disagreeing claims are penalized by how many votes they are off.
pub fn count_deltas(
    witness: &CountClaim,
    claims: &[CountClaim],
    settings: &AntiTrollSettings,
) -> BTreeMap<SubmitterId, i64> {
    let (disagreeing, agreeing) = split_by_agreement(witness, claims);
    let mut deltas = BTreeMap::new();
    for claim in disagreeing {
        let penalty = i64::try_from(vote_difference(&claim.lines, &witness.lines)).unwrap_or(i64::MAX);
        *deltas.entry(claim.submitter.clone()).or_default() += penalty;
    }
    for claim in agreeing {
        *deltas.entry(claim.submitter.clone()).or_default() -= settings.agreement_reward;
    }
    deltas
}

impl<S: Store> Engine<S> {
    /// Apply score changes, excluding submitters that cross the threshold.
    pub(crate) async fn score_submitters(&self, deltas: BTreeMap<SubmitterId, i64>) -> Result<()> {
        let settings = &self.settings.antitroll;
        if !settings.enabled {
            return Ok(());
        }
        for (id, delta) in deltas {
            if delta == 0 {
                continue;
            }
            let submitter = self.store.add_submitter_score(&id, delta).await?;
            if submitter.is_troll {
                continue;
            }
            self.store
                .record_event(EventKind::SubmitterScored {
                    submitter: id.clone(),
                    delta,
                    score: submitter.troll_score,
                })
                .await?;

            if submitter.troll_score >= settings.threshold {
                warn!(
                    submitter = %id,
                    score = submitter.troll_score,
                    threshold = settings.threshold,
                    "submitter crossed troll threshold, excluding"
                );
                self.exclude(&id, true).await?;
            }
        }
        Ok(())
    }

    /// Flag the submitter and invalidate their claims. A no-op when someone
    /// else flagged them first.
    async fn exclude(&self, id: &SubmitterId, automatic: bool) -> Result<()> {
        let Some(submitter) = self.store.flag_troll(id).await? else {
            return Ok(());
        };
        let touched = self.store.exclude_submitter_claims(id).await?;
        self.store
            .record_event(EventKind::SubmitterMarkedTroll {
                submitter: id.clone(),
                score: submitter.troll_score,
                automatic,
            })
            .await?;
        metrics::submitters_flagged().add(1, &[KeyValue::new("automatic", automatic.to_string())]);
        info!(submitter = %id, targets = touched.len(), "submitter claims invalidated");
        self.kick();
        Ok(())
    }

    /// Exclude a submitter by hand. Their claims stop counting from the next pass.
    pub async fn mark_troll(&self, id: &SubmitterId) -> Result<Submitter> {
        let _admin = self.admin.lock().await;
        self.exclude(id, false).await?;
        self.store.get_submitter(id).await
    }

    /// Readmit a submitter with a fresh score.
    ///
    /// Claims invalidated by the exclusion stay invalidated; the submitter
    /// may simply claim again.
    pub async fn clear_troll(&self, id: &SubmitterId, score: i64) -> Result<Submitter> {
        let _admin = self.admin.lock().await;
        let mut submitter = self.store.get_submitter(id).await?;
        submitter.is_troll = false;
        submitter.troll_score = score;
        submitter.updated_at = chrono::Utc::now();
        self.store.save_submitter(&submitter).await?;
        self.store
            .record_event(EventKind::SubmitterCleared {
                submitter: id.clone(),
                score,
            })
            .await?;
        info!(submitter = %id, score, "submitter readmitted");
        Ok(submitter)
    }
}
