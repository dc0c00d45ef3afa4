//! Consolidation rules: from raw claims to a target's next state.
//!
//! Pure functions over the claims of one target. The engine loads claims,
//! asks for a decision and persists it. Only each submitter's latest valid
//! claim counts, so nobody is counted twice toward a quorum.

use std::collections::BTreeMap;

use crate::config::QuorumSettings;
use crate::model::{
    AttachmentStatus, ClaimedIdentity, CountClaim, CountClaimId, Granularity, IdentificationClaim,
    IdentificationClaimId, Origin, PlaceId, Signature, SubmitterId, WorkUnitStatus,
};

/// Latest non-invalidated claim of each submitter, in ledger order.
pub fn effective_identifications(claims: &[IdentificationClaim]) -> Vec<&IdentificationClaim> {
    latest_per_submitter(claims.iter().filter(|c| !c.invalidated), |c| {
        (&c.submitter, c.seq)
    })
}

/// Latest non-invalidated claim of each submitter at one granularity, in
/// ledger order.
pub fn effective_counts(claims: &[CountClaim], granularity: Granularity) -> Vec<&CountClaim> {
    latest_per_submitter(
        claims
            .iter()
            .filter(|c| !c.invalidated && c.granularity == granularity),
        |c| (&c.submitter, c.seq),
    )
}

fn latest_per_submitter<'a, T>(
    claims: impl Iterator<Item = &'a T>,
    key: impl Fn(&'a T) -> (&'a SubmitterId, i64),
) -> Vec<&'a T> {
    let mut latest: BTreeMap<&SubmitterId, (i64, &T)> = BTreeMap::new();
    for claim in claims {
        let (submitter, seq) = key(claim);
        let newer = latest.get(submitter).is_none_or(|(seen, _)| *seen < seq);
        if newer {
            latest.insert(submitter, (seq, claim));
        }
    }
    let mut effective: Vec<(i64, &T)> = latest.into_values().collect();
    effective.sort_by_key(|(seq, _)| *seq);
    effective.into_iter().map(|(_, claim)| claim).collect()
}

/// Groups in order of first appearance, each holding its claims in ledger
/// order. The leader is the largest group; ties go to the group seen first.
fn leading_group<'a, K: Ord + Clone, T>(
    claims: &[&'a T],
    key: impl Fn(&T) -> K,
) -> (usize, Option<Vec<&'a T>>) {
    let mut order: Vec<K> = Vec::new();
    let mut groups: BTreeMap<K, Vec<&'a T>> = BTreeMap::new();
    for &claim in claims {
        let k = key(claim);
        if !groups.contains_key(&k) {
            order.push(k.clone());
        }
        groups.entry(k).or_default().push(claim);
    }
    let distinct = order.len();
    let mut leader: Option<Vec<&'a T>> = None;
    for k in order {
        if let Some(group) = groups.remove(&k)
            && leader.as_ref().is_none_or(|best| group.len() > best.len())
        {
            leader = Some(group);
        }
    }
    (distinct, leader)
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDecision {
    pub status: AttachmentStatus,
    /// Place and representative claim, when identified.
    pub identification: Option<(PlaceId, IdentificationClaimId)>,
}

/// Decide an unidentified attachment's next state. `None` means it stays
/// unidentified.
pub fn decide_attachment(
    claims: &[IdentificationClaim],
    quorum: &QuorumSettings,
) -> Option<AttachmentDecision> {
    let effective = effective_identifications(claims);
    if let Some(imported) = effective.iter().find(|c| c.origin == Origin::BulkImport)
        && let Some(place) = imported.claimed_place()
    {
        return Some(AttachmentDecision {
            status: AttachmentStatus::Identified,
            identification: Some((place, imported.id)),
        });
    }

    let places: Vec<&IdentificationClaim> = effective
        .iter()
        .copied()
        .filter(|c| !c.is_problem_report())
        .collect();
    let problems = effective.len() - places.len();

    let (distinct_places, leader) = leading_group(&places, |c| c.claimed_place());
    if let Some(group) = leader
        && group.len() >= quorum.identification as usize
        && let Some(place) = group[0].claimed_place()
    {
        return Some(AttachmentDecision {
            status: AttachmentStatus::Identified,
            identification: Some((place, group[0].id)),
        });
    }

    let flagged = AttachmentDecision {
        status: AttachmentStatus::Flagged,
        identification: None,
    };
    if problems >= quorum.identification_problem as usize {
        return Some(flagged);
    }
    let distinct_answers = distinct_places + usize::from(problems > 0);
    if distinct_answers > 1 && effective.len() > quorum.identification as usize {
        return Some(flagged);
    }
    None
}

/// Does `claim` agree with the place an attachment was identified as?
pub fn agrees_with(claim: &IdentificationClaim, place: PlaceId) -> bool {
    claim.identity == ClaimedIdentity::Place(place)
}

// ---------------------------------------------------------------------------
// Work units
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkUnitDecision {
    pub status: WorkUnitStatus,
    /// Representative claim when `status` is confirmed.
    pub confirmed: Option<CountClaimId>,
}

/// Where the claims of one granularity point, ignoring the unit's history.
/// `None` when there are no effective claims at that granularity.
pub fn evaluate_stage(
    claims: &[CountClaim],
    granularity: Granularity,
    quorum: u32,
) -> Option<WorkUnitDecision> {
    let effective = effective_counts(claims, granularity);
    if effective.is_empty() {
        return None;
    }

    if let Some(import) = effective.iter().find(|c| c.origin == Origin::BulkImport) {
        return Some(WorkUnitDecision {
            status: WorkUnitStatus::confirmed_by_import(granularity),
            confirmed: Some(import.id),
        });
    }

    let (distinct, leader) = leading_group(&effective, |c| c.signature.clone());
    if let Some(group) = leader
        && group.len() >= quorum as usize
    {
        return Some(WorkUnitDecision {
            status: WorkUnitStatus::confirmed_by_quorum(granularity),
            confirmed: Some(group[0].id),
        });
    }

    let status = if distinct > 1 && effective.len() > quorum as usize {
        WorkUnitStatus::conflict(granularity)
    } else {
        WorkUnitStatus::unconfirmed(granularity)
    };
    Some(WorkUnitDecision {
        status,
        confirmed: None,
    })
}

/// Decide a work unit's next state from all its claims. `None` means no
/// change.
///
/// Total claims take precedence once any exist. The proposal only applies if
/// the current status may move to it, which freezes confirmed stages and
/// conflicts against further interactive claims.
pub fn decide_work_unit(
    current: WorkUnitStatus,
    claims: &[CountClaim],
    quorum: u32,
) -> Option<WorkUnitDecision> {
    let proposal = evaluate_stage(claims, Granularity::Total, quorum)
        .or_else(|| evaluate_stage(claims, Granularity::Partial, quorum))
        .unwrap_or(WorkUnitDecision {
            status: WorkUnitStatus::Empty,
            confirmed: None,
        });
    current
        .can_transition_to(proposal.status)
        .then_some(proposal)
}

/// Claims of the confirmed granularity that disagree with `witness`, and
/// those that match it.
pub fn split_by_agreement<'a>(
    witness: &CountClaim,
    claims: &'a [CountClaim],
) -> (Vec<&'a CountClaim>, Vec<&'a CountClaim>) {
    effective_counts(claims, witness.granularity)
        .into_iter()
        .filter(|c| c.origin == Origin::Interactive)
        .partition(|c| c.signature != witness.signature)
}

/// Signature groups, for diagnostics.
pub fn signature_tally(claims: &[CountClaim], granularity: Granularity) -> BTreeMap<Signature, usize> {
    let mut tally = BTreeMap::new();
    for claim in effective_counts(claims, granularity) {
        *tally.entry(claim.signature.clone()).or_default() += 1;
    }
    tally
}
