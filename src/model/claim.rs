//! Reporter claims: the append-only submission ledger's entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ids::{
    AttachmentId, CountClaimId, IdentificationClaimId, OptionId, PlaceId, SubmitterId, WorkUnitId,
};
use super::work_unit::Granularity;
use crate::error::Error;

// ---------------------------------------------------------------------------
// Identification
// ---------------------------------------------------------------------------

/// What a reporter says an attachment shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "place", rename_all = "snake_case")]
pub enum ClaimedIdentity {
    /// The photo is the tally sheet of this polling place.
    Place(PlaceId),
    /// The photo cannot be identified (unreadable, not a tally sheet, ...).
    Problem,
}

/// A reporter's claim about which polling place a photo belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentificationClaim {
    pub id: IdentificationClaimId,
    /// Ledger position, assigned by the store on append.
    pub seq: i64,
    pub attachment: AttachmentId,
    pub submitter: SubmitterId,
    pub identity: ClaimedIdentity,
    pub origin: Origin,
    /// Superseded by a later claim of the same submitter, or excluded because
    /// the submitter is considered unreliable.
    pub invalidated: bool,
    /// Consumed by consolidation.
    pub processed: bool,
    pub recorded_at: DateTime<Utc>,
}

impl IdentificationClaim {
    pub fn new(attachment: AttachmentId, submitter: SubmitterId, identity: ClaimedIdentity) -> Self {
        Self {
            id: IdentificationClaimId::new(),
            seq: 0,
            attachment,
            submitter,
            identity,
            origin: Origin::Interactive,
            invalidated: false,
            processed: false,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn claimed_place(&self) -> Option<PlaceId> {
        match self.identity {
            ClaimedIdentity::Place(place) => Some(place),
            ClaimedIdentity::Problem => None,
        }
    }

    pub fn is_problem_report(&self) -> bool {
        self.identity == ClaimedIdentity::Problem
    }
}

// ---------------------------------------------------------------------------
// Counts
// ---------------------------------------------------------------------------

/// Where a claim came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Typed in by a reporter.
    #[default]
    Interactive,
    /// Appended by the bulk importer. Bypasses quorum.
    BulkImport,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Origin::Interactive => "interactive",
            Origin::BulkImport => "bulk_import",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Origin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interactive" => Ok(Origin::Interactive),
            "bulk_import" => Ok(Origin::BulkImport),
            other => Err(Error::Other(format!("unknown claim origin: {other}"))),
        }
    }
}

/// One cell of a tally sheet: votes for one option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteLine {
    pub option: OptionId,
    pub count: u32,
}

impl VoteLine {
    pub fn new(option: impl Into<OptionId>, count: u32) -> Self {
        Self {
            option: option.into(),
            count,
        }
    }
}

/// Canonical digest of a claim's vote lines. Two claims match iff their
/// signatures are equal, regardless of the order lines were entered in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub String);

impl Signature {
    /// Lines naming the same option are summed first, so splitting a count
    /// across two lines does not change the signature. Each option is
    /// length-prefixed so no two distinct tallies share a canonical form.
    pub fn of(lines: &[VoteLine]) -> Self {
        let mut merged: BTreeMap<&str, u64> = BTreeMap::new();
        for line in lines {
            *merged.entry(line.option.as_str()).or_default() += u64::from(line.count);
        }
        let mut hasher = Sha256::new();
        for (option, count) in merged {
            hasher.update((option.len() as u64).to_be_bytes());
            hasher.update(option.as_bytes());
            hasher.update(count.to_be_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0[..self.0.len().min(12)])
    }
}

/// A reporter's (or the importer's) transcription of vote counts for a work unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountClaim {
    pub id: CountClaimId,
    /// Ledger position, assigned by the store on append.
    pub seq: i64,
    pub work_unit: WorkUnitId,
    pub submitter: SubmitterId,
    pub granularity: Granularity,
    pub origin: Origin,
    pub signature: Signature,
    pub lines: Vec<VoteLine>,
    pub invalidated: bool,
    pub processed: bool,
    pub recorded_at: DateTime<Utc>,
}

impl CountClaim {
    pub fn new(
        work_unit: WorkUnitId,
        submitter: SubmitterId,
        granularity: Granularity,
        origin: Origin,
        lines: Vec<VoteLine>,
    ) -> Self {
        Self {
            id: CountClaimId::new(),
            seq: 0,
            work_unit,
            submitter,
            granularity,
            origin,
            signature: Signature::of(&lines),
            lines,
            invalidated: false,
            processed: false,
            recorded_at: Utc::now(),
        }
    }
}

/// Total absolute difference in votes between two claims. Options present in
/// only one of them count in full.
pub fn vote_difference(a: &[VoteLine], b: &[VoteLine]) -> u64 {
    let mut totals: BTreeMap<&OptionId, (u64, u64)> = BTreeMap::new();
    for line in a {
        totals.entry(&line.option).or_default().0 += u64::from(line.count);
    }
    for line in b {
        totals.entry(&line.option).or_default().1 += u64::from(line.count);
    }
    totals.values().map(|(x, y)| x.abs_diff(*y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_ignores_line_order() {
        let a = [VoteLine::new("blue", 10), VoteLine::new("red", 3)];
        let b = [VoteLine::new("red", 3), VoteLine::new("blue", 10)];
        assert_eq!(Signature::of(&a), Signature::of(&b));
    }

    #[test]
    fn signature_detects_different_counts() {
        let a = [VoteLine::new("blue", 10), VoteLine::new("red", 3)];
        let b = [VoteLine::new("blue", 10), VoteLine::new("red", 4)];
        assert_ne!(Signature::of(&a), Signature::of(&b));
    }

    #[test]
    fn signature_keeps_option_names_apart() {
        let joined = [VoteLine::new("a-1|b", 2)];
        let split = [VoteLine::new("a", 1), VoteLine::new("b", 2)];
        assert_ne!(Signature::of(&joined), Signature::of(&split));

        let shifted = [VoteLine::new("ab", 1)];
        let spaced = [VoteLine::new("a", 0), VoteLine::new("b", 1)];
        assert_ne!(Signature::of(&shifted), Signature::of(&spaced));
    }

    #[test]
    fn signature_merges_repeated_options() {
        let repeated = [VoteLine::new("blue", 10), VoteLine::new("blue", 0)];
        let single = [VoteLine::new("blue", 10)];
        assert_eq!(Signature::of(&repeated), Signature::of(&single));

        let split = [VoteLine::new("blue", 6), VoteLine::new("red", 1), VoteLine::new("blue", 4)];
        let whole = [VoteLine::new("red", 1), VoteLine::new("blue", 10)];
        assert_eq!(Signature::of(&split), Signature::of(&whole));
    }

    #[test]
    fn vote_difference_counts_unmatched_options_in_full() {
        let a = [VoteLine::new("blue", 10), VoteLine::new("red", 3)];
        let b = [VoteLine::new("blue", 7), VoteLine::new("green", 5)];
        // |10-7| + 3 + 5
        assert_eq!(vote_difference(&a, &b), 11);
    }
}
