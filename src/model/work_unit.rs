//! Work units: one (polling place, ballot category) pair awaiting a confirmed count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CategoryId, CountClaimId, GeoUnitId, PlaceId, WorkUnitId};
use crate::error::Error;

// ---------------------------------------------------------------------------
// Granularity
// ---------------------------------------------------------------------------

/// Whether a count claim covers part of the tally sheet or all of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Partial,
    Total,
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Granularity::Partial => "partial",
            Granularity::Total => "total",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "partial" => Ok(Granularity::Partial),
            "total" => Ok(Granularity::Total),
            other => Err(Error::Other(format!("unknown granularity: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Consolidation state of a work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkUnitStatus {
    /// No valid claims.
    Empty,
    /// Partial claims exist but none reached quorum.
    PartialUnconfirmed,
    PartialConfirmedByQuorum,
    PartialConfirmedByImport,
    /// Partial claims disagree beyond quorum. Waits for arbitration.
    PartialConflict,
    /// Total claims exist but none reached quorum.
    TotalUnconfirmed,
    TotalConfirmedByQuorum,
    TotalConfirmedByImport,
    /// Total claims disagree beyond quorum. Waits for arbitration.
    TotalConflict,
}

impl WorkUnitStatus {
    pub fn unconfirmed(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Partial => Self::PartialUnconfirmed,
            Granularity::Total => Self::TotalUnconfirmed,
        }
    }

    pub fn confirmed_by_quorum(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Partial => Self::PartialConfirmedByQuorum,
            Granularity::Total => Self::TotalConfirmedByQuorum,
        }
    }

    pub fn confirmed_by_import(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Partial => Self::PartialConfirmedByImport,
            Granularity::Total => Self::TotalConfirmedByImport,
        }
    }

    pub fn conflict(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Partial => Self::PartialConflict,
            Granularity::Total => Self::TotalConflict,
        }
    }

    /// Granularity this status belongs to. `None` for [`WorkUnitStatus::Empty`].
    pub fn stage(self) -> Option<Granularity> {
        use WorkUnitStatus::*;
        match self {
            Empty => None,
            PartialUnconfirmed | PartialConfirmedByQuorum | PartialConfirmedByImport
            | PartialConflict => Some(Granularity::Partial),
            TotalUnconfirmed | TotalConfirmedByQuorum | TotalConfirmedByImport | TotalConflict => {
                Some(Granularity::Total)
            }
        }
    }

    pub fn is_confirmed(self) -> bool {
        use WorkUnitStatus::*;
        match self {
            PartialConfirmedByQuorum
            | PartialConfirmedByImport
            | TotalConfirmedByQuorum
            | TotalConfirmedByImport => true,
            Empty | PartialUnconfirmed | PartialConflict | TotalUnconfirmed | TotalConflict => false,
        }
    }

    pub fn is_conflict(self) -> bool {
        matches!(self, Self::PartialConflict | Self::TotalConflict)
    }

    /// No further automatic transition can happen from interactive claims.
    pub fn is_final(self) -> bool {
        use WorkUnitStatus::*;
        match self {
            TotalConfirmedByQuorum | TotalConfirmedByImport | TotalConflict => true,
            Empty | PartialUnconfirmed | PartialConfirmedByQuorum | PartialConfirmedByImport
            | PartialConflict | TotalUnconfirmed => false,
        }
    }

    /// Should the scheduler hand out transcription work for a unit in this state?
    ///
    /// A partially confirmed unit still awaits its total count.
    pub fn needs_transcription(self) -> bool {
        use WorkUnitStatus::*;
        match self {
            Empty | PartialUnconfirmed | PartialConfirmedByQuorum | PartialConfirmedByImport
            | TotalUnconfirmed => true,
            PartialConflict | TotalConfirmedByQuorum | TotalConfirmedByImport | TotalConflict => {
                false
            }
        }
    }

    /// Can transition from self to `to`?
    ///
    /// Confirmation is monotonic: a confirmed stage only moves forward to the
    /// total stage, and a conflict only leaves through a bulk import or by
    /// advancing to the total stage.
    pub fn can_transition_to(self, to: WorkUnitStatus) -> bool {
        use WorkUnitStatus::*;
        if self == to {
            return false;
        }
        match self {
            Empty | PartialUnconfirmed | TotalUnconfirmed => true,
            PartialConfirmedByQuorum | PartialConfirmedByImport => {
                to.stage() == Some(Granularity::Total)
            }
            PartialConflict => {
                to == PartialConfirmedByImport || to.stage() == Some(Granularity::Total)
            }
            TotalConflict => to == TotalConfirmedByImport,
            TotalConfirmedByQuorum | TotalConfirmedByImport => false,
        }
    }
}

impl std::fmt::Display for WorkUnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkUnitStatus::Empty => "empty",
            WorkUnitStatus::PartialUnconfirmed => "partial_unconfirmed",
            WorkUnitStatus::PartialConfirmedByQuorum => "partial_confirmed_by_quorum",
            WorkUnitStatus::PartialConfirmedByImport => "partial_confirmed_by_import",
            WorkUnitStatus::PartialConflict => "partial_conflict",
            WorkUnitStatus::TotalUnconfirmed => "total_unconfirmed",
            WorkUnitStatus::TotalConfirmedByQuorum => "total_confirmed_by_quorum",
            WorkUnitStatus::TotalConfirmedByImport => "total_confirmed_by_import",
            WorkUnitStatus::TotalConflict => "total_conflict",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for WorkUnitStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "empty" => WorkUnitStatus::Empty,
            "partial_unconfirmed" => WorkUnitStatus::PartialUnconfirmed,
            "partial_confirmed_by_quorum" => WorkUnitStatus::PartialConfirmedByQuorum,
            "partial_confirmed_by_import" => WorkUnitStatus::PartialConfirmedByImport,
            "partial_conflict" => WorkUnitStatus::PartialConflict,
            "total_unconfirmed" => WorkUnitStatus::TotalUnconfirmed,
            "total_confirmed_by_quorum" => WorkUnitStatus::TotalConfirmedByQuorum,
            "total_confirmed_by_import" => WorkUnitStatus::TotalConfirmedByImport,
            "total_conflict" => WorkUnitStatus::TotalConflict,
            other => return Err(Error::Other(format!("unknown work unit status: {other}"))),
        })
    }
}

// ---------------------------------------------------------------------------
// Scheduling fields
// ---------------------------------------------------------------------------

/// Where a work unit stands inside one grouping (geographic unit or category).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    /// Completion of the grouping, in percent, when this unit arrived.
    pub proportion: f64,
    /// 1-based arrival order inside the grouping.
    pub rank: u32,
}

/// Scheduling fields maintained by the priority assigner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scheduling {
    pub geo: Standing,
    pub category: Standing,
    /// Lower is assigned sooner. Clamped to `i32::MAX`.
    pub key: i32,
}

// ---------------------------------------------------------------------------
// Work Unit
// ---------------------------------------------------------------------------

/// One (polling place, category) pair requiring a confirmed vote count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: WorkUnitId,
    pub place: PlaceId,
    /// Geographic unit of `place`, kept here for grouping.
    pub geo_unit: GeoUnitId,
    pub category: CategoryId,
    pub status: WorkUnitStatus,
    /// The winning count claim, once confirmed.
    pub confirmed_count: Option<CountClaimId>,
    /// When a photo of this unit's place was first identified. Units without
    /// it are not schedulable yet.
    pub eligible_at: Option<DateTime<Utc>>,
    pub scheduling: Option<Scheduling>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkUnit {
    pub fn new(place: PlaceId, geo_unit: GeoUnitId, category: CategoryId) -> Self {
        let now = Utc::now();
        Self {
            id: WorkUnitId::new(),
            place,
            geo_unit,
            category,
            status: WorkUnitStatus::Empty,
            confirmed_count: None,
            eligible_at: None,
            scheduling: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.eligible_at.is_some()
    }

    /// The granularity new claims are currently consolidated at.
    pub fn current_stage(&self) -> Granularity {
        match self.status {
            WorkUnitStatus::Empty
            | WorkUnitStatus::PartialUnconfirmed
            | WorkUnitStatus::PartialConflict => Granularity::Partial,
            WorkUnitStatus::PartialConfirmedByQuorum
            | WorkUnitStatus::PartialConfirmedByImport
            | WorkUnitStatus::TotalUnconfirmed
            | WorkUnitStatus::TotalConfirmedByQuorum
            | WorkUnitStatus::TotalConfirmedByImport
            | WorkUnitStatus::TotalConflict => Granularity::Total,
        }
    }
}
