//! Structured events recorded by the engine on every state change.
//!
//! The event log is the audit trail: consumers read it with
//! `Engine::events_since` to build dashboards or replay decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    AttachmentStatus, ClaimedIdentity, CurveScope, Granularity, Origin, SegmentId, SubmitterId,
    Target, WorkUnitStatus,
};
use crate::priority::Segment;

/// A structured event recorded by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    IdentificationClaimRecorded {
        target: Target,
        submitter: SubmitterId,
        identity: ClaimedIdentity,
        #[serde(default)]
        origin: Origin,
        excluded: bool,
    },
    CountClaimRecorded {
        target: Target,
        submitter: SubmitterId,
        granularity: Granularity,
        origin: Origin,
        signature: String,
        excluded: bool,
    },
    /// Earlier claims of a submitter replaced by a newer one.
    ClaimsSuperseded {
        target: Target,
        submitter: SubmitterId,
        count: usize,
    },
    WorkUnitTransition {
        target: Target,
        from: WorkUnitStatus,
        to: WorkUnitStatus,
    },
    AttachmentTransition {
        target: Target,
        from: AttachmentStatus,
        to: AttachmentStatus,
    },
    SubmitterScored {
        submitter: SubmitterId,
        delta: i64,
        score: i64,
    },
    SubmitterMarkedTroll {
        submitter: SubmitterId,
        score: i64,
        automatic: bool,
    },
    SubmitterCleared {
        submitter: SubmitterId,
        score: i64,
    },
    CurveSegmentAdded {
        id: SegmentId,
        scope: CurveScope,
        segment: Segment,
    },
    CurveSegmentRemoved {
        id: SegmentId,
        scope: CurveScope,
    },
    QueueRebuilt {
        identification_tasks: usize,
        transcription_tasks: usize,
    },
    /// A stored payload this version cannot decode.
    #[serde(skip)]
    Unknown { raw: String },
}

impl EventKind {
    /// Decode a stored payload, keeping undecodable ones as [`EventKind::Unknown`].
    pub fn decode(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| EventKind::Unknown {
            raw: raw.to_string(),
        })
    }
}
