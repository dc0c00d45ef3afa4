//! Core data model.
//!
//! Work units and attachments carry consolidated state; claims are the raw,
//! append-only submissions they are consolidated from.

pub mod attachment;
pub mod claim;
pub mod curve;
pub mod ids;
pub mod place;
pub mod submitter;
pub mod task;
pub mod work_unit;

pub use attachment::{Attachment, AttachmentStatus};
pub use claim::{
    ClaimedIdentity, CountClaim, IdentificationClaim, Origin, Signature, VoteLine, vote_difference,
};
pub use curve::{CurveScope, CurveSegment, DefaultCurve};
pub use ids::*;
pub use place::Place;
pub use submitter::Submitter;
pub use task::{Assignment, PendingTask, TaskKind, Target};
pub use work_unit::{Granularity, Scheduling, Standing, WorkUnit, WorkUnitStatus};
