//! Repository interface over everything the engine persists.
//!
//! The consolidation and scheduling logic only talks to this trait, so the
//! same engine runs on the in-process [`MemoryStore`] and on Postgres
//! ([`crate::db::Db`]).
//!
//! Each method is atomic on its own. Multi-step updates of one target are
//! serialized by the engine's per-target locks, and status writes are
//! optimistic: they name the status they expect to replace and fail with
//! [`crate::error::Error::StaleWrite`] when someone else got there first.

pub mod memory;

use std::collections::BTreeSet;
use std::future::Future;

use crate::error::Result;
use crate::event::{Event, EventKind};
use crate::model::{
    Attachment, AttachmentId, AttachmentStatus, CategoryId, CountClaim, CountClaimId,
    CurveSegment, Granularity, IdentificationClaim, Place, PlaceId, Scheduling, SegmentId,
    Submitter, SubmitterId, Target, WorkUnit, WorkUnitId, WorkUnitStatus,
};

pub use memory::MemoryStore;

pub trait Store: Send + Sync + 'static {
    // -- places --------------------------------------------------------------

    fn insert_place(&self, place: &Place) -> impl Future<Output = Result<()>> + Send;

    fn get_place(&self, id: PlaceId) -> impl Future<Output = Result<Place>> + Send;

    // -- work units ----------------------------------------------------------

    fn insert_work_unit(&self, unit: &WorkUnit) -> impl Future<Output = Result<()>> + Send;

    fn find_work_unit(
        &self,
        place: PlaceId,
        category: &CategoryId,
    ) -> impl Future<Output = Result<Option<WorkUnit>>> + Send;

    fn get_work_unit(&self, id: WorkUnitId) -> impl Future<Output = Result<WorkUnit>> + Send;

    fn list_work_units(&self) -> impl Future<Output = Result<Vec<WorkUnit>>> + Send;

    fn work_units_for_place(
        &self,
        place: PlaceId,
    ) -> impl Future<Output = Result<Vec<WorkUnit>>> + Send;

    /// Persist status, confirmed count and eligibility, provided the stored
    /// status is still `expected`.
    fn save_work_unit(
        &self,
        unit: &WorkUnit,
        expected: WorkUnitStatus,
    ) -> impl Future<Output = Result<()>> + Send;

    fn save_scheduling(
        &self,
        changes: &[(WorkUnitId, Option<Scheduling>)],
    ) -> impl Future<Output = Result<()>> + Send;

    // -- attachments ---------------------------------------------------------

    fn insert_attachment(&self, attachment: &Attachment)
    -> impl Future<Output = Result<()>> + Send;

    fn get_attachment(&self, id: AttachmentId) -> impl Future<Output = Result<Attachment>> + Send;

    fn list_attachments(&self) -> impl Future<Output = Result<Vec<Attachment>>> + Send;

    /// Persist status, place and confirmed identification, provided the
    /// stored status is still `expected`.
    fn save_attachment(
        &self,
        attachment: &Attachment,
        expected: AttachmentStatus,
    ) -> impl Future<Output = Result<()>> + Send;

    // -- claim ledger --------------------------------------------------------

    /// Append a claim. The returned copy carries its ledger sequence number.
    fn append_identification_claim(
        &self,
        claim: IdentificationClaim,
    ) -> impl Future<Output = Result<IdentificationClaim>> + Send;

    /// All claims for an attachment, invalidated ones included, in ledger order.
    fn identification_claims_for(
        &self,
        attachment: AttachmentId,
    ) -> impl Future<Output = Result<Vec<IdentificationClaim>>> + Send;

    fn append_count_claim(
        &self,
        claim: CountClaim,
    ) -> impl Future<Output = Result<CountClaim>> + Send;

    /// All claims for a work unit, invalidated ones included, in ledger order.
    fn count_claims_for(
        &self,
        work_unit: WorkUnitId,
    ) -> impl Future<Output = Result<Vec<CountClaim>>> + Send;

    fn get_count_claim(&self, id: CountClaimId) -> impl Future<Output = Result<CountClaim>> + Send;

    /// Non-invalidated claims across all targets, in ledger order.
    fn valid_identification_claims(
        &self,
    ) -> impl Future<Output = Result<Vec<IdentificationClaim>>> + Send;

    fn valid_count_claims(&self) -> impl Future<Output = Result<Vec<CountClaim>>> + Send;

    /// Invalidate a submitter's claims on `target` recorded before `before_seq`.
    /// For work units only claims of `granularity` are touched. Returns how many
    /// claims changed.
    fn supersede_claims(
        &self,
        target: Target,
        submitter: &SubmitterId,
        granularity: Option<Granularity>,
        before_seq: i64,
    ) -> impl Future<Output = Result<usize>> + Send;

    /// Invalidate every claim of a submitter and flag it for reconsolidation.
    /// Returns the targets touched.
    fn exclude_submitter_claims(
        &self,
        submitter: &SubmitterId,
    ) -> impl Future<Output = Result<BTreeSet<Target>>> + Send;

    /// Targets a submitter has claimed anything about.
    fn claimed_targets(
        &self,
        submitter: &SubmitterId,
    ) -> impl Future<Output = Result<BTreeSet<Target>>> + Send;

    /// Targets with claims not yet consumed by consolidation.
    fn unprocessed_targets(&self) -> impl Future<Output = Result<BTreeSet<Target>>> + Send;

    fn mark_processed(&self, target: Target) -> impl Future<Output = Result<()>> + Send;

    // -- curves --------------------------------------------------------------

    fn all_curve_segments(&self) -> impl Future<Output = Result<Vec<CurveSegment>>> + Send;

    fn insert_curve_segment(
        &self,
        segment: &CurveSegment,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove a segment, returning what was removed.
    fn delete_curve_segment(
        &self,
        id: SegmentId,
    ) -> impl Future<Output = Result<CurveSegment>> + Send;

    // -- submitters ----------------------------------------------------------

    /// A submitter's record; unknown submitters start with a clean one.
    fn get_submitter(&self, id: &SubmitterId) -> impl Future<Output = Result<Submitter>> + Send;

    fn save_submitter(&self, submitter: &Submitter) -> impl Future<Output = Result<()>> + Send;

    /// Add `delta` to a submitter's score in one step and return the updated
    /// record. Excluded submitters are returned unchanged.
    fn add_submitter_score(
        &self,
        id: &SubmitterId,
        delta: i64,
    ) -> impl Future<Output = Result<Submitter>> + Send;

    /// Set the troll flag, keeping the score. Returns the record only if this
    /// call flagged the submitter.
    fn flag_troll(&self, id: &SubmitterId) -> impl Future<Output = Result<Option<Submitter>>> + Send;

    // -- events --------------------------------------------------------------

    /// Record an event and return it with its sequence number.
    fn record_event(&self, kind: EventKind) -> impl Future<Output = Result<Event>> + Send;

    /// Events with a sequence number greater than `since`.
    fn events_since(&self, since: u64) -> impl Future<Output = Result<Vec<Event>>> + Send;
}
