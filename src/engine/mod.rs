//! The engine: the API reporters, the bulk importer and administrators use.
//!
//! Claims are appended to the ledger and their target reconsolidated under
//! the target's lock. Scheduling state is derived: the priority assigner and
//! the task queue are recomputed by passes (see [`control`]) and re-validated
//! on every assignment.

pub mod antitroll;
pub mod consolidation;
pub mod control;
pub mod locks;
pub mod scheduler;

pub use control::ControlLoop;
pub use locks::TargetLocks;
pub use scheduler::{QueueStats, TaskQueue};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tracing::{Instrument, debug, info, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::model::*;
use crate::priority::{Curve, CurveBook, Segment, plan_scheduling};
use crate::store::Store;
use crate::telemetry::{metrics, spans};

use antitroll::{count_deltas, identification_deltas};
use consolidation::{decide_attachment, decide_work_unit, effective_identifications};

/// Current status of a claim target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "entity", content = "status", rename_all = "snake_case")]
pub enum TargetStatus {
    WorkUnit(WorkUnitStatus),
    Attachment(AttachmentStatus),
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetStatus::WorkUnit(status) => write!(f, "{status}"),
            TargetStatus::Attachment(status) => write!(f, "{status}"),
        }
    }
}

/// What happened to a submitted claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// Counted toward consolidation of its target.
    Counted { transitioned: bool },
    /// The target was already final. Recorded without effect.
    Stale,
    /// The submitter is excluded. Recorded as invalidated.
    Excluded,
}

impl ClaimOutcome {
    fn label(self) -> &'static str {
        match self {
            ClaimOutcome::Counted { .. } => "counted",
            ClaimOutcome::Stale => "stale",
            ClaimOutcome::Excluded => "excluded",
        }
    }
}

/// Returned for every accepted claim.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimReceipt {
    /// Ledger position of the new claim.
    pub seq: i64,
    pub target: Target,
    pub outcome: ClaimOutcome,
    /// Target status after consolidation.
    pub status: TargetStatus,
    /// Earlier claims of the same submitter this one replaced.
    pub superseded: usize,
}

/// Summary of one consolidation and scheduling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub consolidated: usize,
    pub transitions: usize,
    pub rescheduled: usize,
    pub queue: QueueStats,
}

/// Validate a state transition, returning an error if disallowed.
fn validate_transition(allowed: bool, from: impl ToString, to: impl ToString) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Consolidation and scheduling engine over a [`Store`].
pub struct Engine<S: Store> {
    store: Arc<S>,
    settings: Arc<Settings>,
    locks: TargetLocks,
    queue: Mutex<TaskQueue>,
    /// Serializes registration and administrative writes.
    admin: Mutex<()>,
    kick: Arc<Notify>,
}

impl<S: Store> Engine<S> {
    pub fn new(store: Arc<S>, settings: Arc<Settings>) -> Self {
        Self {
            store,
            settings,
            locks: TargetLocks::new(),
            queue: Mutex::new(TaskQueue::new()),
            admin: Mutex::new(()),
            kick: Arc::new(Notify::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Ask the control loop for an early pass.
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    pub(crate) fn kicker(&self) -> Arc<Notify> {
        Arc::clone(&self.kick)
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Store the configured curves for every scope that has none yet.
    pub async fn seed_curves(&self) -> Result<usize> {
        let _admin = self.admin.lock().await;
        let seeded: BTreeSet<CurveScope> = self
            .store
            .all_curve_segments()
            .await?
            .into_iter()
            .map(|s| s.scope)
            .collect();
        let mut inserted = 0;
        for segment in self.settings.curves.initial_segments() {
            if seeded.contains(&segment.scope) {
                continue;
            }
            self.store.insert_curve_segment(&segment).await?;
            inserted += 1;
        }
        info!(inserted, "curve segments seeded");
        Ok(inserted)
    }

    pub async fn register_place(
        &self,
        code: impl Into<String>,
        geo_unit: impl Into<GeoUnitId>,
    ) -> Result<Place> {
        let place = Place::new(code, geo_unit);
        self.store.insert_place(&place).await?;
        debug!(place = %place.id, code = %place.code, geo_unit = %place.geo_unit, "place registered");
        Ok(place)
    }

    /// Declare that `category` is voted at `place`. Declaring twice returns
    /// the existing work unit.
    pub async fn declare_work_unit(&self, place: PlaceId, category: CategoryId) -> Result<WorkUnit> {
        let _admin = self.admin.lock().await;
        let place = self.store.get_place(place).await?;
        if let Some(existing) = self.store.find_work_unit(place.id, &category).await? {
            return Ok(existing);
        }

        let mut unit = WorkUnit::new(place.id, place.geo_unit.clone(), category);
        let identified = self.store.list_attachments().await?.iter().any(|a| {
            a.status == AttachmentStatus::Identified && a.place == Some(place.id)
        });
        if identified {
            unit.eligible_at = Some(Utc::now());
        }
        self.store.insert_work_unit(&unit).await?;
        debug!(work_unit = %unit.id, place = %place.code, category = %unit.category, "work unit declared");
        Ok(unit)
    }

    pub async fn upload_attachment(&self, geo_unit_hint: Option<GeoUnitId>) -> Result<Attachment> {
        let attachment = Attachment::new(geo_unit_hint);
        self.store.insert_attachment(&attachment).await?;
        debug!(attachment = %attachment.id, "attachment uploaded");
        self.kick();
        Ok(attachment)
    }

    // -----------------------------------------------------------------------
    // Claims
    // -----------------------------------------------------------------------

    /// Record which polling place a photo shows (or that it shows none) and
    /// reconsolidate the photo.
    pub async fn submit_identification_claim(
        &self,
        attachment: AttachmentId,
        submitter: SubmitterId,
        identity: ClaimedIdentity,
    ) -> Result<ClaimReceipt> {
        self.record_identification_claim(attachment, submitter, identity, Origin::Interactive)
            .await
    }

    /// Record an authoritative identification from the bulk importer. It
    /// identifies the photo without waiting for a quorum.
    pub async fn import_identification_claim(
        &self,
        attachment: AttachmentId,
        importer: SubmitterId,
        place: PlaceId,
    ) -> Result<ClaimReceipt> {
        self.record_identification_claim(
            attachment,
            importer,
            ClaimedIdentity::Place(place),
            Origin::BulkImport,
        )
        .await
    }

    async fn record_identification_claim(
        &self,
        attachment: AttachmentId,
        submitter: SubmitterId,
        identity: ClaimedIdentity,
        origin: Origin,
    ) -> Result<ClaimReceipt> {
        let target = Target::Attachment(attachment);
        let span = spans::consolidation_span(target);
        async {
            let _guard = self.locks.lock(target).await;
            let current = self.store.get_attachment(attachment).await?;
            if let ClaimedIdentity::Place(place) = identity {
                self.store.get_place(place).await?;
            }
            let excluded = origin == Origin::Interactive
                && self.store.get_submitter(&submitter).await?.is_troll;
            let stale = current.status.is_final();

            let mut claim = IdentificationClaim::new(attachment, submitter.clone(), identity)
                .with_origin(origin);
            claim.invalidated = excluded;
            claim.processed = excluded || stale;
            let claim = self.store.append_identification_claim(claim).await?;
            self.store
                .record_event(EventKind::IdentificationClaimRecorded {
                    target,
                    submitter: submitter.clone(),
                    identity,
                    origin,
                    excluded,
                })
                .await?;

            let (outcome, status, superseded) = if excluded {
                (ClaimOutcome::Excluded, current.status, 0)
            } else if stale {
                (ClaimOutcome::Stale, current.status, 0)
            } else {
                let superseded = self.supersede(target, &submitter, None, claim.seq).await?;
                let status = self.consolidate_attachment(attachment).await?;
                self.store.mark_processed(target).await?;
                let transitioned = status != current.status;
                (ClaimOutcome::Counted { transitioned }, status, superseded)
            };

            self.finish_claim("identification", outcome);
            Ok::<_, Error>(ClaimReceipt {
                seq: claim.seq,
                target,
                outcome,
                status: TargetStatus::Attachment(status),
                superseded,
            })
        }
        .instrument(span)
        .await
    }

    /// Record a reporter's transcription of a work unit's counts.
    pub async fn submit_count_claim(
        &self,
        work_unit: WorkUnitId,
        submitter: SubmitterId,
        granularity: Granularity,
        lines: Vec<VoteLine>,
    ) -> Result<ClaimReceipt> {
        self.record_count_claim(work_unit, submitter, granularity, Origin::Interactive, lines)
            .await
    }

    /// Record authoritative counts from the bulk importer. Confirms the
    /// granularity immediately, and resolves a conflict at it.
    pub async fn import_count_claim(
        &self,
        work_unit: WorkUnitId,
        importer: SubmitterId,
        granularity: Granularity,
        lines: Vec<VoteLine>,
    ) -> Result<ClaimReceipt> {
        self.record_count_claim(work_unit, importer, granularity, Origin::BulkImport, lines)
            .await
    }

    async fn record_count_claim(
        &self,
        work_unit: WorkUnitId,
        submitter: SubmitterId,
        granularity: Granularity,
        origin: Origin,
        lines: Vec<VoteLine>,
    ) -> Result<ClaimReceipt> {
        let target = Target::WorkUnit(work_unit);
        let span = spans::consolidation_span(target);
        async {
            let _guard = self.locks.lock(target).await;
            let current = self.store.get_work_unit(work_unit).await?;
            let excluded = origin == Origin::Interactive
                && self.store.get_submitter(&submitter).await?.is_troll;
            let arbitrates = origin == Origin::BulkImport
                && granularity == Granularity::Total
                && current.status == WorkUnitStatus::TotalConflict;
            let stale = current.status.is_final() && !arbitrates;

            let mut claim = CountClaim::new(work_unit, submitter.clone(), granularity, origin, lines);
            claim.invalidated = excluded;
            claim.processed = excluded || stale;
            let claim = self.store.append_count_claim(claim).await?;
            self.store
                .record_event(EventKind::CountClaimRecorded {
                    target,
                    submitter: submitter.clone(),
                    granularity,
                    origin,
                    signature: claim.signature.0.clone(),
                    excluded,
                })
                .await?;

            let (outcome, status, superseded) = if excluded {
                (ClaimOutcome::Excluded, current.status, 0)
            } else if stale {
                (ClaimOutcome::Stale, current.status, 0)
            } else {
                let superseded = self
                    .supersede(target, &submitter, Some(granularity), claim.seq)
                    .await?;
                let status = self.consolidate_work_unit(work_unit).await?;
                self.store.mark_processed(target).await?;
                let transitioned = status != current.status;
                (ClaimOutcome::Counted { transitioned }, status, superseded)
            };

            self.finish_claim("count", outcome);
            Ok::<_, Error>(ClaimReceipt {
                seq: claim.seq,
                target,
                outcome,
                status: TargetStatus::WorkUnit(status),
                superseded,
            })
        }
        .instrument(span)
        .await
    }

    fn finish_claim(&self, kind: &'static str, outcome: ClaimOutcome) {
        metrics::claims_submitted().add(
            1,
            &[
                KeyValue::new("kind", kind),
                KeyValue::new("result", outcome.label()),
            ],
        );
        debug!(kind, outcome = outcome.label(), "claim recorded");
        self.kick();
    }

    async fn supersede(
        &self,
        target: Target,
        submitter: &SubmitterId,
        granularity: Option<Granularity>,
        seq: i64,
    ) -> Result<usize> {
        let count = self
            .store
            .supersede_claims(target, submitter, granularity, seq)
            .await?;
        if count > 0 {
            debug!(%target, %submitter, count, "earlier claims superseded");
            self.store
                .record_event(EventKind::ClaimsSuperseded {
                    target,
                    submitter: submitter.clone(),
                    count,
                })
                .await?;
        }
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Consolidation (callers hold the target's lock)
    // -----------------------------------------------------------------------

    async fn consolidate_attachment(&self, id: AttachmentId) -> Result<AttachmentStatus> {
        let mut attachment = self.store.get_attachment(id).await?;
        if attachment.status.is_final() {
            return Ok(attachment.status);
        }
        let claims = self.store.identification_claims_for(id).await?;
        let Some(decision) = decide_attachment(&claims, &self.settings.quorum) else {
            return Ok(attachment.status);
        };

        let from = attachment.status;
        validate_transition(from.can_transition_to(decision.status), from, decision.status)?;
        attachment.status = decision.status;
        if let Some((place, claim)) = decision.identification {
            attachment.place = Some(place);
            attachment.confirmed_identification = Some(claim);
        }
        self.store.save_attachment(&attachment, from).await?;
        self.note_transition("attachment", &from.to_string(), &decision.status.to_string());
        self.store
            .record_event(EventKind::AttachmentTransition {
                target: Target::Attachment(id),
                from,
                to: decision.status,
            })
            .await?;

        if let Some((place, _)) = decision.identification {
            self.mark_eligible(place).await?;
            let effective = effective_identifications(&claims);
            self.score_submitters(identification_deltas(
                place,
                &effective,
                &self.settings.antitroll,
            ))
            .await?;
        }
        Ok(attachment.status)
    }

    /// Make the place's work units schedulable, once.
    async fn mark_eligible(&self, place: PlaceId) -> Result<()> {
        let now = Utc::now();
        for unit in self.store.work_units_for_place(place).await? {
            if unit.is_eligible() {
                continue;
            }
            let _guard = self.locks.lock(Target::WorkUnit(unit.id)).await;
            let mut unit = self.store.get_work_unit(unit.id).await?;
            if unit.is_eligible() {
                continue;
            }
            unit.eligible_at = Some(now);
            self.store.save_work_unit(&unit, unit.status).await?;
            debug!(work_unit = %unit.id, "work unit eligible for transcription");
        }
        Ok(())
    }

    async fn consolidate_work_unit(&self, id: WorkUnitId) -> Result<WorkUnitStatus> {
        let mut unit = self.store.get_work_unit(id).await?;
        let claims = self.store.count_claims_for(id).await?;
        let Some(decision) = decide_work_unit(unit.status, &claims, self.settings.quorum.count)
        else {
            return Ok(unit.status);
        };

        let from = unit.status;
        let to = decision.status;
        validate_transition(from.can_transition_to(to), from, to)?;
        unit.status = to;
        // A partial confirmation stays on record while the total stage is open.
        unit.confirmed_count = if to.is_confirmed() {
            decision.confirmed
        } else if to.stage() == Some(Granularity::Total) {
            unit.confirmed_count
        } else {
            None
        };
        self.store.save_work_unit(&unit, from).await?;
        self.note_transition("work_unit", &from.to_string(), &to.to_string());
        self.store
            .record_event(EventKind::WorkUnitTransition {
                target: Target::WorkUnit(id),
                from,
                to,
            })
            .await?;

        if to.is_confirmed()
            && let Some(witness) = decision
                .confirmed
                .and_then(|confirmed| claims.iter().find(|c| c.id == confirmed))
        {
            self.score_submitters(count_deltas(witness, &claims, &self.settings.antitroll))
                .await?;
        }
        Ok(unit.status)
    }

    fn note_transition(&self, entity: &'static str, from: &str, to: &str) {
        spans::record_transition(&tracing::Span::current(), from, to);
        metrics::state_transitions().add(
            1,
            &[
                KeyValue::new("entity", entity),
                KeyValue::new("from", from.to_string()),
                KeyValue::new("to", to.to_string()),
            ],
        );
    }

    // -----------------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------------

    /// Reconsolidate every target with claims not consumed yet, e.g. after a
    /// submitter was excluded. A target that fails keeps its claims pending
    /// for the next pass. Returns (targets consolidated, transitions).
    pub async fn consolidate_pending(&self) -> Result<(usize, usize)> {
        let targets = self.store.unprocessed_targets().await?;
        let mut consolidated = 0;
        let mut transitions = 0;
        for &target in &targets {
            let span = spans::consolidation_span(target);
            let changed = async {
                let _guard = self.locks.lock(target).await;
                let changed = match target {
                    Target::Attachment(id) => {
                        let before = self.store.get_attachment(id).await?.status;
                        self.consolidate_attachment(id).await? != before
                    }
                    Target::WorkUnit(id) => {
                        let before = self.store.get_work_unit(id).await?.status;
                        self.consolidate_work_unit(id).await? != before
                    }
                };
                self.store.mark_processed(target).await?;
                Ok::<_, Error>(changed)
            }
            .instrument(span)
            .await;
            match changed {
                Ok(changed) => {
                    consolidated += 1;
                    transitions += usize::from(changed);
                }
                Err(e) => warn!(%target, error = %e, "consolidation failed, claims left pending"),
            }
        }
        self.locks.prune();
        Ok((consolidated, transitions))
    }

    /// Recompute scheduling keys. Returns how many work units changed.
    pub async fn reassign_priorities(&self) -> Result<usize> {
        let span = spans::scheduler_pass_span("assign");
        async {
            let segments = self.store.all_curve_segments().await?;
            let book = CurveBook::from_segments(&segments)?;
            let units = self.store.list_work_units().await?;
            let changes = plan_scheduling(&units, &book);
            self.store.save_scheduling(&changes).await?;
            tracing::Span::current().record("scheduler.tasks", changes.len() as u64);
            Ok::<_, Error>(changes.len())
        }
        .instrument(span)
        .await
    }

    /// Consolidate, reassign priorities and rebuild the queue.
    pub async fn run_pass(&self) -> Result<PassReport> {
        let started = Instant::now();

        let step = Instant::now();
        let (consolidated, transitions) = self.consolidate_pending().await?;
        record_duration("consolidate", step);

        let step = Instant::now();
        let rescheduled = self.reassign_priorities().await?;
        record_duration("assign", step);

        let step = Instant::now();
        let queue = self.rebuild_queue().await?;
        record_duration("rebuild", step);

        record_duration("pass", started);
        Ok(PassReport {
            consolidated,
            transitions,
            rescheduled,
            queue,
        })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn work_unit(&self, id: WorkUnitId) -> Result<WorkUnit> {
        self.store.get_work_unit(id).await
    }

    pub async fn attachment(&self, id: AttachmentId) -> Result<Attachment> {
        self.store.get_attachment(id).await
    }

    /// The claim a work unit's counts were confirmed from, if any.
    pub async fn confirmed_count(&self, id: WorkUnitId) -> Result<Option<CountClaim>> {
        match self.store.get_work_unit(id).await?.confirmed_count {
            Some(claim) => Ok(Some(self.store.get_count_claim(claim).await?)),
            None => Ok(None),
        }
    }

    pub async fn count_claims(&self, id: WorkUnitId) -> Result<Vec<CountClaim>> {
        self.store.count_claims_for(id).await
    }

    pub async fn events_since(&self, seq: u64) -> Result<Vec<Event>> {
        self.store.events_since(seq).await
    }

    // -----------------------------------------------------------------------
    // Curve administration
    // -----------------------------------------------------------------------

    /// Stored segments, optionally for one scope, ordered by scope and bounds.
    pub async fn curve_segments(&self, scope: Option<&CurveScope>) -> Result<Vec<CurveSegment>> {
        let mut segments: Vec<CurveSegment> = self
            .store
            .all_curve_segments()
            .await?
            .into_iter()
            .filter(|s| scope.is_none_or(|wanted| &s.scope == wanted))
            .collect();
        segments.sort_by(|a, b| {
            a.scope
                .cmp(&b.scope)
                .then(a.segment.from.cmp(&b.segment.from))
        });
        Ok(segments)
    }

    /// Add a segment to a scope's curve. Fails without changing anything if
    /// it overlaps a segment already there.
    pub async fn add_curve_segment(&self, scope: CurveScope, segment: Segment) -> Result<CurveSegment> {
        let _admin = self.admin.lock().await;
        let existing = self.curve_segments(Some(&scope)).await?;
        let curve = Curve::from_segments(existing.iter().map(|s| s.segment))?;
        if let Err(e) = curve.check(&segment) {
            warn!(%scope, segment = %segment, "curve segment rejected: {e}");
            return Err(e);
        }

        let stored = CurveSegment::new(scope, segment);
        self.store.insert_curve_segment(&stored).await?;
        self.store
            .record_event(EventKind::CurveSegmentAdded {
                id: stored.id,
                scope: stored.scope.clone(),
                segment,
            })
            .await?;
        info!(id = %stored.id, scope = %stored.scope, segment = %segment, "curve segment added");
        self.kick();
        Ok(stored)
    }

    pub async fn remove_curve_segment(&self, id: SegmentId) -> Result<CurveSegment> {
        let _admin = self.admin.lock().await;
        let removed = self.store.delete_curve_segment(id).await?;
        self.store
            .record_event(EventKind::CurveSegmentRemoved {
                id,
                scope: removed.scope.clone(),
            })
            .await?;
        info!(%id, scope = %removed.scope, "curve segment removed");
        self.kick();
        Ok(removed)
    }
}

fn record_duration(operation: &'static str, since: Instant) {
    metrics::pass_duration_ms().record(
        since.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("operation", operation)],
    );
}
