//! Task queue and scheduler.
//!
//! Two streams of outstanding work feed one queue: identification of
//! unidentified photos and transcription of eligible work units. Each target
//! is replicated once per claim it still needs, streams are ordered by
//! (replica, scheduling key), and the two are woven together at a
//! configurable ratio. The queue is derived data; rebuilding it from the
//! same store state yields the same tasks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::time::Instant;
use tracing::{Instrument, debug};

use super::Engine;
use super::consolidation::{effective_counts, effective_identifications};
use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::model::{
    Assignment, Attachment, AttachmentId, AttachmentStatus, CountClaim, IdentificationClaim,
    PendingTask, SubmitterId, Target, TaskKind, WorkUnit, WorkUnitId,
};
use crate::priority::{CurveBook, attachment_keys};
use crate::store::Store;
use crate::telemetry::{metrics, spans};

fn replicas(quorum: u32, received: usize) -> u32 {
    let received = u32::try_from(received).unwrap_or(u32::MAX);
    quorum.saturating_sub(received).max(1)
}

fn expand(target: Target, key: i32, replicas: u32) -> impl Iterator<Item = PendingTask> {
    (0..replicas).map(move |replica| PendingTask {
        target,
        replica,
        scheduling_key: key,
    })
}

fn order(tasks: &mut [PendingTask]) {
    tasks.sort_by(|a, b| {
        (a.replica, a.scheduling_key, a.target).cmp(&(b.replica, b.scheduling_key, b.target))
    });
}

/// One task per replica still needed by each unidentified attachment.
pub fn identification_tasks(
    attachments: &[Attachment],
    keys: &BTreeMap<AttachmentId, i32>,
    valid_claims: &[IdentificationClaim],
    quorum: u32,
) -> Vec<PendingTask> {
    let mut by_attachment: HashMap<AttachmentId, Vec<IdentificationClaim>> = HashMap::new();
    for claim in valid_claims {
        by_attachment
            .entry(claim.attachment)
            .or_default()
            .push(claim.clone());
    }

    let mut tasks: Vec<PendingTask> = attachments
        .iter()
        .filter(|a| a.status == AttachmentStatus::Unidentified)
        .flat_map(|a| {
            let received = by_attachment
                .get(&a.id)
                .map_or(0, |claims| effective_identifications(claims).len());
            let key = keys.get(&a.id).copied().unwrap_or(i32::MAX);
            expand(Target::Attachment(a.id), key, replicas(quorum, received))
        })
        .collect();
    order(&mut tasks);
    tasks
}

/// One task per replica still needed by each eligible work unit that awaits
/// a count at its current stage.
pub fn transcription_tasks(
    units: &[WorkUnit],
    valid_claims: &[CountClaim],
    quorum: u32,
) -> Vec<PendingTask> {
    let mut by_unit: HashMap<WorkUnitId, Vec<CountClaim>> = HashMap::new();
    for claim in valid_claims {
        by_unit.entry(claim.work_unit).or_default().push(claim.clone());
    }

    let mut tasks: Vec<PendingTask> = units
        .iter()
        .filter(|u| u.is_eligible() && u.status.needs_transcription())
        .flat_map(|u| {
            let received = by_unit
                .get(&u.id)
                .map_or(0, |claims| effective_counts(claims, u.current_stage()).len());
            let key = u.scheduling.map_or(i32::MAX, |s| s.key);
            expand(Target::WorkUnit(u.id), key, replicas(quorum, received))
        })
        .collect();
    order(&mut tasks);
    tasks
}

/// Merge the two ordered streams. Identification task `i` lands in slot
/// `i / ratio` and transcription task `j` in slot `j`; within a slot
/// identification goes first.
pub fn weave(identify: Vec<PendingTask>, transcribe: Vec<PendingTask>, ratio: u32) -> Vec<PendingTask> {
    let ratio = ratio.max(1) as usize;
    let mut woven = Vec::with_capacity(identify.len() + transcribe.len());
    let mut identify = identify.into_iter();
    let mut transcribe = transcribe.into_iter();
    let mut slot = 0usize;
    loop {
        let before = woven.len();
        for _ in 0..ratio {
            match identify.next() {
                Some(task) => woven.push(task),
                None => break,
            }
        }
        woven.extend(transcribe.next());
        if woven.len() == before {
            break;
        }
        slot += 1;
    }
    debug!(slots = slot, tasks = woven.len(), "streams woven");
    woven
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Lease {
    holder: SubmitterId,
    expires_at: Instant,
}

/// The ordered task list plus live leases.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Vec<PendingTask>,
    leases: HashMap<(Target, u32), Lease>,
    last_stats: Option<QueueStats>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the content, keeping leases on replicas that still exist.
    pub fn replace(&mut self, tasks: Vec<PendingTask>, now: Instant) {
        let live: BTreeSet<(Target, u32)> = tasks.iter().map(|t| (t.target, t.replica)).collect();
        self.leases
            .retain(|slot, lease| lease.expires_at > now && live.contains(slot));
        self.tasks = tasks;
    }

    /// Remember the stats of a rebuild. True when they differ from the
    /// previous one.
    pub fn note_stats(&mut self, stats: QueueStats) -> bool {
        self.last_stats.replace(stats) != Some(stats)
    }

    pub fn tasks(&self) -> &[PendingTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Leased to someone other than `reporter` and not expired.
    pub fn leased_to_other(&self, task: &PendingTask, reporter: &SubmitterId, now: Instant) -> bool {
        self.leases
            .get(&(task.target, task.replica))
            .is_some_and(|l| l.expires_at > now && &l.holder != reporter)
    }

    /// Does `reporter` hold a live lease on any replica of `target`?
    pub fn holds(&self, reporter: &SubmitterId, target: Target, now: Instant) -> bool {
        self.leases
            .iter()
            .any(|((t, _), l)| *t == target && &l.holder == reporter && l.expires_at > now)
    }

    pub fn lease(&mut self, task: &PendingTask, reporter: &SubmitterId, until: Instant) {
        self.leases.insert(
            (task.target, task.replica),
            Lease {
                holder: reporter.clone(),
                expires_at: until,
            },
        );
    }

    /// Drop every replica of a target that no longer needs work.
    pub fn remove_target(&mut self, target: Target) {
        self.tasks.retain(|t| t.target != target);
        self.leases.retain(|(t, _), _| *t != target);
    }
}

/// Task counts of one rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub identification_tasks: usize,
    pub transcription_tasks: usize,
}

impl<S: Store> Engine<S> {
    /// Recompute the queue from current store state.
    pub async fn rebuild_queue(&self) -> Result<QueueStats> {
        let span = spans::scheduler_pass_span("rebuild");
        async {
            let quorum = &self.settings.quorum;
            let segments = self.store.all_curve_segments().await?;
            let book = CurveBook::from_segments(&segments)?;

            let attachments = self.store.list_attachments().await?;
            let keys = attachment_keys(&attachments, &book);
            let identification_claims = self.store.valid_identification_claims().await?;
            let identify = identification_tasks(
                &attachments,
                &keys,
                &identification_claims,
                quorum.identification,
            );

            let units = self.store.list_work_units().await?;
            let count_claims = self.store.valid_count_claims().await?;
            let transcribe = transcription_tasks(&units, &count_claims, quorum.count);

            let stats = QueueStats {
                identification_tasks: identify.len(),
                transcription_tasks: transcribe.len(),
            };
            let woven = weave(identify, transcribe, self.settings.scheduler.interleave_ratio);
            let changed = {
                let mut queue = self.queue.lock().await;
                queue.replace(woven, Instant::now());
                queue.note_stats(stats)
            };

            metrics::queue_rebuilds().add(1, &[]);
            metrics::queue_size().record(
                stats.identification_tasks as u64,
                &[KeyValue::new("kind", TaskKind::Identify.to_string())],
            );
            metrics::queue_size().record(
                stats.transcription_tasks as u64,
                &[KeyValue::new("kind", TaskKind::Transcribe.to_string())],
            );
            tracing::Span::current().record(
                "scheduler.tasks",
                (stats.identification_tasks + stats.transcription_tasks) as u64,
            );
            if changed {
                self.store
                    .record_event(EventKind::QueueRebuilt {
                        identification_tasks: stats.identification_tasks,
                        transcription_tasks: stats.transcription_tasks,
                    })
                    .await?;
            }
            Ok::<_, Error>(stats)
        }
        .instrument(span)
        .await
    }

    /// The next task for `reporter`, or `None` when nothing is left for them.
    ///
    /// Skips targets the reporter already claimed and replicas leased to
    /// others. The target's state is re-read before returning so a target
    /// confirmed since the last rebuild is never handed out.
    pub async fn next_task(&self, reporter: &SubmitterId) -> Result<Option<Assignment>> {
        let claimed = self.store.claimed_targets(reporter).await?;
        let mut queue = self.queue.lock().await;
        let now = Instant::now();
        let candidates: Vec<PendingTask> = queue.tasks().to_vec();
        let mut closed: BTreeSet<Target> = BTreeSet::new();

        for task in candidates {
            if claimed.contains(&task.target) || closed.contains(&task.target) {
                continue;
            }
            if queue.leased_to_other(&task, reporter, now) || queue.holds(reporter, task.target, now)
            {
                continue;
            }
            if !self.still_open(task.target).await? {
                debug!(task_target = %task.target, "dropping task for closed target");
                queue.remove_target(task.target);
                closed.insert(task.target);
                continue;
            }
            if let Some(secs) = self.settings.scheduler.task_lease_secs {
                queue.lease(&task, reporter, now + Duration::from_secs(secs));
            }
            metrics::tasks_assigned().add(1, &[KeyValue::new("kind", task.kind().to_string())]);
            return Ok(Some(Assignment::from(&task)));
        }
        Ok(None)
    }

    async fn still_open(&self, target: Target) -> Result<bool> {
        Ok(match target {
            Target::Attachment(id) => {
                self.store.get_attachment(id).await?.status == AttachmentStatus::Unidentified
            }
            Target::WorkUnit(id) => {
                let unit = self.store.get_work_unit(id).await?;
                unit.is_eligible() && unit.status.needs_transcription()
            }
        })
    }

    /// Current queue content in assignment order.
    pub async fn queue_snapshot(&self) -> Vec<PendingTask> {
        self.queue.lock().await.tasks().to_vec()
    }
}
