//! In-process store. Used by tests and for dry runs of the scheduler.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use super::Store;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::model::{
    Attachment, AttachmentId, AttachmentStatus, CategoryId, CountClaim, CountClaimId,
    CurveSegment, Granularity, IdentificationClaim, Place, PlaceId, Scheduling, SegmentId,
    Submitter, SubmitterId, Target, WorkUnit, WorkUnitId, WorkUnitStatus,
};

#[derive(Default)]
struct Inner {
    places: BTreeMap<PlaceId, Place>,
    work_units: BTreeMap<WorkUnitId, WorkUnit>,
    attachments: BTreeMap<AttachmentId, Attachment>,
    identification_claims: Vec<IdentificationClaim>,
    count_claims: Vec<CountClaim>,
    curve_segments: Vec<CurveSegment>,
    submitters: HashMap<SubmitterId, Submitter>,
    events: Vec<Event>,
    next_claim_seq: i64,
}

impl Inner {
    fn next_seq(&mut self) -> i64 {
        self.next_claim_seq += 1;
        self.next_claim_seq
    }
}

/// Everything in memory behind one lock. Guards are never held across an
/// await point.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn identification_target(claim: &IdentificationClaim) -> Target {
    Target::Attachment(claim.attachment)
}

fn count_target(claim: &CountClaim) -> Target {
    Target::WorkUnit(claim.work_unit)
}

impl Store for MemoryStore {
    async fn insert_place(&self, place: &Place) -> Result<()> {
        self.write().places.insert(place.id, place.clone());
        Ok(())
    }

    async fn get_place(&self, id: PlaceId) -> Result<Place> {
        self.read()
            .places
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("place {id}")))
    }

    async fn insert_work_unit(&self, unit: &WorkUnit) -> Result<()> {
        let mut inner = self.write();
        let duplicate = inner
            .work_units
            .values()
            .any(|u| u.place == unit.place && u.category == unit.category);
        if duplicate {
            return Err(Error::Other(format!(
                "work unit for place {} and category {} already exists",
                unit.place, unit.category
            )));
        }
        inner.work_units.insert(unit.id, unit.clone());
        Ok(())
    }

    async fn find_work_unit(
        &self,
        place: PlaceId,
        category: &CategoryId,
    ) -> Result<Option<WorkUnit>> {
        Ok(self
            .read()
            .work_units
            .values()
            .find(|u| u.place == place && &u.category == category)
            .cloned())
    }

    async fn get_work_unit(&self, id: WorkUnitId) -> Result<WorkUnit> {
        self.read()
            .work_units
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("work unit {id}")))
    }

    async fn list_work_units(&self) -> Result<Vec<WorkUnit>> {
        Ok(self.read().work_units.values().cloned().collect())
    }

    async fn work_units_for_place(&self, place: PlaceId) -> Result<Vec<WorkUnit>> {
        Ok(self
            .read()
            .work_units
            .values()
            .filter(|u| u.place == place)
            .cloned()
            .collect())
    }

    async fn save_work_unit(&self, unit: &WorkUnit, expected: WorkUnitStatus) -> Result<()> {
        let mut inner = self.write();
        let stored = inner
            .work_units
            .get_mut(&unit.id)
            .ok_or_else(|| Error::NotFound(format!("work unit {}", unit.id)))?;
        if stored.status != expected {
            return Err(Error::StaleWrite(format!(
                "work unit {} is {}, expected {expected}",
                unit.id, stored.status
            )));
        }
        stored.status = unit.status;
        stored.confirmed_count = unit.confirmed_count;
        stored.eligible_at = unit.eligible_at;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn save_scheduling(&self, changes: &[(WorkUnitId, Option<Scheduling>)]) -> Result<()> {
        let mut inner = self.write();
        for (id, scheduling) in changes {
            if let Some(unit) = inner.work_units.get_mut(id) {
                unit.scheduling = *scheduling;
            }
        }
        Ok(())
    }

    async fn insert_attachment(&self, attachment: &Attachment) -> Result<()> {
        self.write()
            .attachments
            .insert(attachment.id, attachment.clone());
        Ok(())
    }

    async fn get_attachment(&self, id: AttachmentId) -> Result<Attachment> {
        self.read()
            .attachments
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("attachment {id}")))
    }

    async fn list_attachments(&self) -> Result<Vec<Attachment>> {
        Ok(self.read().attachments.values().cloned().collect())
    }

    async fn save_attachment(
        &self,
        attachment: &Attachment,
        expected: AttachmentStatus,
    ) -> Result<()> {
        let mut inner = self.write();
        let stored = inner
            .attachments
            .get_mut(&attachment.id)
            .ok_or_else(|| Error::NotFound(format!("attachment {}", attachment.id)))?;
        if stored.status != expected {
            return Err(Error::StaleWrite(format!(
                "attachment {} is {}, expected {expected}",
                attachment.id, stored.status
            )));
        }
        stored.status = attachment.status;
        stored.place = attachment.place;
        stored.confirmed_identification = attachment.confirmed_identification;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn append_identification_claim(
        &self,
        mut claim: IdentificationClaim,
    ) -> Result<IdentificationClaim> {
        let mut inner = self.write();
        claim.seq = inner.next_seq();
        inner.identification_claims.push(claim.clone());
        Ok(claim)
    }

    async fn identification_claims_for(
        &self,
        attachment: AttachmentId,
    ) -> Result<Vec<IdentificationClaim>> {
        Ok(self
            .read()
            .identification_claims
            .iter()
            .filter(|c| c.attachment == attachment)
            .cloned()
            .collect())
    }

    async fn append_count_claim(&self, mut claim: CountClaim) -> Result<CountClaim> {
        let mut inner = self.write();
        claim.seq = inner.next_seq();
        inner.count_claims.push(claim.clone());
        Ok(claim)
    }

    async fn count_claims_for(&self, work_unit: WorkUnitId) -> Result<Vec<CountClaim>> {
        Ok(self
            .read()
            .count_claims
            .iter()
            .filter(|c| c.work_unit == work_unit)
            .cloned()
            .collect())
    }

    async fn get_count_claim(&self, id: CountClaimId) -> Result<CountClaim> {
        self.read()
            .count_claims
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("count claim {id}")))
    }

    async fn valid_identification_claims(&self) -> Result<Vec<IdentificationClaim>> {
        Ok(self
            .read()
            .identification_claims
            .iter()
            .filter(|c| !c.invalidated)
            .cloned()
            .collect())
    }

    async fn valid_count_claims(&self) -> Result<Vec<CountClaim>> {
        Ok(self
            .read()
            .count_claims
            .iter()
            .filter(|c| !c.invalidated)
            .cloned()
            .collect())
    }

    async fn supersede_claims(
        &self,
        target: Target,
        submitter: &SubmitterId,
        granularity: Option<Granularity>,
        before_seq: i64,
    ) -> Result<usize> {
        let mut inner = self.write();
        let mut changed = 0;
        match target {
            Target::Attachment(attachment) => {
                for claim in inner.identification_claims.iter_mut().filter(|c| {
                    c.attachment == attachment
                        && &c.submitter == submitter
                        && c.seq < before_seq
                        && !c.invalidated
                }) {
                    claim.invalidated = true;
                    changed += 1;
                }
            }
            Target::WorkUnit(work_unit) => {
                for claim in inner.count_claims.iter_mut().filter(|c| {
                    c.work_unit == work_unit
                        && &c.submitter == submitter
                        && granularity.is_none_or(|g| c.granularity == g)
                        && c.seq < before_seq
                        && !c.invalidated
                }) {
                    claim.invalidated = true;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn exclude_submitter_claims(&self, submitter: &SubmitterId) -> Result<BTreeSet<Target>> {
        let mut inner = self.write();
        let mut touched = BTreeSet::new();
        for claim in inner
            .identification_claims
            .iter_mut()
            .filter(|c| &c.submitter == submitter)
        {
            claim.invalidated = true;
            claim.processed = false;
            touched.insert(identification_target(claim));
        }
        for claim in inner
            .count_claims
            .iter_mut()
            .filter(|c| &c.submitter == submitter)
        {
            claim.invalidated = true;
            claim.processed = false;
            touched.insert(count_target(claim));
        }
        Ok(touched)
    }

    async fn claimed_targets(&self, submitter: &SubmitterId) -> Result<BTreeSet<Target>> {
        let inner = self.read();
        let identifications = inner
            .identification_claims
            .iter()
            .filter(|c| &c.submitter == submitter)
            .map(identification_target);
        let counts = inner
            .count_claims
            .iter()
            .filter(|c| &c.submitter == submitter)
            .map(count_target);
        Ok(identifications.chain(counts).collect())
    }

    async fn unprocessed_targets(&self) -> Result<BTreeSet<Target>> {
        let inner = self.read();
        let identifications = inner
            .identification_claims
            .iter()
            .filter(|c| !c.processed)
            .map(identification_target);
        let counts = inner
            .count_claims
            .iter()
            .filter(|c| !c.processed)
            .map(count_target);
        Ok(identifications.chain(counts).collect())
    }

    async fn mark_processed(&self, target: Target) -> Result<()> {
        let mut inner = self.write();
        match target {
            Target::Attachment(id) => inner
                .identification_claims
                .iter_mut()
                .filter(|c| c.attachment == id)
                .for_each(|c| c.processed = true),
            Target::WorkUnit(id) => inner
                .count_claims
                .iter_mut()
                .filter(|c| c.work_unit == id)
                .for_each(|c| c.processed = true),
        }
        Ok(())
    }

    async fn all_curve_segments(&self) -> Result<Vec<CurveSegment>> {
        Ok(self.read().curve_segments.clone())
    }

    async fn insert_curve_segment(&self, segment: &CurveSegment) -> Result<()> {
        self.write().curve_segments.push(segment.clone());
        Ok(())
    }

    async fn delete_curve_segment(&self, id: SegmentId) -> Result<CurveSegment> {
        let mut inner = self.write();
        let position = inner
            .curve_segments
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| Error::NotFound(format!("curve segment {id}")))?;
        Ok(inner.curve_segments.remove(position))
    }

    async fn get_submitter(&self, id: &SubmitterId) -> Result<Submitter> {
        Ok(self
            .read()
            .submitters
            .get(id)
            .cloned()
            .unwrap_or_else(|| Submitter::new(id.clone())))
    }

    async fn save_submitter(&self, submitter: &Submitter) -> Result<()> {
        self.write()
            .submitters
            .insert(submitter.id.clone(), submitter.clone());
        Ok(())
    }

    async fn add_submitter_score(&self, id: &SubmitterId, delta: i64) -> Result<Submitter> {
        let mut inner = self.write();
        let submitter = inner
            .submitters
            .entry(id.clone())
            .or_insert_with(|| Submitter::new(id.clone()));
        if !submitter.is_troll {
            submitter.troll_score = submitter.troll_score.saturating_add(delta);
            submitter.updated_at = Utc::now();
        }
        Ok(submitter.clone())
    }

    async fn flag_troll(&self, id: &SubmitterId) -> Result<Option<Submitter>> {
        let mut inner = self.write();
        let submitter = inner
            .submitters
            .entry(id.clone())
            .or_insert_with(|| Submitter::new(id.clone()));
        if submitter.is_troll {
            return Ok(None);
        }
        submitter.is_troll = true;
        submitter.updated_at = Utc::now();
        Ok(Some(submitter.clone()))
    }

    async fn record_event(&self, kind: EventKind) -> Result<Event> {
        let mut inner = self.write();
        let event = Event {
            seq: inner.events.len() as u64 + 1,
            timestamp: Utc::now(),
            kind,
        };
        inner.events.push(event.clone());
        Ok(event)
    }

    async fn events_since(&self, since: u64) -> Result<Vec<Event>> {
        Ok(self
            .read()
            .events
            .iter()
            .filter(|e| e.seq > since)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClaimedIdentity;

    #[tokio::test]
    async fn stale_status_write_is_rejected() {
        let store = MemoryStore::new();
        let mut unit = WorkUnit::new(PlaceId::new(), "S1".into(), "president".into());
        store.insert_work_unit(&unit).await.unwrap();

        unit.status = WorkUnitStatus::PartialUnconfirmed;
        store
            .save_work_unit(&unit, WorkUnitStatus::Empty)
            .await
            .unwrap();

        let err = store
            .save_work_unit(&unit, WorkUnitStatus::Empty)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleWrite(_)));
    }

    #[tokio::test]
    async fn score_updates_accumulate_until_flagged() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let ana: SubmitterId = "ana".into();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = std::sync::Arc::clone(&store);
            let ana = ana.clone();
            handles.push(tokio::spawn(async move {
                store.add_submitter_score(&ana, 3).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get_submitter(&ana).await.unwrap().troll_score, 60);

        let flagged = store.flag_troll(&ana).await.unwrap().unwrap();
        assert_eq!(flagged.troll_score, 60);
        assert!(store.flag_troll(&ana).await.unwrap().is_none());

        let after = store.add_submitter_score(&ana, 5).await.unwrap();
        assert!(after.is_troll);
        assert_eq!(after.troll_score, 60);
    }

    #[tokio::test]
    async fn duplicate_work_unit_is_rejected() {
        let store = MemoryStore::new();
        let place = PlaceId::new();
        let unit = WorkUnit::new(place, "S1".into(), "president".into());
        store.insert_work_unit(&unit).await.unwrap();
        let again = WorkUnit::new(place, "S1".into(), "president".into());
        assert!(store.insert_work_unit(&again).await.is_err());
    }

    #[tokio::test]
    async fn superseding_only_touches_earlier_claims_of_that_submitter() {
        let store = MemoryStore::new();
        let attachment = AttachmentId::new();
        let ana: SubmitterId = "ana".into();
        let first = store
            .append_identification_claim(IdentificationClaim::new(
                attachment,
                ana.clone(),
                ClaimedIdentity::Problem,
            ))
            .await
            .unwrap();
        store
            .append_identification_claim(IdentificationClaim::new(
                attachment,
                "bo".into(),
                ClaimedIdentity::Problem,
            ))
            .await
            .unwrap();
        let latest = store
            .append_identification_claim(IdentificationClaim::new(
                attachment,
                ana.clone(),
                ClaimedIdentity::Place(PlaceId::new()),
            ))
            .await
            .unwrap();

        let changed = store
            .supersede_claims(Target::Attachment(attachment), &ana, None, latest.seq)
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let claims = store.identification_claims_for(attachment).await.unwrap();
        let invalidated: Vec<_> = claims.iter().filter(|c| c.invalidated).map(|c| c.id).collect();
        assert_eq!(invalidated, vec![first.id]);
    }
}
