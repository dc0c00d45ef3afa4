//! Postgres repository: places, work units, attachments, the claim ledger,
//! curve segments, submitters and the event log.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use super::Db;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::model::*;
use crate::priority::Segment;
use crate::store::Store;

const WORK_UNIT_COLUMNS: &str = "id, place_id, geo_unit, category, status, confirmed_count_id, eligible_at, \
     geo_proportion, geo_rank, category_proportion, category_rank, scheduling_key, created_at, updated_at";

const ATTACHMENT_COLUMNS: &str =
    "id, status, place_id, confirmed_identification_id, geo_unit_hint, uploaded_at, updated_at";

const IDENTIFICATION_COLUMNS: &str =
    "id, seq, attachment_id, submitter, place_id, origin, invalidated, processed, recorded_at";

const COUNT_COLUMNS: &str = "id, seq, work_unit_id, submitter, granularity, origin, signature, \
     vote_lines, invalidated, processed, recorded_at";

const SEGMENT_COLUMNS: &str = "id, scope_kind, scope_ref, from_pct, to_pct, weight, max_rank";

impl Store for Db {
    async fn insert_place(&self, place: &Place) -> Result<()> {
        sqlx::query("INSERT INTO places (id, code, geo_unit) VALUES ($1, $2, $3)")
            .bind(place.id.0)
            .bind(&place.code)
            .bind(place.geo_unit.as_str())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn get_place(&self, id: PlaceId) -> Result<Place> {
        let row: Option<PlaceRow> =
            sqlx::query_as("SELECT id, code, geo_unit FROM places WHERE id = $1")
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        row.map(PlaceRow::into_place)
            .ok_or_else(|| Error::NotFound(format!("place {id}")))
    }

    async fn insert_work_unit(&self, unit: &WorkUnit) -> Result<()> {
        sqlx::query(
            "INSERT INTO work_units (id, place_id, geo_unit, category, status, confirmed_count_id, eligible_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(unit.id.0)
        .bind(unit.place.0)
        .bind(unit.geo_unit.as_str())
        .bind(unit.category.as_str())
        .bind(unit.status.to_string())
        .bind(unit.confirmed_count.map(|c| c.0))
        .bind(unit.eligible_at)
        .bind(unit.created_at)
        .bind(unit.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn find_work_unit(
        &self,
        place: PlaceId,
        category: &CategoryId,
    ) -> Result<Option<WorkUnit>> {
        let row: Option<WorkUnitRow> = sqlx::query_as(&format!(
            "SELECT {WORK_UNIT_COLUMNS} FROM work_units WHERE place_id = $1 AND category = $2"
        ))
        .bind(place.0)
        .bind(category.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.map(WorkUnitRow::try_into_work_unit).transpose()
    }

    async fn get_work_unit(&self, id: WorkUnitId) -> Result<WorkUnit> {
        let row: Option<WorkUnitRow> = sqlx::query_as(&format!(
            "SELECT {WORK_UNIT_COLUMNS} FROM work_units WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        row.ok_or_else(|| Error::NotFound(format!("work unit {id}")))?
            .try_into_work_unit()
    }

    async fn list_work_units(&self) -> Result<Vec<WorkUnit>> {
        let rows: Vec<WorkUnitRow> = sqlx::query_as(&format!(
            "SELECT {WORK_UNIT_COLUMNS} FROM work_units ORDER BY id"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(WorkUnitRow::try_into_work_unit).collect()
    }

    async fn work_units_for_place(&self, place: PlaceId) -> Result<Vec<WorkUnit>> {
        let rows: Vec<WorkUnitRow> = sqlx::query_as(&format!(
            "SELECT {WORK_UNIT_COLUMNS} FROM work_units WHERE place_id = $1 ORDER BY id"
        ))
        .bind(place.0)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(WorkUnitRow::try_into_work_unit).collect()
    }

    async fn save_work_unit(&self, unit: &WorkUnit, expected: WorkUnitStatus) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE work_units SET status = $1, confirmed_count_id = $2, eligible_at = $3, updated_at = $4
             WHERE id = $5 AND status = $6",
        )
        .bind(unit.status.to_string())
        .bind(unit.confirmed_count.map(|c| c.0))
        .bind(unit.eligible_at)
        .bind(Utc::now())
        .bind(unit.id.0)
        .bind(expected.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            let current = self.get_work_unit(unit.id).await?;
            return Err(Error::StaleWrite(format!(
                "work unit {} is {}, expected {expected}",
                unit.id, current.status
            )));
        }
        Ok(())
    }

    async fn save_scheduling(&self, changes: &[(WorkUnitId, Option<Scheduling>)]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for (id, scheduling) in changes {
            sqlx::query(
                "UPDATE work_units SET geo_proportion = $1, geo_rank = $2, category_proportion = $3,
                 category_rank = $4, scheduling_key = $5 WHERE id = $6",
            )
            .bind(scheduling.map(|s| s.geo.proportion))
            .bind(scheduling.map(|s| s.geo.rank as i32))
            .bind(scheduling.map(|s| s.category.proportion))
            .bind(scheduling.map(|s| s.category.rank as i32))
            .bind(scheduling.map(|s| s.key))
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_attachment(&self, attachment: &Attachment) -> Result<()> {
        sqlx::query(
            "INSERT INTO attachments (id, status, place_id, confirmed_identification_id, geo_unit_hint, uploaded_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(attachment.id.0)
        .bind(attachment.status.to_string())
        .bind(attachment.place.map(|p| p.0))
        .bind(attachment.confirmed_identification.map(|c| c.0))
        .bind(attachment.geo_unit_hint.as_ref().map(GeoUnitId::as_str))
        .bind(attachment.uploaded_at)
        .bind(attachment.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_attachment(&self, id: AttachmentId) -> Result<Attachment> {
        let row: Option<AttachmentRow> = sqlx::query_as(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        row.ok_or_else(|| Error::NotFound(format!("attachment {id}")))?
            .try_into_attachment()
    }

    async fn list_attachments(&self) -> Result<Vec<Attachment>> {
        let rows: Vec<AttachmentRow> = sqlx::query_as(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments ORDER BY id"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(AttachmentRow::try_into_attachment).collect()
    }

    async fn save_attachment(
        &self,
        attachment: &Attachment,
        expected: AttachmentStatus,
    ) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE attachments SET status = $1, place_id = $2, confirmed_identification_id = $3, updated_at = $4
             WHERE id = $5 AND status = $6",
        )
        .bind(attachment.status.to_string())
        .bind(attachment.place.map(|p| p.0))
        .bind(attachment.confirmed_identification.map(|c| c.0))
        .bind(Utc::now())
        .bind(attachment.id.0)
        .bind(expected.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            let current = self.get_attachment(attachment.id).await?;
            return Err(Error::StaleWrite(format!(
                "attachment {} is {}, expected {expected}",
                attachment.id, current.status
            )));
        }
        Ok(())
    }

    async fn append_identification_claim(
        &self,
        mut claim: IdentificationClaim,
    ) -> Result<IdentificationClaim> {
        let (seq,): (i64,) = sqlx::query_as(
            "INSERT INTO identification_claims (id, attachment_id, submitter, place_id, origin, invalidated, processed, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING seq",
        )
        .bind(claim.id.0)
        .bind(claim.attachment.0)
        .bind(claim.submitter.as_str())
        .bind(claim.claimed_place().map(|p| p.0))
        .bind(claim.origin.to_string())
        .bind(claim.invalidated)
        .bind(claim.processed)
        .bind(claim.recorded_at)
        .fetch_one(self.pool())
        .await?;
        claim.seq = seq;
        Ok(claim)
    }

    async fn identification_claims_for(
        &self,
        attachment: AttachmentId,
    ) -> Result<Vec<IdentificationClaim>> {
        let rows: Vec<IdentificationClaimRow> = sqlx::query_as(&format!(
            "SELECT {IDENTIFICATION_COLUMNS} FROM identification_claims WHERE attachment_id = $1 ORDER BY seq"
        ))
        .bind(attachment.0)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(IdentificationClaimRow::try_into_claim).collect()
    }

    async fn append_count_claim(&self, mut claim: CountClaim) -> Result<CountClaim> {
        let (seq,): (i64,) = sqlx::query_as(
            "INSERT INTO count_claims (id, work_unit_id, submitter, granularity, origin, signature, vote_lines, invalidated, processed, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING seq",
        )
        .bind(claim.id.0)
        .bind(claim.work_unit.0)
        .bind(claim.submitter.as_str())
        .bind(claim.granularity.to_string())
        .bind(claim.origin.to_string())
        .bind(&claim.signature.0)
        .bind(Json(&claim.lines))
        .bind(claim.invalidated)
        .bind(claim.processed)
        .bind(claim.recorded_at)
        .fetch_one(self.pool())
        .await?;
        claim.seq = seq;
        Ok(claim)
    }

    async fn count_claims_for(&self, work_unit: WorkUnitId) -> Result<Vec<CountClaim>> {
        let rows: Vec<CountClaimRow> = sqlx::query_as(&format!(
            "SELECT {COUNT_COLUMNS} FROM count_claims WHERE work_unit_id = $1 ORDER BY seq"
        ))
        .bind(work_unit.0)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(CountClaimRow::try_into_claim).collect()
    }

    async fn get_count_claim(&self, id: CountClaimId) -> Result<CountClaim> {
        let row: Option<CountClaimRow> = sqlx::query_as(&format!(
            "SELECT {COUNT_COLUMNS} FROM count_claims WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        row.ok_or_else(|| Error::NotFound(format!("count claim {id}")))?
            .try_into_claim()
    }

    async fn valid_identification_claims(&self) -> Result<Vec<IdentificationClaim>> {
        let rows: Vec<IdentificationClaimRow> = sqlx::query_as(&format!(
            "SELECT {IDENTIFICATION_COLUMNS} FROM identification_claims WHERE NOT invalidated ORDER BY seq"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(IdentificationClaimRow::try_into_claim).collect()
    }

    async fn valid_count_claims(&self) -> Result<Vec<CountClaim>> {
        let rows: Vec<CountClaimRow> = sqlx::query_as(&format!(
            "SELECT {COUNT_COLUMNS} FROM count_claims WHERE NOT invalidated ORDER BY seq"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(CountClaimRow::try_into_claim).collect()
    }

    async fn supersede_claims(
        &self,
        target: Target,
        submitter: &SubmitterId,
        granularity: Option<Granularity>,
        before_seq: i64,
    ) -> Result<usize> {
        let result = match target {
            Target::Attachment(id) => {
                sqlx::query(
                    "UPDATE identification_claims SET invalidated = TRUE
                     WHERE attachment_id = $1 AND submitter = $2 AND seq < $3 AND NOT invalidated",
                )
                .bind(id.0)
                .bind(submitter.as_str())
                .bind(before_seq)
                .execute(self.pool())
                .await?
            }
            Target::WorkUnit(id) => {
                sqlx::query(
                    "UPDATE count_claims SET invalidated = TRUE
                     WHERE work_unit_id = $1 AND submitter = $2 AND seq < $3 AND NOT invalidated
                     AND ($4::TEXT IS NULL OR granularity = $4)",
                )
                .bind(id.0)
                .bind(submitter.as_str())
                .bind(before_seq)
                .bind(granularity.map(|g| g.to_string()))
                .execute(self.pool())
                .await?
            }
        };
        Ok(result.rows_affected() as usize)
    }

    async fn exclude_submitter_claims(&self, submitter: &SubmitterId) -> Result<BTreeSet<Target>> {
        let mut tx = self.pool().begin().await?;
        let attachments: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE identification_claims SET invalidated = TRUE, processed = FALSE
             WHERE submitter = $1 RETURNING attachment_id",
        )
        .bind(submitter.as_str())
        .fetch_all(&mut *tx)
        .await?;
        let work_units: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE count_claims SET invalidated = TRUE, processed = FALSE
             WHERE submitter = $1 RETURNING work_unit_id",
        )
        .bind(submitter.as_str())
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(attachments
            .into_iter()
            .map(|(id,)| Target::Attachment(AttachmentId(id)))
            .chain(
                work_units
                    .into_iter()
                    .map(|(id,)| Target::WorkUnit(WorkUnitId(id))),
            )
            .collect())
    }

    async fn claimed_targets(&self, submitter: &SubmitterId) -> Result<BTreeSet<Target>> {
        let attachments: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT attachment_id FROM identification_claims WHERE submitter = $1",
        )
        .bind(submitter.as_str())
        .fetch_all(self.pool())
        .await?;
        let work_units: Vec<(Uuid,)> =
            sqlx::query_as("SELECT DISTINCT work_unit_id FROM count_claims WHERE submitter = $1")
                .bind(submitter.as_str())
                .fetch_all(self.pool())
                .await?;
        Ok(attachments
            .into_iter()
            .map(|(id,)| Target::Attachment(AttachmentId(id)))
            .chain(
                work_units
                    .into_iter()
                    .map(|(id,)| Target::WorkUnit(WorkUnitId(id))),
            )
            .collect())
    }

    async fn unprocessed_targets(&self) -> Result<BTreeSet<Target>> {
        let attachments: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT attachment_id FROM identification_claims WHERE NOT processed",
        )
        .fetch_all(self.pool())
        .await?;
        let work_units: Vec<(Uuid,)> =
            sqlx::query_as("SELECT DISTINCT work_unit_id FROM count_claims WHERE NOT processed")
                .fetch_all(self.pool())
                .await?;
        Ok(attachments
            .into_iter()
            .map(|(id,)| Target::Attachment(AttachmentId(id)))
            .chain(
                work_units
                    .into_iter()
                    .map(|(id,)| Target::WorkUnit(WorkUnitId(id))),
            )
            .collect())
    }

    async fn mark_processed(&self, target: Target) -> Result<()> {
        let query = match target {
            Target::Attachment(id) => sqlx::query(
                "UPDATE identification_claims SET processed = TRUE WHERE attachment_id = $1 AND NOT processed",
            )
            .bind(id.0),
            Target::WorkUnit(id) => sqlx::query(
                "UPDATE count_claims SET processed = TRUE WHERE work_unit_id = $1 AND NOT processed",
            )
            .bind(id.0),
        };
        query.execute(self.pool()).await?;
        Ok(())
    }

    async fn all_curve_segments(&self) -> Result<Vec<CurveSegment>> {
        let rows: Vec<CurveSegmentRow> = sqlx::query_as(&format!(
            "SELECT {SEGMENT_COLUMNS} FROM curve_segments ORDER BY scope_kind, scope_ref, from_pct"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(CurveSegmentRow::try_into_segment).collect()
    }

    async fn insert_curve_segment(&self, segment: &CurveSegment) -> Result<()> {
        let (kind, reference) = segment.scope.to_parts();
        sqlx::query(
            "INSERT INTO curve_segments (id, scope_kind, scope_ref, from_pct, to_pct, weight, max_rank)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(segment.id.0)
        .bind(kind)
        .bind(reference)
        .bind(segment.segment.from as i32)
        .bind(segment.segment.to as i32)
        .bind(i64::from(segment.segment.weight))
        .bind(segment.segment.max_rank.map(|n| n as i32))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn delete_curve_segment(&self, id: SegmentId) -> Result<CurveSegment> {
        let row: Option<CurveSegmentRow> = sqlx::query_as(&format!(
            "DELETE FROM curve_segments WHERE id = $1 RETURNING {SEGMENT_COLUMNS}"
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        row.ok_or_else(|| Error::NotFound(format!("curve segment {id}")))?
            .try_into_segment()
    }

    async fn get_submitter(&self, id: &SubmitterId) -> Result<Submitter> {
        let row: Option<(i64, bool, DateTime<Utc>)> = sqlx::query_as(
            "SELECT troll_score, is_troll, updated_at FROM submitters WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(self.pool())
        .await?;
        Ok(match row {
            Some((troll_score, is_troll, updated_at)) => Submitter {
                id: id.clone(),
                troll_score,
                is_troll,
                updated_at,
            },
            None => Submitter::new(id.clone()),
        })
    }

    async fn save_submitter(&self, submitter: &Submitter) -> Result<()> {
        sqlx::query(
            "INSERT INTO submitters (id, troll_score, is_troll, updated_at) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET troll_score = $2, is_troll = $3, updated_at = $4",
        )
        .bind(submitter.id.as_str())
        .bind(submitter.troll_score)
        .bind(submitter.is_troll)
        .bind(submitter.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn add_submitter_score(&self, id: &SubmitterId, delta: i64) -> Result<Submitter> {
        let row: Option<(i64, bool, DateTime<Utc>)> = sqlx::query_as(
            "INSERT INTO submitters (id, troll_score, is_troll, updated_at) VALUES ($1, $2, FALSE, $3)
             ON CONFLICT (id) DO UPDATE
                SET troll_score = submitters.troll_score + EXCLUDED.troll_score,
                    updated_at = EXCLUDED.updated_at
              WHERE NOT submitters.is_troll
             RETURNING troll_score, is_troll, updated_at",
        )
        .bind(id.as_str())
        .bind(delta)
        .bind(Utc::now())
        .fetch_optional(self.pool())
        .await?;
        match row {
            Some((troll_score, is_troll, updated_at)) => Ok(Submitter {
                id: id.clone(),
                troll_score,
                is_troll,
                updated_at,
            }),
            // Already excluded: the conflict clause skipped the update.
            None => self.get_submitter(id).await,
        }
    }

    async fn flag_troll(&self, id: &SubmitterId) -> Result<Option<Submitter>> {
        let row: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
            "INSERT INTO submitters (id, troll_score, is_troll, updated_at) VALUES ($1, 0, TRUE, $2)
             ON CONFLICT (id) DO UPDATE
                SET is_troll = TRUE, updated_at = EXCLUDED.updated_at
              WHERE NOT submitters.is_troll
             RETURNING troll_score, updated_at",
        )
        .bind(id.as_str())
        .bind(Utc::now())
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(troll_score, updated_at)| Submitter {
            id: id.clone(),
            troll_score,
            is_troll: true,
            updated_at,
        }))
    }

    async fn record_event(&self, kind: EventKind) -> Result<Event> {
        let now = Utc::now();
        let payload = serde_json::to_string(&kind)
            .map_err(|e| Error::Other(format!("event encoding failed: {e}")))?;
        let (seq,): (i64,) =
            sqlx::query_as("INSERT INTO events (timestamp, kind) VALUES ($1, $2) RETURNING seq")
                .bind(now)
                .bind(payload)
                .fetch_one(self.pool())
                .await?;
        Ok(Event {
            seq: seq as u64,
            timestamp: now,
            kind,
        })
    }

    async fn events_since(&self, since: u64) -> Result<Vec<Event>> {
        let rows: Vec<(i64, DateTime<Utc>, String)> = sqlx::query_as(
            "SELECT seq, timestamp, kind FROM events WHERE seq > $1 ORDER BY seq ASC",
        )
        .bind(since as i64)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(seq, timestamp, kind)| Event {
                seq: seq as u64,
                timestamp,
                kind: EventKind::decode(&kind),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct PlaceRow {
    id: Uuid,
    code: String,
    geo_unit: String,
}

impl PlaceRow {
    fn into_place(self) -> Place {
        Place {
            id: PlaceId(self.id),
            code: self.code,
            geo_unit: GeoUnitId(self.geo_unit),
        }
    }
}

#[derive(sqlx::FromRow)]
struct WorkUnitRow {
    id: Uuid,
    place_id: Uuid,
    geo_unit: String,
    category: String,
    status: String,
    confirmed_count_id: Option<Uuid>,
    eligible_at: Option<DateTime<Utc>>,
    geo_proportion: Option<f64>,
    geo_rank: Option<i32>,
    category_proportion: Option<f64>,
    category_rank: Option<i32>,
    scheduling_key: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkUnitRow {
    fn try_into_work_unit(self) -> Result<WorkUnit> {
        let scheduling = match (
            self.geo_proportion,
            self.geo_rank,
            self.category_proportion,
            self.category_rank,
            self.scheduling_key,
        ) {
            (Some(gp), Some(gr), Some(cp), Some(cr), Some(key)) => Some(Scheduling {
                geo: Standing {
                    proportion: gp,
                    rank: gr as u32,
                },
                category: Standing {
                    proportion: cp,
                    rank: cr as u32,
                },
                key,
            }),
            _ => None,
        };

        Ok(WorkUnit {
            id: WorkUnitId(self.id),
            place: PlaceId(self.place_id),
            geo_unit: GeoUnitId(self.geo_unit),
            category: CategoryId(self.category),
            status: self.status.parse()?,
            confirmed_count: self.confirmed_count_id.map(CountClaimId),
            eligible_at: self.eligible_at,
            scheduling,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttachmentRow {
    id: Uuid,
    status: String,
    place_id: Option<Uuid>,
    confirmed_identification_id: Option<Uuid>,
    geo_unit_hint: Option<String>,
    uploaded_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AttachmentRow {
    fn try_into_attachment(self) -> Result<Attachment> {
        Ok(Attachment {
            id: AttachmentId(self.id),
            status: self.status.parse()?,
            place: self.place_id.map(PlaceId),
            confirmed_identification: self.confirmed_identification_id.map(IdentificationClaimId),
            geo_unit_hint: self.geo_unit_hint.map(GeoUnitId),
            uploaded_at: self.uploaded_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct IdentificationClaimRow {
    id: Uuid,
    seq: i64,
    attachment_id: Uuid,
    submitter: String,
    place_id: Option<Uuid>,
    origin: String,
    invalidated: bool,
    processed: bool,
    recorded_at: DateTime<Utc>,
}

impl IdentificationClaimRow {
    fn try_into_claim(self) -> Result<IdentificationClaim> {
        Ok(IdentificationClaim {
            id: IdentificationClaimId(self.id),
            seq: self.seq,
            attachment: AttachmentId(self.attachment_id),
            submitter: SubmitterId(self.submitter),
            identity: match self.place_id {
                Some(place) => ClaimedIdentity::Place(PlaceId(place)),
                None => ClaimedIdentity::Problem,
            },
            origin: self.origin.parse()?,
            invalidated: self.invalidated,
            processed: self.processed,
            recorded_at: self.recorded_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CountClaimRow {
    id: Uuid,
    seq: i64,
    work_unit_id: Uuid,
    submitter: String,
    granularity: String,
    origin: String,
    signature: String,
    vote_lines: Json<Vec<VoteLine>>,
    invalidated: bool,
    processed: bool,
    recorded_at: DateTime<Utc>,
}

impl CountClaimRow {
    fn try_into_claim(self) -> Result<CountClaim> {
        Ok(CountClaim {
            id: CountClaimId(self.id),
            seq: self.seq,
            work_unit: WorkUnitId(self.work_unit_id),
            submitter: SubmitterId(self.submitter),
            granularity: self.granularity.parse()?,
            origin: self.origin.parse()?,
            signature: Signature(self.signature),
            lines: self.vote_lines.0,
            invalidated: self.invalidated,
            processed: self.processed,
            recorded_at: self.recorded_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CurveSegmentRow {
    id: Uuid,
    scope_kind: String,
    scope_ref: Option<String>,
    from_pct: i32,
    to_pct: i32,
    weight: i64,
    max_rank: Option<i32>,
}

impl CurveSegmentRow {
    fn try_into_segment(self) -> Result<CurveSegment> {
        let narrow = |value: i64, what: &str| {
            u32::try_from(value)
                .map_err(|_| Error::InvalidSegment(format!("stored {what} out of range: {value}")))
        };
        let mut segment = Segment::new(
            narrow(self.from_pct.into(), "lower bound")?,
            narrow(self.to_pct.into(), "upper bound")?,
            narrow(self.weight, "weight")?,
        )?;
        if let Some(max_rank) = self.max_rank {
            segment = segment.with_max_rank(narrow(max_rank.into(), "max rank")?);
        }
        Ok(CurveSegment {
            id: SegmentId(self.id),
            scope: CurveScope::from_parts(&self.scope_kind, self.scope_ref.as_deref())?,
            segment,
        })
    }
}
