//! Integration tests for claim consolidation.

use std::sync::Arc;

use tally_rs::config::Settings;
use tally_rs::engine::{ClaimOutcome, Engine, TargetStatus};
use tally_rs::error::Error;
use tally_rs::event::EventKind;
use tally_rs::model::*;
use tally_rs::store::{MemoryStore, Store};

fn test_engine() -> Engine<MemoryStore> {
    engine_with(Settings::default())
}

fn engine_with(settings: Settings) -> Engine<MemoryStore> {
    Engine::new(Arc::new(MemoryStore::new()), Arc::new(settings))
}

fn blue_red(blue: u32, red: u32) -> Vec<VoteLine> {
    vec![VoteLine::new("blue", blue), VoteLine::new("red", red)]
}

/// A place with one declared work unit, identified by two reporters.
async fn identified_unit(engine: &Engine<MemoryStore>) -> WorkUnit {
    let place = engine.register_place("P-001", "north").await.unwrap();
    let unit = engine
        .declare_work_unit(place.id, "mayor".into())
        .await
        .unwrap();
    let attachment = engine.upload_attachment(None).await.unwrap();
    for who in ["ana", "bo"] {
        engine
            .submit_identification_claim(attachment.id, who.into(), ClaimedIdentity::Place(place.id))
            .await
            .unwrap();
    }
    engine.work_unit(unit.id).await.unwrap()
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identification_quorum_identifies_attachment_and_opens_units() {
    let engine = test_engine();
    let place = engine.register_place("P-001", "north").await.unwrap();
    let unit = engine
        .declare_work_unit(place.id, "mayor".into())
        .await
        .unwrap();
    let attachment = engine.upload_attachment(Some("north".into())).await.unwrap();

    let first = engine
        .submit_identification_claim(attachment.id, "ana".into(), ClaimedIdentity::Place(place.id))
        .await
        .unwrap();
    assert_eq!(first.outcome, ClaimOutcome::Counted { transitioned: false });
    assert_eq!(first.status, TargetStatus::Attachment(AttachmentStatus::Unidentified));
    assert!(!engine.work_unit(unit.id).await.unwrap().is_eligible());

    let second = engine
        .submit_identification_claim(attachment.id, "bo".into(), ClaimedIdentity::Place(place.id))
        .await
        .unwrap();
    assert_eq!(second.outcome, ClaimOutcome::Counted { transitioned: true });

    let attachment = engine.attachment(attachment.id).await.unwrap();
    assert_eq!(attachment.status, AttachmentStatus::Identified);
    assert_eq!(attachment.place, Some(place.id));
    assert!(engine.work_unit(unit.id).await.unwrap().is_eligible());
}

#[tokio::test]
async fn imported_identification_identifies_at_once() {
    let engine = test_engine();
    let place = engine.register_place("P-001", "north").await.unwrap();
    let unit = engine
        .declare_work_unit(place.id, "mayor".into())
        .await
        .unwrap();
    let attachment = engine.upload_attachment(None).await.unwrap();
    engine
        .submit_identification_claim(attachment.id, "ana".into(), ClaimedIdentity::Problem)
        .await
        .unwrap();

    let imported = engine
        .import_identification_claim(attachment.id, "importer".into(), place.id)
        .await
        .unwrap();
    assert_eq!(imported.outcome, ClaimOutcome::Counted { transitioned: true });
    assert_eq!(imported.status, TargetStatus::Attachment(AttachmentStatus::Identified));

    let stored = engine.attachment(attachment.id).await.unwrap();
    assert_eq!(stored.place, Some(place.id));
    assert!(stored.confirmed_identification.is_some());
    assert!(engine.work_unit(unit.id).await.unwrap().is_eligible());

    let late = engine
        .import_identification_claim(attachment.id, "importer".into(), place.id)
        .await
        .unwrap();
    assert_eq!(late.outcome, ClaimOutcome::Stale);
}

#[tokio::test]
async fn problem_reports_flag_attachment() {
    let engine = test_engine();
    let attachment = engine.upload_attachment(None).await.unwrap();
    for who in ["ana", "bo"] {
        engine
            .submit_identification_claim(attachment.id, who.into(), ClaimedIdentity::Problem)
            .await
            .unwrap();
    }
    let attachment = engine.attachment(attachment.id).await.unwrap();
    assert_eq!(attachment.status, AttachmentStatus::Flagged);
    assert_eq!(attachment.place, None);
}

#[tokio::test]
async fn work_unit_declared_after_identification_is_eligible() {
    let engine = test_engine();
    let place = engine.register_place("P-001", "north").await.unwrap();
    let attachment = engine.upload_attachment(None).await.unwrap();
    for who in ["ana", "bo"] {
        engine
            .submit_identification_claim(attachment.id, who.into(), ClaimedIdentity::Place(place.id))
            .await
            .unwrap();
    }
    let unit = engine
        .declare_work_unit(place.id, "council".into())
        .await
        .unwrap();
    assert!(unit.is_eligible());

    let again = engine
        .declare_work_unit(place.id, "council".into())
        .await
        .unwrap();
    assert_eq!(again.id, unit.id);
}

#[tokio::test]
async fn claim_for_unknown_place_is_rejected() {
    let engine = test_engine();
    let attachment = engine.upload_attachment(None).await.unwrap();
    let result = engine
        .submit_identification_claim(attachment.id, "ana".into(), ClaimedIdentity::Place(PlaceId::new()))
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));

    let result = engine
        .submit_count_claim(WorkUnitId::new(), "ana".into(), Granularity::Total, blue_red(1, 2))
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

// ---------------------------------------------------------------------------
// Counts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn matching_totals_confirm_by_quorum() {
    let engine = test_engine();
    let unit = identified_unit(&engine).await;

    let first = engine
        .submit_count_claim(unit.id, "ana".into(), Granularity::Total, blue_red(10, 5))
        .await
        .unwrap();
    assert_eq!(first.status, TargetStatus::WorkUnit(WorkUnitStatus::TotalUnconfirmed));

    let second = engine
        .submit_count_claim(unit.id, "bo".into(), Granularity::Total, blue_red(10, 5))
        .await
        .unwrap();
    assert_eq!(second.outcome, ClaimOutcome::Counted { transitioned: true });
    assert_eq!(
        second.status,
        TargetStatus::WorkUnit(WorkUnitStatus::TotalConfirmedByQuorum)
    );

    let confirmed = engine.confirmed_count(unit.id).await.unwrap().unwrap();
    assert_eq!(confirmed.seq, first.seq);
    assert_eq!(confirmed.lines, blue_red(10, 5));
}

#[tokio::test]
async fn confirmation_is_idempotent() {
    let engine = test_engine();
    let unit = identified_unit(&engine).await;
    for who in ["ana", "bo"] {
        engine
            .submit_count_claim(unit.id, who.into(), Granularity::Total, blue_red(10, 5))
            .await
            .unwrap();
    }
    let confirmed = engine.work_unit(unit.id).await.unwrap();
    assert_eq!(confirmed.status, WorkUnitStatus::TotalConfirmedByQuorum);

    engine.consolidate_pending().await.unwrap();
    engine.consolidate_pending().await.unwrap();
    let again = engine.work_unit(unit.id).await.unwrap();
    assert_eq!(again.status, confirmed.status);
    assert_eq!(again.confirmed_count, confirmed.confirmed_count);

    // A third matching claim changes nothing either.
    let third = engine
        .submit_count_claim(unit.id, "cy".into(), Granularity::Total, blue_red(10, 5))
        .await
        .unwrap();
    assert_eq!(third.outcome, ClaimOutcome::Stale);
    engine.consolidate_pending().await.unwrap();
    let last = engine.work_unit(unit.id).await.unwrap();
    assert_eq!(last.status, confirmed.status);
    assert_eq!(last.confirmed_count, confirmed.confirmed_count);
}

#[tokio::test]
async fn tallies_with_run_together_names_do_not_match() {
    let engine = test_engine();
    let unit = identified_unit(&engine).await;
    engine
        .submit_count_claim(unit.id, "ana".into(), Granularity::Total, vec![VoteLine::new("a-1|b", 2)])
        .await
        .unwrap();
    let second = engine
        .submit_count_claim(
            unit.id,
            "bo".into(),
            Granularity::Total,
            vec![VoteLine::new("a", 1), VoteLine::new("b", 2)],
        )
        .await
        .unwrap();
    assert_eq!(
        second.status,
        TargetStatus::WorkUnit(WorkUnitStatus::TotalUnconfirmed)
    );
    assert!(engine.confirmed_count(unit.id).await.unwrap().is_none());
}

#[tokio::test]
async fn claim_after_confirmation_is_stale() {
    let engine = test_engine();
    let unit = identified_unit(&engine).await;
    for who in ["ana", "bo"] {
        engine
            .submit_count_claim(unit.id, who.into(), Granularity::Total, blue_red(10, 5))
            .await
            .unwrap();
    }
    let confirmed = engine.work_unit(unit.id).await.unwrap().confirmed_count;

    let late = engine
        .submit_count_claim(unit.id, "cy".into(), Granularity::Total, blue_red(99, 1))
        .await
        .unwrap();
    assert_eq!(late.outcome, ClaimOutcome::Stale);

    let unit = engine.work_unit(unit.id).await.unwrap();
    assert_eq!(unit.status, WorkUnitStatus::TotalConfirmedByQuorum);
    assert_eq!(unit.confirmed_count, confirmed);
    // Recorded nonetheless.
    assert_eq!(engine.count_claims(unit.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn same_submitter_cannot_reach_quorum_alone() {
    let engine = test_engine();
    let unit = identified_unit(&engine).await;

    engine
        .submit_count_claim(unit.id, "ana".into(), Granularity::Total, blue_red(10, 5))
        .await
        .unwrap();
    let repeat = engine
        .submit_count_claim(unit.id, "ana".into(), Granularity::Total, blue_red(10, 5))
        .await
        .unwrap();

    assert_eq!(repeat.superseded, 1);
    assert_eq!(repeat.outcome, ClaimOutcome::Counted { transitioned: false });
    assert_eq!(
        engine.work_unit(unit.id).await.unwrap().status,
        WorkUnitStatus::TotalUnconfirmed
    );
}

#[tokio::test]
async fn corrected_claim_replaces_earlier_one() {
    let engine = test_engine();
    let unit = identified_unit(&engine).await;

    engine
        .submit_count_claim(unit.id, "ana".into(), Granularity::Total, blue_red(10, 5))
        .await
        .unwrap();
    engine
        .submit_count_claim(unit.id, "bo".into(), Granularity::Total, blue_red(12, 5))
        .await
        .unwrap();
    // Two disagreeing claims at quorum two are not yet a conflict.
    assert_eq!(
        engine.work_unit(unit.id).await.unwrap().status,
        WorkUnitStatus::TotalUnconfirmed
    );

    let corrected = engine
        .submit_count_claim(unit.id, "ana".into(), Granularity::Total, blue_red(12, 5))
        .await
        .unwrap();
    assert_eq!(corrected.superseded, 1);
    assert_eq!(
        corrected.status,
        TargetStatus::WorkUnit(WorkUnitStatus::TotalConfirmedByQuorum)
    );
}

#[tokio::test]
async fn disagreement_beyond_quorum_is_a_conflict_resolved_by_import() {
    let engine = test_engine();
    let unit = identified_unit(&engine).await;
    for (who, blue) in [("ana", 10), ("bo", 11), ("cy", 12)] {
        engine
            .submit_count_claim(unit.id, who.into(), Granularity::Total, blue_red(blue, 5))
            .await
            .unwrap();
    }
    assert_eq!(
        engine.work_unit(unit.id).await.unwrap().status,
        WorkUnitStatus::TotalConflict
    );

    let interactive = engine
        .submit_count_claim(unit.id, "dan".into(), Granularity::Total, blue_red(11, 5))
        .await
        .unwrap();
    assert_eq!(interactive.outcome, ClaimOutcome::Stale);

    let import = engine
        .import_count_claim(unit.id, "registry".into(), Granularity::Total, blue_red(11, 5))
        .await
        .unwrap();
    assert_eq!(
        import.status,
        TargetStatus::WorkUnit(WorkUnitStatus::TotalConfirmedByImport)
    );
    let confirmed = engine.confirmed_count(unit.id).await.unwrap().unwrap();
    assert_eq!(confirmed.origin, Origin::BulkImport);
}

#[tokio::test]
async fn partial_confirmation_advances_to_total() {
    let engine = test_engine();
    let unit = identified_unit(&engine).await;
    for who in ["ana", "bo"] {
        engine
            .submit_count_claim(unit.id, who.into(), Granularity::Partial, blue_red(3, 1))
            .await
            .unwrap();
    }
    let partial = engine.work_unit(unit.id).await.unwrap();
    assert_eq!(partial.status, WorkUnitStatus::PartialConfirmedByQuorum);
    assert!(partial.status.needs_transcription());
    assert!(partial.confirmed_count.is_some());

    // A further partial claim leaves the confirmed partial untouched.
    let extra = engine
        .submit_count_claim(unit.id, "cy".into(), Granularity::Partial, blue_red(4, 1))
        .await
        .unwrap();
    assert_eq!(extra.outcome, ClaimOutcome::Counted { transitioned: false });
    assert_eq!(
        engine.work_unit(unit.id).await.unwrap().confirmed_count,
        partial.confirmed_count
    );

    engine
        .submit_count_claim(unit.id, "cy".into(), Granularity::Total, blue_red(10, 5))
        .await
        .unwrap();
    let opened = engine.work_unit(unit.id).await.unwrap();
    assert_eq!(opened.status, WorkUnitStatus::TotalUnconfirmed);
    assert_eq!(opened.confirmed_count, partial.confirmed_count);

    engine
        .submit_count_claim(unit.id, "dan".into(), Granularity::Total, blue_red(10, 5))
        .await
        .unwrap();
    let total = engine.work_unit(unit.id).await.unwrap();
    assert_eq!(total.status, WorkUnitStatus::TotalConfirmedByQuorum);
    let confirmed = engine.confirmed_count(unit.id).await.unwrap().unwrap();
    assert_eq!(confirmed.granularity, Granularity::Total);
}

// ---------------------------------------------------------------------------
// Anti-troll
// ---------------------------------------------------------------------------

fn strict() -> Settings {
    let mut settings = Settings::default();
    settings.antitroll.threshold = 5;
    settings
}

#[tokio::test]
async fn far_off_submitter_is_excluded() {
    let engine = engine_with(strict());
    let unit = identified_unit(&engine).await;

    engine
        .submit_count_claim(unit.id, "cy".into(), Granularity::Total, blue_red(100, 5))
        .await
        .unwrap();
    for who in ["ana", "bo"] {
        engine
            .submit_count_claim(unit.id, who.into(), Granularity::Total, blue_red(10, 5))
            .await
            .unwrap();
    }
    assert_eq!(
        engine.work_unit(unit.id).await.unwrap().status,
        WorkUnitStatus::TotalConfirmedByQuorum
    );

    let cy = engine.store().get_submitter(&"cy".into()).await.unwrap();
    assert!(cy.is_troll);
    assert_eq!(cy.troll_score, 90);
    let ana = engine.store().get_submitter(&"ana".into()).await.unwrap();
    assert!(!ana.is_troll);
    // One agreement identifying the photo, one on the count.
    assert_eq!(ana.troll_score, -2);

    let events = engine.events_since(0).await.unwrap();
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::SubmitterMarkedTroll { submitter, automatic: true, .. } if submitter.as_str() == "cy"
    )));
}

#[tokio::test]
async fn excluded_submitter_claims_stop_counting() {
    let engine = engine_with(strict());
    let unit = identified_unit(&engine).await;

    let other_place = engine.register_place("P-002", "north").await.unwrap();
    let other = engine
        .declare_work_unit(other_place.id, "mayor".into())
        .await
        .unwrap();
    engine
        .submit_count_claim(other.id, "cy".into(), Granularity::Total, blue_red(7, 7))
        .await
        .unwrap();

    engine
        .submit_count_claim(unit.id, "cy".into(), Granularity::Total, blue_red(100, 5))
        .await
        .unwrap();
    for who in ["ana", "bo"] {
        engine
            .submit_count_claim(unit.id, who.into(), Granularity::Total, blue_red(10, 5))
            .await
            .unwrap();
    }

    let (consolidated, _) = engine.consolidate_pending().await.unwrap();
    assert!(consolidated >= 1);

    // cy's earlier claim no longer pairs with a matching one.
    let receipt = engine
        .submit_count_claim(other.id, "dan".into(), Granularity::Total, blue_red(7, 7))
        .await
        .unwrap();
    assert_eq!(
        receipt.status,
        TargetStatus::WorkUnit(WorkUnitStatus::TotalUnconfirmed)
    );

    let excluded = engine
        .submit_count_claim(other.id, "cy".into(), Granularity::Total, blue_red(7, 7))
        .await
        .unwrap();
    assert_eq!(excluded.outcome, ClaimOutcome::Excluded);
    assert_eq!(
        engine.work_unit(other.id).await.unwrap().status,
        WorkUnitStatus::TotalUnconfirmed
    );
}

#[tokio::test]
async fn administrators_mark_and_clear_trolls() {
    let engine = test_engine();
    let unit = identified_unit(&engine).await;

    let marked = engine.mark_troll(&"eve".into()).await.unwrap();
    assert!(marked.is_troll);
    let receipt = engine
        .submit_count_claim(unit.id, "eve".into(), Granularity::Total, blue_red(1, 1))
        .await
        .unwrap();
    assert_eq!(receipt.outcome, ClaimOutcome::Excluded);

    let cleared = engine.clear_troll(&"eve".into(), 0).await.unwrap();
    assert!(!cleared.is_troll);
    let receipt = engine
        .submit_count_claim(unit.id, "eve".into(), Granularity::Total, blue_red(1, 1))
        .await
        .unwrap();
    assert_eq!(receipt.outcome, ClaimOutcome::Counted { transitioned: true });
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transitions_are_logged_in_order() {
    let engine = test_engine();
    let unit = identified_unit(&engine).await;
    for who in ["ana", "bo"] {
        engine
            .submit_count_claim(unit.id, who.into(), Granularity::Total, blue_red(10, 5))
            .await
            .unwrap();
    }

    let events = engine.events_since(0).await.unwrap();
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));

    let transitions: Vec<(WorkUnitStatus, WorkUnitStatus)> = events
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::WorkUnitTransition { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (WorkUnitStatus::Empty, WorkUnitStatus::TotalUnconfirmed),
            (
                WorkUnitStatus::TotalUnconfirmed,
                WorkUnitStatus::TotalConfirmedByQuorum
            ),
        ]
    );

    let last = events.last().unwrap().seq;
    assert!(engine.events_since(last).await.unwrap().is_empty());
}

#[tokio::test]
async fn events_serialize_with_type_tag() {
    let engine = test_engine();
    let attachment = engine.upload_attachment(None).await.unwrap();
    engine
        .submit_identification_claim(attachment.id, "ana".into(), ClaimedIdentity::Problem)
        .await
        .unwrap();

    let events = engine.events_since(0).await.unwrap();
    let json = serde_json::to_value(&events[0].kind).unwrap();
    assert_eq!(json["type"], serde_json::json!("identification_claim_recorded"));
    assert_eq!(json["submitter"], serde_json::json!("ana"));
    assert_eq!(json["excluded"], serde_json::json!(false));
}
