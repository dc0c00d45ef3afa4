//! Parallel submissions against shared targets.

use std::sync::Arc;

use tally_rs::config::Settings;
use tally_rs::engine::{ClaimOutcome, Engine};
use tally_rs::model::*;
use tally_rs::store::MemoryStore;

async fn identified_unit(engine: &Engine<MemoryStore>, code: &str) -> WorkUnit {
    let place = engine.register_place(code, "north").await.unwrap();
    let unit = engine
        .declare_work_unit(place.id, "mayor".into())
        .await
        .unwrap();
    let attachment = engine.upload_attachment(None).await.unwrap();
    for who in ["scout-1", "scout-2"] {
        engine
            .submit_identification_claim(attachment.id, who.into(), ClaimedIdentity::Place(place.id))
            .await
            .unwrap();
    }
    unit
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_matching_claims_confirm_exactly_once() {
    let engine = Arc::new(Engine::new(
        Arc::new(MemoryStore::new()),
        Arc::new(Settings::default()),
    ));
    let unit = identified_unit(&engine, "P-001").await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .submit_count_claim(
                    unit.id,
                    format!("reporter-{i}").into(),
                    Granularity::Total,
                    vec![VoteLine::new("blue", 10), VoteLine::new("red", 5)],
                )
                .await
                .unwrap()
        }));
    }
    let mut receipts = Vec::new();
    for handle in handles {
        receipts.push(handle.await.unwrap());
    }

    let transitioned = receipts
        .iter()
        .filter(|r| r.outcome == ClaimOutcome::Counted { transitioned: true })
        .count();
    let stale = receipts
        .iter()
        .filter(|r| r.outcome == ClaimOutcome::Stale)
        .count();
    // empty -> total_unconfirmed -> total_confirmed_by_quorum, then frozen.
    assert_eq!(transitioned, 2);
    assert_eq!(stale, 8);

    let unit = engine.work_unit(unit.id).await.unwrap();
    assert_eq!(unit.status, WorkUnitStatus::TotalConfirmedByQuorum);
    let earliest = receipts.iter().map(|r| r.seq).min().unwrap();
    let confirmed = engine.confirmed_count(unit.id).await.unwrap().unwrap();
    assert_eq!(confirmed.seq, earliest);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_identifications_identify_once() {
    let engine = Arc::new(Engine::new(
        Arc::new(MemoryStore::new()),
        Arc::new(Settings::default()),
    ));
    let place = engine.register_place("P-001", "north").await.unwrap();
    let attachment = engine.upload_attachment(None).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..6 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .submit_identification_claim(
                    attachment.id,
                    format!("reporter-{i}").into(),
                    ClaimedIdentity::Place(place.id),
                )
                .await
                .unwrap()
        }));
    }
    let mut identified = 0;
    for handle in handles {
        if handle.await.unwrap().outcome == (ClaimOutcome::Counted { transitioned: true }) {
            identified += 1;
        }
    }
    assert_eq!(identified, 1);

    let events = engine.events_since(0).await.unwrap();
    let transitions = events
        .iter()
        .filter(|e| matches!(e.kind, tally_rs::event::EventKind::AttachmentTransition { .. }))
        .count();
    assert_eq!(transitions, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_targets_proceed_independently() {
    let engine = Arc::new(Engine::new(
        Arc::new(MemoryStore::new()),
        Arc::new(Settings::default()),
    ));
    let mut units = Vec::new();
    for i in 0..5 {
        units.push(identified_unit(&engine, &format!("P-{i:03}")).await);
    }

    let mut handles = Vec::new();
    for unit in &units {
        for who in ["ana", "bo"] {
            let engine = Arc::clone(&engine);
            let id = unit.id;
            handles.push(tokio::spawn(async move {
                engine
                    .submit_count_claim(id, who.into(), Granularity::Total, vec![VoteLine::new("blue", 1)])
                    .await
                    .unwrap()
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for unit in &units {
        assert_eq!(
            engine.work_unit(unit.id).await.unwrap().status,
            WorkUnitStatus::TotalConfirmedByQuorum
        );
    }
    let report = engine.run_pass().await.unwrap();
    assert_eq!(report.queue.transcription_tasks, 0);
}
