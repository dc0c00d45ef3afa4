//! Smoke tests for the full observability stack.
//!
//! These tests require an OTLP collector on localhost:4317 feeding Tempo,
//! Prometheus and Loki on their default ports.
//!
//! Run with:
//! ```sh
//! cargo test --test telemetry_smoke_test -- --ignored --nocapture
//! ```

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use opentelemetry::KeyValue;
use tally_rs::config::Settings;
use tally_rs::engine::Engine;
use tally_rs::model::{ClaimedIdentity, Granularity, Target, VoteLine, WorkUnitId};
use tally_rs::store::MemoryStore;
use tally_rs::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry, metrics, spans};

static TELEMETRY: OnceLock<TelemetryGuard> = OnceLock::new();

fn ensure_telemetry() -> &'static TelemetryGuard {
    TELEMETRY.get_or_init(|| {
        let mut config = TelemetryConfig::new(Some("http://localhost:4317".to_string()), "info");
        config.service_name = "tally-smoke-test".to_string();
        init_telemetry(config).expect("failed to init telemetry")
    })
}

/// Force-flush all providers and give backends time to ingest.
async fn flush_and_wait(guard: &TelemetryGuard) {
    guard.force_flush();
    tokio::time::sleep(Duration::from_secs(8)).await;
}

async fn query(url: &str, params: &[(&str, &str)]) -> serde_json::Value {
    let resp = reqwest::Client::new()
        .get(url)
        .query(params)
        .send()
        .await
        .unwrap_or_else(|e| panic!("failed to query {url}: {e}"));
    assert!(resp.status().is_success(), "{url} returned {}", resp.status());
    resp.json().await.expect("failed to parse response")
}

#[test]
#[ignore]
fn smoke_traces() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        {
            let span = spans::consolidation_span(Target::WorkUnit(WorkUnitId::new()));
            let _enter = span.enter();
            spans::record_transition(&span, "empty", "total_unconfirmed");
        }

        flush_and_wait(guard).await;

        let body = query(
            "http://localhost:3200/api/search",
            &[("tags", "service.name=tally-smoke-test"), ("limit", "5")],
        )
        .await;
        let traces = body["traces"].as_array();
        assert!(
            traces.is_some_and(|t| !t.is_empty()),
            "expected traces in Tempo, got: {body}"
        );
    });
}

#[test]
#[ignore]
fn smoke_metrics() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        metrics::claims_submitted().add(
            2,
            &[KeyValue::new("kind", "count"), KeyValue::new("result", "counted")],
        );
        metrics::pass_duration_ms().record(42.5, &[KeyValue::new("operation", "pass")]);

        flush_and_wait(guard).await;

        let body = query(
            "http://localhost:9090/api/v1/query",
            &[("query", "tally_claims_submitted_total")],
        )
        .await;
        let results = body["data"]["result"].as_array();
        assert!(
            results.is_some_and(|r| !r.is_empty()),
            "expected metric results in Prometheus, got: {body}"
        );
    });
}

#[test]
#[ignore]
fn smoke_logs() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        tracing::info!(component = "smoke-test", "smoke test info log");
        tracing::warn!(component = "smoke-test", "smoke test warning log");

        flush_and_wait(guard).await;

        let body = query(
            "http://localhost:3100/loki/api/v1/query_range",
            &[("query", r#"{service_name="tally-smoke-test"}"#), ("limit", "10")],
        )
        .await;
        let streams = body["data"]["result"].as_array();
        assert!(
            streams.is_some_and(|s| !s.is_empty()),
            "expected log streams in Loki, got: {body}"
        );
    });
}

#[test]
#[ignore]
fn smoke_engine_flow() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let guard = ensure_telemetry();

        // A full identification and confirmation emits spans, metrics and logs.
        let engine = Engine::new(Arc::new(MemoryStore::new()), Arc::new(Settings::default()));
        engine.seed_curves().await.unwrap();
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
            engine
                .submit_count_claim(unit.id, who.into(), Granularity::Total, vec![VoteLine::new("blue", 4)])
                .await
                .unwrap();
        }
        engine.run_pass().await.unwrap();

        flush_and_wait(guard).await;

        let body = query(
            "http://localhost:9090/api/v1/query",
            &[("query", "tally_consolidation_state_transitions_total")],
        )
        .await;
        let series = body["data"]["result"].as_array().map_or(0, |r| r.len());
        println!("Engine flow: {series} transition series");
        assert!(series > 0, "expected transition metrics in Prometheus");
    });
}
