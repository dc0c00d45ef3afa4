//! Metric instrument factories for tally-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"tally-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for tally-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("tally-rs")
}

/// Counter: claims appended to the ledger.
/// Labels: `kind` ("identification" | "count"), `result` ("counted" | "stale" | "excluded").
pub fn claims_submitted() -> Counter<u64> {
    meter()
        .u64_counter("tally.claims.submitted")
        .with_description("Number of claims appended to the ledger")
        .build()
}

/// Counter: consolidation state transitions.
/// Labels: `entity` ("work_unit" | "attachment"), `from`, `to`.
pub fn state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("tally.consolidation.state_transitions")
        .with_description("Number of work unit and attachment state transitions")
        .build()
}

/// Counter: tasks handed to reporters.
/// Labels: `kind` ("identify" | "transcribe").
pub fn tasks_assigned() -> Counter<u64> {
    meter()
        .u64_counter("tally.queue.tasks_assigned")
        .with_description("Number of tasks handed out by next_task")
        .build()
}

/// Counter: task queue rebuilds.
pub fn queue_rebuilds() -> Counter<u64> {
    meter()
        .u64_counter("tally.queue.rebuilds")
        .with_description("Number of task queue rebuilds")
        .build()
}

/// Histogram: pending task replicas after a rebuild.
/// Labels: `kind`.
pub fn queue_size() -> Histogram<u64> {
    meter()
        .u64_histogram("tally.queue.size")
        .with_description("Pending task replicas after a rebuild")
        .build()
}

/// Histogram: pass duration in milliseconds.
/// Labels: `operation` ("consolidate" | "assign" | "rebuild" | "pass").
pub fn pass_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("tally.pass.duration_ms")
        .with_description("Consolidation and scheduling pass duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: submitters excluded as unreliable.
/// Labels: `automatic` ("true" | "false").
pub fn submitters_flagged() -> Counter<u64> {
    meter()
        .u64_counter("tally.submitters.flagged")
        .with_description("Number of submitters excluded as unreliable")
        .build()
}
