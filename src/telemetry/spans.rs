//! Span helpers for consolidation and scheduling.

use tracing::Span;

use crate::model::Target;

/// Start a span for consolidating one target.
///
/// `consolidation.status` is declared empty and filled by
/// [`record_transition`].
pub fn consolidation_span(target: Target) -> Span {
    tracing::info_span!(
        "consolidation.target",
        "consolidation.target" = %target,
        "consolidation.kind" = %target.kind(),
        "consolidation.status" = tracing::field::Empty,
    )
}

/// Record a state transition on the given span.
pub fn record_transition(span: &Span, from: &str, to: &str) {
    span.record("consolidation.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}

/// Start a span for one scheduling pass.
pub fn scheduler_pass_span(operation: &'static str) -> Span {
    tracing::info_span!(
        "scheduler.pass",
        "scheduler.operation" = operation,
        "scheduler.tasks" = tracing::field::Empty,
    )
}
