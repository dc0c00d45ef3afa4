//! Error types for tally-rs.
//!
//! Only local, synchronous failures are errors. Disagreement between reporters
//! and late claims are expected steady-state conditions and are modelled as
//! statuses and claim outcomes instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// A curve segment overlaps one already configured for the same scope.
    #[error("curve segment {requested} overlaps existing segment {existing}")]
    ConfigurationConflict { requested: String, existing: String },

    #[error("invalid curve segment: {0}")]
    InvalidSegment(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Optimistic write lost against a concurrent update of the same record.
    #[error("stale write: {0}")]
    StaleWrite(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
