//! # tally-rs
//!
//! Quorum consolidation and fair task scheduling for crowd-sourced vote
//! tallies.
//!
//! Reporters identify photographs of tally sheets and transcribe the counts
//! they show. Independent claims are consolidated into confirmed counts once
//! enough of them agree, unreliable submitters are scored out, and the work
//! still needed is handed out breadth-first across geographic units and
//! categories.
//!
//! Storage is pluggable: [`store::MemoryStore`] for tests and embedding,
//! [`db::Db`] for Postgres.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod priority;
pub mod store;
pub mod telemetry;
