//! Control loop: runs consolidation and scheduling passes.
//!
//! A pass runs every `pass_interval_secs`, or sooner when the engine is
//! kicked by a new claim, upload or administrative change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{error, info};

use super::{Engine, PassReport};
use crate::error::Result;
use crate::store::Store;

/// The control loop over one engine.
pub struct ControlLoop<S: Store> {
    engine: Arc<Engine<S>>,
    shutdown: Arc<Notify>,
    interval: Duration,
}

impl<S: Store> Clone for ControlLoop<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            shutdown: Arc::clone(&self.shutdown),
            interval: self.interval,
        }
    }
}

impl<S: Store> ControlLoop<S> {
    pub fn new(engine: Arc<Engine<S>>) -> Self {
        let interval = Duration::from_secs(engine.settings().scheduler.pass_interval_secs);
        Self {
            engine,
            shutdown: Arc::new(Notify::new()),
            interval,
        }
    }

    /// Signal the loop to stop after the current pass.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run passes until shutdown. Pass errors are logged, not fatal.
    pub async fn run(&self) -> Result<()> {
        let kick = self.engine.kicker();
        info!(interval_secs = self.interval.as_secs(), "control loop started");

        loop {
            self.pass().await;

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("control loop shutting down");
                    return Ok(());
                }
                _ = kick.notified() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Run one pass, logging its outcome.
    pub async fn pass(&self) -> Option<PassReport> {
        match self.engine.run_pass().await {
            Ok(report) => {
                info!(
                    consolidated = report.consolidated,
                    transitions = report.transitions,
                    rescheduled = report.rescheduled,
                    identification_tasks = report.queue.identification_tasks,
                    transcription_tasks = report.queue.transcription_tasks,
                    "pass complete"
                );
                Some(report)
            }
            Err(e) => {
                error!("pass failed: {e}");
                None
            }
        }
    }
}
