//! Per-target critical sections.
//!
//! Recording a claim and reconsolidating its target happen under the
//! target's lock, so two submissions for the same work unit or attachment
//! never interleave. Different targets proceed in parallel.
//!
//! Lock order: an attachment's lock may be held while taking work unit
//! locks, never the other way round.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

use crate::model::Target;

#[derive(Default)]
pub struct TargetLocks {
    locks: Mutex<HashMap<Target, Arc<tokio::sync::Mutex<()>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `target`. Released when the guard drops.
    pub async fn lock(&self, target: Target) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(target).or_default())
        };
        lock.lock_owned().await
    }

    /// Forget locks nobody holds or waits for.
    pub fn prune(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
