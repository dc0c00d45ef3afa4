//! Submitter reliability record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::SubmitterId;

/// Reliability bookkeeping for one submitter.
///
/// The score rises when the submitter disagrees with confirmed results and
/// falls when they agree. Crossing the configured threshold flags them as a
/// troll, which excludes all their claims from consolidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitter {
    pub id: SubmitterId,
    pub troll_score: i64,
    pub is_troll: bool,
    pub updated_at: DateTime<Utc>,
}

impl Submitter {
    pub fn new(id: SubmitterId) -> Self {
        Self {
            id,
            troll_score: 0,
            is_troll: false,
            updated_at: Utc::now(),
        }
    }
}
