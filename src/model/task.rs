//! Assignable work: targets, pending tasks and assignments.

use serde::{Deserialize, Serialize};

use super::ids::{AttachmentId, WorkUnitId};

/// Something claims are made about. Also the unit of mutual exclusion
/// for consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Target {
    Attachment(AttachmentId),
    WorkUnit(WorkUnitId),
}

impl Target {
    pub fn kind(self) -> TaskKind {
        match self {
            Target::Attachment(_) => TaskKind::Identify,
            Target::WorkUnit(_) => TaskKind::Transcribe,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Attachment(id) => write!(f, "attachment/{id}"),
            Target::WorkUnit(id) => write!(f, "work_unit/{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Say which polling place a photo belongs to.
    Identify,
    /// Transcribe the vote counts of a work unit.
    Transcribe,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::Identify => "identify",
            TaskKind::Transcribe => "transcribe",
        };
        write!(f, "{s}")
    }
}

/// One replica of an outstanding task. Derived data: fully recomputable from
/// work unit and attachment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingTask {
    pub target: Target,
    /// Replica index, so several reporters can work the same target.
    pub replica: u32,
    pub scheduling_key: i32,
}

impl PendingTask {
    pub fn kind(&self) -> TaskKind {
        self.target.kind()
    }
}

/// What `next_task` hands to a reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub kind: TaskKind,
    pub target: Target,
    pub scheduling_key: i32,
}

impl From<&PendingTask> for Assignment {
    fn from(task: &PendingTask) -> Self {
        Self {
            kind: task.kind(),
            target: task.target,
            scheduling_key: task.scheduling_key,
        }
    }
}
