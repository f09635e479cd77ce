//! Objective domain model (spec §3, §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ObjectiveId, TaskId};

/// Decomposition strategy, selecting a template DAG (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Auto,
    Research,
    Development,
    Analysis,
}

/// Objective lifecycle: `planning -> executing -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    Planning,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl ObjectiveStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Progress counters for an objective's task DAG.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

/// A high-level goal, owner of a task DAG (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    pub id: ObjectiveId,
    pub description: String,
    pub strategy: Strategy,
    pub status: ObjectiveStatus,
    pub task_ids: Vec<TaskId>,
    pub progress: Progress,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Objective {
    #[must_use]
    pub fn new(description: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            id: ObjectiveId::new(),
            description: description.into(),
            strategy,
            status: ObjectiveStatus::Planning,
            task_ids: Vec::new(),
            progress: Progress::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn begin_execution(&mut self, task_ids: Vec<TaskId>) {
        self.progress.total = task_ids.len();
        self.task_ids = task_ids;
        self.status = ObjectiveStatus::Executing;
        self.started_at = Some(Utc::now());
    }

    /// Recompute terminal status from progress counters (spec §4.5 failure
    /// semantics: "Objective status becomes failed if any critical-path task
    /// fails beyond retries; otherwise completed when all tasks are terminal
    /// and no failures remain").
    pub fn recompute_status(&mut self, outstanding: usize) {
        if self.status.is_terminal() {
            return;
        }
        if self.progress.failed > 0 && outstanding == 0 {
            self.status = ObjectiveStatus::Failed;
            self.completed_at = Some(Utc::now());
        } else if outstanding == 0 && self.progress.failed == 0 {
            self.status = ObjectiveStatus::Completed;
            self.completed_at = Some(Utc::now());
        }
    }
}
