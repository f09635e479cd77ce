//! Task domain model (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AgentId, ObjectiveId, TaskId};

/// Task lifecycle: `pending -> queued -> assigned -> running -> completed |
/// failed | cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use TaskStatus::{Assigned, Cancelled, Completed, Failed, Pending, Queued, Running};
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Cancelled)
                | (Queued, Assigned)
                | (Queued, Pending) // demoted back if the chosen agent vanished
                | (Queued, Cancelled)
                | (Assigned, Running)
                | (Assigned, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Pending) // retried
                | (Failed, Cancelled)
                | (Pending, Failed) // transitive upstream-failed propagation
        )
    }
}

/// A unit of work with dependencies and a free-form type tag (the stage
/// name assigned by objective decomposition, spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub objective_id: Option<ObjectiveId>,
    pub description: String,
    pub priority: i32,
    pub dependencies: Vec<TaskId>,
    pub input: serde_json::Value,
    pub status: TaskStatus,
    pub assigned_agent: Option<AgentId>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Task {
    #[must_use]
    pub fn new(task_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            objective_id: None,
            description: description.into(),
            priority: 0,
            dependencies: Vec::new(),
            input: serde_json::Value::Null,
            status: TaskStatus::Pending,
            assigned_agent: None,
            attempt: 0,
            max_attempts: 1,
            timeout_ms: 300_000,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_objective(mut self, objective_id: ObjectiveId) -> Self {
        self.objective_id = Some(objective_id);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependencies = deps;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Whether every dependency id is present (and, if the caller supplies
    /// a completion predicate, completed) — used by the scheduler's
    /// promotion pass (spec §4.5 step 1).
    #[must_use]
    pub fn dependencies_satisfied(&self, is_completed: impl Fn(TaskId) -> bool) -> bool {
        self.dependencies.iter().all(|&d| is_completed(d))
    }

    #[must_use]
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }

    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        match next {
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_task_cannot_transition() {
        let mut task = Task::new("research", "do the thing");
        assert!(task.transition(TaskStatus::Queued));
        assert!(task.transition(TaskStatus::Assigned));
        assert!(task.transition(TaskStatus::Running));
        assert!(task.transition(TaskStatus::Completed));
        assert!(!task.transition(TaskStatus::Running));
    }

    #[test]
    fn max_attempts_one_is_terminal_after_single_failure() {
        let mut task = Task::new("t", "d").with_max_attempts(1);
        task.attempt = 1;
        assert!(!task.has_attempts_remaining());
    }
}
