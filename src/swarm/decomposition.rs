//! Strategy → task-DAG templates (spec §4.5 "Decomposition").
//!
//! Grounded on the same stage-pipeline shape the teacher's
//! `services::dag_executor` builds waves from, but here the DAG is produced
//! up front from a fixed template keyed by [`Strategy`] rather than
//! discovered from a user-authored graph.

use crate::domain::{ObjectiveId, Strategy, Task};

/// One stage in a template: its type tag and the indices (into the same
/// template) of the stages it depends on.
struct Stage {
    kind: &'static str,
    deps: &'static [usize],
}

const RESEARCH: &[Stage] = &[
    Stage { kind: "research", deps: &[] },
    Stage { kind: "analysis", deps: &[0] },
    Stage { kind: "synthesis", deps: &[1] },
];

/// `planning -> implementation -> testing -> documentation`, with `testing`
/// fed by both `planning` and `implementation` (spec: "linear with fan-in at
/// testing").
const DEVELOPMENT: &[Stage] = &[
    Stage { kind: "planning", deps: &[] },
    Stage { kind: "implementation", deps: &[0] },
    Stage { kind: "testing", deps: &[0, 1] },
    Stage { kind: "documentation", deps: &[2] },
];

const ANALYSIS: &[Stage] = &[
    Stage { kind: "data-gathering", deps: &[] },
    Stage { kind: "analysis", deps: &[0] },
    Stage { kind: "visualization", deps: &[1] },
];

const EXPLORATORY: &[Stage] = &[
    Stage { kind: "exploration", deps: &[] },
    Stage { kind: "execution", deps: &[0] },
    Stage { kind: "validation", deps: &[1] },
];

/// Lexical heuristic used by [`Strategy::Auto`] (spec: `"build"`/`"create"`
/// reads as development-like, `"research"`/`"analyze"` reads as
/// research-like, otherwise a generic explore/execute/validate template).
fn template_for(strategy: Strategy, description: &str) -> &'static [Stage] {
    match strategy {
        Strategy::Research => RESEARCH,
        Strategy::Development => DEVELOPMENT,
        Strategy::Analysis => ANALYSIS,
        Strategy::Auto => {
            let lower = description.to_lowercase();
            if lower.contains("build") || lower.contains("create") {
                DEVELOPMENT
            } else if lower.contains("research") || lower.contains("analyze") {
                RESEARCH
            } else {
                EXPLORATORY
            }
        }
    }
}

/// Expand `(strategy, description)` into the objective's task list, wired
/// with dependencies and stamped with `objective_id`. Deterministic: the
/// same inputs always yield tasks with the same `task_type` sequence and
/// dependency shape (spec §8 round-trip property), though each call mints
/// fresh [`crate::domain::TaskId`]s.
pub(crate) fn decompose(objective_id: ObjectiveId, description: &str, strategy: Strategy) -> Vec<Task> {
    let template = template_for(strategy, description);
    let mut tasks: Vec<Task> = template
        .iter()
        .map(|stage| {
            Task::new(stage.kind, format!("{} phase for: {description}", stage.kind)).with_objective(objective_id)
        })
        .collect();

    for (index, stage) in template.iter().enumerate() {
        let deps: Vec<_> = stage.deps.iter().map(|&d| tasks[d].id).collect();
        tasks[index].dependencies = deps;
    }

    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_strategy_is_a_linear_chain_of_three() {
        let id = ObjectiveId::new();
        let tasks = decompose(id, "Summarize X", Strategy::Research);
        let kinds: Vec<_> = tasks.iter().map(|t| t.task_type.as_str()).collect();
        assert_eq!(kinds, vec!["research", "analysis", "synthesis"]);
        assert!(tasks[0].dependencies.is_empty());
        assert_eq!(tasks[1].dependencies, vec![tasks[0].id]);
        assert_eq!(tasks[2].dependencies, vec![tasks[1].id]);
    }

    #[test]
    fn development_strategy_fans_in_at_testing() {
        let id = ObjectiveId::new();
        let tasks = decompose(id, "Build a thing", Strategy::Development);
        let testing = tasks.iter().find(|t| t.task_type == "testing").unwrap();
        assert_eq!(testing.dependencies.len(), 2);
        assert!(testing.dependencies.contains(&tasks[0].id));
        assert!(testing.dependencies.contains(&tasks[1].id));
    }

    #[test]
    fn auto_strategy_prefers_development_for_build_language() {
        let id = ObjectiveId::new();
        let tasks = decompose(id, "Build and ship the widget", Strategy::Auto);
        assert_eq!(tasks[0].task_type, "planning");
    }

    #[test]
    fn auto_strategy_prefers_research_for_analyze_language() {
        let id = ObjectiveId::new();
        let tasks = decompose(id, "Analyze last quarter's churn", Strategy::Auto);
        assert_eq!(tasks[0].task_type, "research");
    }

    #[test]
    fn auto_strategy_falls_back_to_exploratory() {
        let id = ObjectiveId::new();
        let tasks = decompose(id, "Look into the weird outage", Strategy::Auto);
        let kinds: Vec<_> = tasks.iter().map(|t| t.task_type.as_str()).collect();
        assert_eq!(kinds, vec!["exploration", "execution", "validation"]);
    }

    #[test]
    fn decomposition_is_deterministic_in_shape() {
        let id = ObjectiveId::new();
        let a = decompose(id, "Summarize X", Strategy::Research);
        let b = decompose(id, "Summarize X", Strategy::Research);
        let kinds_a: Vec<_> = a.iter().map(|t| t.task_type.clone()).collect();
        let kinds_b: Vec<_> = b.iter().map(|t| t.task_type.clone()).collect();
        assert_eq!(kinds_a, kinds_b);
    }
}
