//! Task dependency resolution: cycle detection and topological ordering.
//!
//! Adapted near-verbatim from the teacher's `services::dependency_resolver`,
//! generalized from `Option<Vec<Uuid>>` dependency lists to the core's
//! always-present `Vec<TaskId>` field.

use std::collections::{HashMap, HashSet};

use crate::domain::{Task, TaskId};
use crate::error::{CoreError, CoreResult};

/// Stateless dependency graph operations over a task set.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

fn detect_cycle_util(
    node: TaskId,
    graph: &HashMap<TaskId, Vec<TaskId>>,
    visited: &mut HashSet<TaskId>,
    rec_stack: &mut HashSet<TaskId>,
    path: &mut Vec<TaskId>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(&node) {
        for &neighbor in neighbors {
            if !visited.contains(&neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(&neighbor) {
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(&node);
    path.pop();
    false
}

impl DependencyResolver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate that every dependency of `task` is present in
    /// `available_tasks` (spec §3: "dependency list… must be within the
    /// same objective").
    pub fn validate_dependencies(&self, task: &Task, available_tasks: &[Task]) -> CoreResult<()> {
        let available_ids: HashSet<TaskId> = available_tasks.iter().map(|t| t.id).collect();
        for dep_id in &task.dependencies {
            if !available_ids.contains(dep_id) && *dep_id != task.id {
                return Err(CoreError::ValidationFailed(format!(
                    "dependency task {dep_id} not found in objective"
                )));
            }
        }
        Ok(())
    }

    /// Detect a circular dependency in a set of tasks, returning the cycle
    /// path if one exists.
    #[must_use]
    pub fn detect_cycle(&self, tasks: &[Task]) -> Option<Vec<TaskId>> {
        let mut graph: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for task in tasks {
            graph.entry(task.id).or_default().extend(task.dependencies.iter().copied());
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for task_id in graph.keys() {
            if !visited.contains(task_id)
                && detect_cycle_util(*task_id, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path);
            }
        }
        None
    }

    /// Kahn's-algorithm topological sort: dependencies before dependents.
    pub fn topological_sort(&self, tasks: &[Task]) -> CoreResult<Vec<Task>> {
        if let Some(cycle) = self.detect_cycle(tasks) {
            let first = cycle.first().copied().unwrap_or_default();
            return Err(CoreError::ValidationFailed(format!(
                "circular dependency detected involving task {first}"
            )));
        }

        let mut task_map: HashMap<TaskId, Task> = tasks.iter().map(|t| (t.id, t.clone())).collect();
        let mut in_degree: HashMap<TaskId, usize> = HashMap::new();
        let mut graph: HashMap<TaskId, Vec<TaskId>> = HashMap::new();

        for task in tasks {
            in_degree.entry(task.id).or_insert(0);
            for &dep_id in &task.dependencies {
                graph.entry(dep_id).or_default().push(task.id);
                *in_degree.entry(task.id).or_insert(0) += 1;
            }
        }

        let mut queue: Vec<TaskId> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();
        queue.sort();

        let mut sorted = Vec::new();
        while let Some(node_id) = queue.pop() {
            if let Some(task) = task_map.remove(&node_id) {
                sorted.push(task);
            }
            if let Some(neighbors) = graph.get(&node_id) {
                for &neighbor in neighbors {
                    if let Some(degree) = in_degree.get_mut(&neighbor) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push(neighbor);
                        }
                    }
                }
            }
        }

        if sorted.len() != tasks.len() {
            return Err(CoreError::ValidationFailed(
                "topological sort failed: cycle or disconnected graph".to_string(),
            ));
        }
        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_deps(deps: Vec<TaskId>) -> Task {
        let mut task = Task::new("stage", "description");
        task.dependencies = deps;
        task
    }

    #[test]
    fn validate_dependencies_success() {
        let resolver = DependencyResolver::new();
        let task1 = task_with_deps(vec![]);
        let task2 = task_with_deps(vec![task1.id]);
        assert!(resolver.validate_dependencies(&task2, &[task1]).is_ok());
    }

    #[test]
    fn validate_dependencies_missing() {
        let resolver = DependencyResolver::new();
        let missing = TaskId::new();
        let task = task_with_deps(vec![missing]);
        assert!(resolver.validate_dependencies(&task, &[]).is_err());
    }

    #[test]
    fn detect_cycle_none() {
        let resolver = DependencyResolver::new();
        let task1 = task_with_deps(vec![]);
        let task2 = task_with_deps(vec![task1.id]);
        assert!(resolver.detect_cycle(&[task1, task2]).is_none());
    }

    #[test]
    fn detect_cycle_found() {
        let resolver = DependencyResolver::new();
        let mut task1 = task_with_deps(vec![]);
        let mut task2 = task_with_deps(vec![]);
        task1.dependencies = vec![task2.id];
        task2.dependencies = vec![task1.id];
        assert!(resolver.detect_cycle(&[task1, task2]).is_some());
    }

    #[test]
    fn topological_sort_orders_dependencies_first() {
        let resolver = DependencyResolver::new();
        let task1 = task_with_deps(vec![]);
        let task2 = task_with_deps(vec![task1.id]);
        let task3 = task_with_deps(vec![task2.id]);

        let sorted = resolver
            .topological_sort(&[task3.clone(), task1.clone(), task2.clone()])
            .unwrap();

        assert_eq!(sorted[0].id, task1.id);
        assert_eq!(sorted[1].id, task2.id);
        assert_eq!(sorted[2].id, task3.id);
    }

    #[test]
    fn topological_sort_rejects_cycle() {
        let resolver = DependencyResolver::new();
        let mut task1 = task_with_deps(vec![]);
        let mut task2 = task_with_deps(vec![]);
        task1.dependencies = vec![task2.id];
        task2.dependencies = vec![task1.id];
        assert!(resolver.topological_sort(&[task1, task2]).is_err());
    }
}
