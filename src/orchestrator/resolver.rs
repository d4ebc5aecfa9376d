//! Dependency resolution over a project's step graph
//!
//! Pure functions that answer "what can run now?", "what does completing this
//! step unlock?" and "can this graph ever finish?". None of them perform I/O.

use crate::state::project::{Step, StepId};
use crate::state::status::StepStatus;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Structural problems that make a step graph unusable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A step lists a prerequisite that does not exist in the project
    #[error("unresolved dependency: step '{step}' depends on unknown step '{missing}'")]
    UnknownDependency {
        /// Step declaring the dependency
        step: String,
        /// Missing prerequisite
        missing: String,
    },

    /// A step lists itself as a prerequisite
    #[error("step '{0}' depends on itself")]
    SelfDependency(String),

    /// The prerequisites form a cycle
    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

fn status_map(steps: &[Step]) -> HashMap<&str, StepStatus> {
    steps
        .iter()
        .map(|step| (step.id.as_str(), step.status))
        .collect()
}

fn prerequisites_completed(step: &Step, statuses: &HashMap<&str, StepStatus>) -> bool {
    step.depends_on
        .iter()
        .all(|dep| statuses.get(dep.as_str()) == Some(&StepStatus::Completed))
}

/// Steps that may run now, in ascending `order`
///
/// A step is eligible when it is `available` and every prerequisite is
/// `completed`. Steps with equal `order` keep their position in `steps`.
pub fn eligible_steps(steps: &[Step]) -> Vec<&Step> {
    let statuses = status_map(steps);
    let mut eligible: Vec<&Step> = steps
        .iter()
        .filter(|step| step.status == StepStatus::Available)
        .filter(|step| prerequisites_completed(step, &statuses))
        .collect();
    eligible.sort_by_key(|step| step.order);
    eligible
}

/// Unlock the followers of a freshly completed step
///
/// Every `locked` step listing `completed_id` whose prerequisites are now all
/// `completed` becomes `available`. Returns the IDs of the unlocked steps.
pub fn unlock_followers(steps: &mut [Step], completed_id: &str) -> Vec<StepId> {
    let ready: Vec<StepId> = {
        let statuses = status_map(steps);
        steps
            .iter()
            .filter(|step| step.status == StepStatus::Locked)
            .filter(|step| step.depends_on.iter().any(|dep| dep == completed_id))
            .filter(|step| prerequisites_completed(step, &statuses))
            .map(|step| step.id.clone())
            .collect()
    };

    let mut unlocked = Vec::new();
    for step in steps.iter_mut() {
        if ready.contains(&step.id) && step.set_status(StepStatus::Available).is_ok() {
            unlocked.push(step.id.clone());
        }
    }
    unlocked
}

/// Whether the prerequisites contain a cycle
pub fn detect_cycle(steps: &[Step]) -> bool {
    find_cycle(steps).is_some()
}

/// Find one dependency cycle, returned as a path that starts and ends on the
/// same step ID
pub fn find_cycle(steps: &[Step]) -> Option<Vec<StepId>> {
    let graph: HashMap<&str, Vec<&str>> = steps
        .iter()
        .map(|step| {
            (
                step.id.as_str(),
                step.depends_on.iter().map(String::as_str).collect(),
            )
        })
        .collect();

    let mut visited = HashSet::new();
    let mut stack = Vec::new();

    // Iterate in declaration order so the reported cycle is deterministic
    for step in steps {
        if let Some(cycle) = cycle_dfs(&graph, step.id.as_str(), &mut visited, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

/// DFS helper; `stack` is the current recursion path
fn cycle_dfs<'a>(
    graph: &HashMap<&'a str, Vec<&'a str>>,
    node: &'a str,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<StepId>> {
    if let Some(pos) = stack.iter().position(|n| *n == node) {
        let mut cycle: Vec<StepId> = stack[pos..].iter().map(|n| n.to_string()).collect();
        cycle.push(node.to_string());
        return Some(cycle);
    }
    if !visited.insert(node) {
        return None;
    }

    stack.push(node);
    if let Some(deps) = graph.get(node) {
        for dep in deps {
            if let Some(cycle) = cycle_dfs(graph, dep, visited, stack) {
                return Some(cycle);
            }
        }
    }
    stack.pop();
    None
}

/// Reject unknown prerequisites, self-dependencies and cycles
pub fn validate_graph(steps: &[Step]) -> Result<(), GraphError> {
    let ids: HashSet<&str> = steps.iter().map(|step| step.id.as_str()).collect();

    for step in steps {
        for dep in &step.depends_on {
            if dep == &step.id {
                return Err(GraphError::SelfDependency(step.id.clone()));
            }
            if !ids.contains(dep.as_str()) {
                return Err(GraphError::UnknownDependency {
                    step: step.id.clone(),
                    missing: dep.clone(),
                });
            }
        }
    }

    match find_cycle(steps) {
        Some(cycle) => Err(GraphError::Cycle(cycle)),
        None => Ok(()),
    }
}

/// Non-terminal steps that can never become eligible
///
/// A step is blocked when some transitive prerequisite ended `failed` or
/// `cancelled`; such a step stays `locked` for the rest of the run.
pub fn blocked_steps(steps: &[Step]) -> Vec<StepId> {
    let by_id: HashMap<&str, &Step> = steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut memo: HashMap<&str, bool> = HashMap::new();

    steps
        .iter()
        .filter(|step| !step.status.is_terminal())
        .filter(|step| is_blocked(step.id.as_str(), &by_id, &mut memo, &mut HashSet::new()))
        .map(|step| step.id.clone())
        .collect()
}

fn is_blocked<'a>(
    id: &'a str,
    by_id: &HashMap<&'a str, &'a Step>,
    memo: &mut HashMap<&'a str, bool>,
    visiting: &mut HashSet<&'a str>,
) -> bool {
    if let Some(known) = memo.get(id) {
        return *known;
    }
    // A cycle never resolves; validate_graph rejects those before a run
    if !visiting.insert(id) {
        return false;
    }

    let Some(step) = by_id.get(id).copied() else {
        return false;
    };
    let blocked = step.depends_on.iter().any(|dep| match by_id.get(dep.as_str()) {
        Some(prereq) if matches!(prereq.status, StepStatus::Failed | StepStatus::Cancelled) => {
            true
        }
        Some(_) => is_blocked(dep.as_str(), by_id, memo, visiting),
        None => false,
    });

    visiting.remove(id);
    memo.insert(id, blocked);
    blocked
}

/// Group steps by dependency depth
///
/// Level 0 holds steps without prerequisites, level `n` holds steps whose
/// deepest prerequisite sits at level `n - 1`. Steps of one level are
/// independent of each other. Each level is sorted by `order`.
/// Returns an empty list for cyclic graphs.
pub fn depth_levels(steps: &[Step]) -> Vec<Vec<StepId>> {
    if detect_cycle(steps) {
        return Vec::new();
    }

    let by_id: HashMap<&str, &Step> = steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut depth_cache: HashMap<&str, usize> = HashMap::new();

    fn depth<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a Step>,
        cache: &mut HashMap<&'a str, usize>,
    ) -> usize {
        if let Some(d) = cache.get(id) {
            return *d;
        }
        let d = by_id
            .get(id)
            .copied()
            .map(|step| {
                step.depends_on
                    .iter()
                    .filter(|dep| by_id.contains_key(dep.as_str()))
                    .map(|dep| depth(dep.as_str(), by_id, cache) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        cache.insert(id, d);
        d
    }

    let mut ordered: Vec<&Step> = steps.iter().collect();
    ordered.sort_by_key(|step| step.order);

    let mut levels: Vec<Vec<StepId>> = Vec::new();
    for step in ordered {
        let d = depth(step.id.as_str(), &by_id, &mut depth_cache);
        if levels.len() <= d {
            levels.resize_with(d + 1, Vec::new);
        }
        levels[d].push(step.id.clone());
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, order: u32, deps: &[&str]) -> Step {
        let mut step = Step::new(id, order, deps.iter().map(|d| d.to_string()).collect());
        step.id = id.to_string();
        step
    }

    fn complete(steps: &mut [Step], id: &str) {
        let step = steps.iter_mut().find(|s| s.id == id).unwrap();
        step.status = StepStatus::Completed;
    }

    fn ids(steps: &[&Step]) -> Vec<String> {
        steps.iter().map(|s| s.id.clone()).collect()
    }

    #[test]
    fn test_roots_are_eligible_in_order() {
        let steps = vec![step("b", 2, &[]), step("a", 1, &[]), step("c", 3, &["a"])];
        assert_eq!(ids(&eligible_steps(&steps)), vec!["a", "b"]);
    }

    #[test]
    fn test_equal_order_keeps_position() {
        let steps = vec![step("x", 1, &[]), step("y", 1, &[]), step("z", 1, &[])];
        assert_eq!(ids(&eligible_steps(&steps)), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_unlock_cascade() {
        let mut steps = vec![step("a", 1, &[]), step("b", 2, &["a"]), step("c", 3, &["b"])];

        complete(&mut steps, "a");
        let unlocked = unlock_followers(&mut steps, "a");
        assert_eq!(unlocked, vec!["b"]);
        assert_eq!(ids(&eligible_steps(&steps)), vec!["b"]);
        assert_eq!(steps[2].status, StepStatus::Locked);

        complete(&mut steps, "b");
        assert_eq!(unlock_followers(&mut steps, "b"), vec!["c"]);
        assert_eq!(ids(&eligible_steps(&steps)), vec!["c"]);
    }

    #[test]
    fn test_unlock_waits_for_all_prerequisites() {
        let mut steps = vec![step("a", 1, &[]), step("b", 2, &[]), step("c", 3, &["a", "b"])];
        complete(&mut steps, "a");
        assert!(unlock_followers(&mut steps, "a").is_empty());
        complete(&mut steps, "b");
        assert_eq!(unlock_followers(&mut steps, "b"), vec!["c"]);
    }

    #[test]
    fn test_detect_cycle() {
        let steps = vec![step("a", 1, &["b"]), step("b", 2, &["a"])];
        assert!(detect_cycle(&steps));
        let cycle = find_cycle(&steps).unwrap();
        assert_eq!(cycle.first(), cycle.last());

        let acyclic = vec![step("a", 1, &[]), step("b", 2, &["a"])];
        assert!(!detect_cycle(&acyclic));
    }

    #[test]
    fn test_validate_graph_errors() {
        let unknown = vec![step("a", 1, &["ghost"])];
        assert!(matches!(
            validate_graph(&unknown),
            Err(GraphError::UnknownDependency { .. })
        ));

        let selfish = vec![step("a", 1, &["a"])];
        assert_eq!(
            validate_graph(&selfish),
            Err(GraphError::SelfDependency("a".to_string()))
        );

        let cyclic = vec![step("a", 1, &["c"]), step("b", 2, &["a"]), step("c", 3, &["b"])];
        match validate_graph(&cyclic) {
            Err(GraphError::Cycle(path)) => assert_eq!(path.len(), 4),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_blocked_steps_follow_failures_transitively() {
        let mut steps = vec![
            step("a", 1, &[]),
            step("b", 2, &["a"]),
            step("c", 3, &["b"]),
            step("d", 4, &[]),
        ];
        steps[0].status = StepStatus::Failed;
        assert_eq!(blocked_steps(&steps), vec!["b", "c"]);
    }

    #[test]
    fn test_depth_levels() {
        let steps = vec![
            step("install", 1, &[]),
            step("lint", 2, &["install"]),
            step("test", 3, &["install"]),
            step("deploy", 4, &["lint", "test"]),
        ];
        assert_eq!(
            depth_levels(&steps),
            vec![
                vec!["install".to_string()],
                vec!["lint".to_string(), "test".to_string()],
                vec!["deploy".to_string()],
            ]
        );
    }

    #[test]
    fn test_completed_set_is_dependency_closed() {
        // Simulate a full run and check that no step completes before its
        // prerequisites, whatever the declaration order.
        let mut steps = vec![
            step("d", 4, &["b", "c"]),
            step("c", 3, &["a"]),
            step("b", 2, &["a"]),
            step("a", 1, &[]),
        ];
        loop {
            let next = match eligible_steps(&steps).first() {
                Some(s) => s.id.clone(),
                None => break,
            };
            for s in steps.iter().filter(|s| s.status == StepStatus::Completed) {
                for dep in &s.depends_on {
                    let prereq = steps.iter().find(|p| &p.id == dep).unwrap();
                    assert_eq!(prereq.status, StepStatus::Completed);
                }
            }
            complete(&mut steps, &next);
            unlock_followers(&mut steps, &next);
        }
        assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    }
}
