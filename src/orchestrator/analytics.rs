//! Analytics aggregation over the execution history
//!
//! Snapshots are derived on demand and never stored, so computing them any
//! number of times over the same history yields the same result.

use crate::state::execution::Execution;
use crate::state::project::ProjectId;
use crate::state::status::ExecutionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregate run statistics of one project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    /// Project the numbers belong to
    pub project_id: ProjectId,
    /// Number of executions, still-running ones included
    pub total: usize,
    /// Executions that ended `completed`
    pub successful: usize,
    /// Executions that ended `failed`
    pub failed: usize,
    /// Executions that ended `cancelled`
    pub cancelled: usize,
    /// Executions still `running`
    pub running: usize,
    /// Mean duration of executions with a recorded duration (0 when none)
    pub average_duration_ms: f64,
    /// `successful / total * 100` (0 when there are no executions)
    pub success_rate: f64,
    /// Start time of the most recent execution
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Compute the snapshot of one project
pub fn compute(project_id: &str, executions: &[Execution]) -> AnalyticsSnapshot {
    let mut snapshot = AnalyticsSnapshot {
        project_id: project_id.to_string(),
        total: 0,
        successful: 0,
        failed: 0,
        cancelled: 0,
        running: 0,
        average_duration_ms: 0.0,
        success_rate: 0.0,
        last_run_at: None,
    };

    let mut duration_sum: u64 = 0;
    let mut duration_count: u64 = 0;

    for execution in executions.iter().filter(|e| e.project_id == project_id) {
        snapshot.total += 1;
        match execution.status {
            ExecutionStatus::Completed => snapshot.successful += 1,
            ExecutionStatus::Failed => snapshot.failed += 1,
            ExecutionStatus::Cancelled => snapshot.cancelled += 1,
            ExecutionStatus::Running => snapshot.running += 1,
        }
        if let Some(duration) = execution.duration_ms {
            duration_sum = duration_sum.saturating_add(duration);
            duration_count += 1;
        }
        snapshot.last_run_at = snapshot.last_run_at.max(Some(execution.started_at));
    }

    if duration_count > 0 {
        snapshot.average_duration_ms = duration_sum as f64 / duration_count as f64;
    }
    if snapshot.total > 0 {
        snapshot.success_rate = snapshot.successful as f64 / snapshot.total as f64 * 100.0;
    }
    snapshot
}

/// Snapshots of every project present in the history, sorted by project ID
pub fn overview(executions: &[Execution]) -> Vec<AnalyticsSnapshot> {
    let mut by_project: BTreeMap<&str, Vec<Execution>> = BTreeMap::new();
    for execution in executions {
        by_project
            .entry(execution.project_id.as_str())
            .or_default()
            .push(execution.clone());
    }

    by_project
        .into_iter()
        .map(|(project_id, history)| compute(project_id, &history))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::execution::TriggerSource;
    use chrono::Duration;

    fn finished(project: &str, status: ExecutionStatus, duration_ms: i64) -> Execution {
        let mut execution = Execution::start(project, TriggerSource::Manual);
        let end = execution.started_at + Duration::milliseconds(duration_ms);
        execution.finish(status, end, None).unwrap();
        execution
    }

    #[test]
    fn test_empty_history() {
        let snapshot = compute("p1", &[]);
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.average_duration_ms, 0.0);
        assert!(snapshot.last_run_at.is_none());
    }

    #[test]
    fn test_rates_and_average() {
        let history = vec![
            finished("p1", ExecutionStatus::Completed, 100),
            finished("p1", ExecutionStatus::Completed, 300),
            finished("p1", ExecutionStatus::Failed, 200),
            finished("p1", ExecutionStatus::Cancelled, 400),
            finished("p2", ExecutionStatus::Failed, 9_000),
        ];

        let snapshot = compute("p1", &history);
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.successful, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(snapshot.success_rate, 50.0);
        assert_eq!(snapshot.average_duration_ms, 250.0);
    }

    #[test]
    fn test_running_counts_toward_total_only() {
        let history = vec![
            finished("p1", ExecutionStatus::Completed, 100),
            Execution::start("p1", TriggerSource::Manual),
        ];
        let snapshot = compute("p1", &history);
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.running, 1);
        assert_eq!(snapshot.success_rate, 50.0);
        assert_eq!(snapshot.average_duration_ms, 100.0);
    }

    #[test]
    fn test_idempotent() {
        let history = vec![
            finished("p1", ExecutionStatus::Completed, 120),
            finished("p1", ExecutionStatus::Failed, 80),
        ];
        assert_eq!(compute("p1", &history), compute("p1", &history));
    }

    #[test]
    fn test_overview_sorted_by_project() {
        let history = vec![
            finished("zeta", ExecutionStatus::Completed, 10),
            finished("alpha", ExecutionStatus::Failed, 10),
            finished("zeta", ExecutionStatus::Completed, 30),
        ];
        let all = overview(&history);
        let ids: Vec<&str> = all.iter().map(|s| s.project_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert_eq!(all[1].total, 2);
        assert_eq!(all[1].average_duration_ms, 20.0);
    }
}
