//! Run details → DagTask snapshot for UI consumption.

use rf_domain::dag::{DagStatusData, DagTask};

use crate::dag::{parents_by_step, topo_sort};
use crate::engine::RunDetails;

/// One summary line from a possibly multi-line error message.
///
/// Picks the first non-empty line that is not traceback scaffolding; when
/// every line is scaffolding, the raw first line stands in.
pub fn summarize_error(message: &str) -> Option<String> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut lines = trimmed.lines();
    let first = lines.next().unwrap_or_default().trim().to_string();

    for line in trimmed.lines() {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }
        let scaffolding = stripped.starts_with("Traceback")
            || stripped.starts_with("File ")
            || stripped.starts_with('{')
            || stripped.starts_with(')');
        if !scaffolding {
            return Some(stripped.to_string());
        }
    }

    Some(first)
}

/// Project run details into the ordered DagTask list.
///
/// Order comes from Kahn's algorithm over the shape with sorted step ids,
/// so the same engine state always yields the same task order.
pub fn extract_dag_tasks(details: &RunDetails) -> Vec<DagTask> {
    if details.shape.is_empty() {
        return Vec::new();
    }

    let parents = parents_by_step(&details.shape);
    let name_by_step: std::collections::HashMap<&str, &str> = details
        .shape
        .iter()
        .map(|s| (s.step_id.as_str(), s.task_name.as_str()))
        .collect();
    let task_by_step: std::collections::HashMap<&str, &crate::engine::TaskSummary> = details
        .tasks
        .iter()
        .filter(|t| name_by_step.contains_key(t.step_id.as_str()))
        .map(|t| (t.step_id.as_str(), t))
        .collect();

    topo_sort(&details.shape)
        .into_iter()
        .map(|step_id| {
            let name = name_by_step[step_id.as_str()].to_string();
            let step_parents = parents.get(&step_id).cloned().unwrap_or_default();

            let Some(task) = task_by_step.get(step_id.as_str()) else {
                // Shape node with no task data yet: queued, nothing else.
                return DagTask {
                    name,
                    status: rf_domain::dag::DagTaskStatus::Queued,
                    started_at: None,
                    finished_at: None,
                    duration_seconds: None,
                    parents: step_parents,
                    error: None,
                    children_total: None,
                    children_completed: None,
                    progress_pct: None,
                };
            };

            let (children_total, children_completed, progress_pct) =
                match task.num_spawned_children {
                    Some(total) if total > 0 => {
                        let completed = task
                            .children_statuses
                            .iter()
                            .filter(|s| **s == rf_domain::dag::DagTaskStatus::Completed)
                            .count() as u32;
                        let pct = (completed as f64 / total as f64) * 100.0;
                        (Some(total), Some(completed), Some(pct))
                    }
                    _ => (None, None, None),
                };

            DagTask {
                name,
                status: task.status,
                started_at: task.started_at,
                finished_at: task.finished_at,
                duration_seconds: task.duration_ms.map(|ms| ms as f64 / 1000.0),
                parents: step_parents,
                error: task.error_message.as_deref().and_then(summarize_error),
                children_total,
                children_completed,
                progress_pct,
            }
        })
        .collect()
}

/// The DAG_STATUS payload for a run.
pub fn dag_status_data(details: &RunDetails) -> DagStatusData {
    DagStatusData {
        workflow_run_id: details.run_id.clone(),
        tasks: extract_dag_tasks(details),
    }
}
