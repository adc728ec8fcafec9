//! DAG status projection types.
//!
//! These are UI-facing snapshots computed from the workflow engine's run
//! details; they are never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DagTaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl DagTaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One task in the DAG status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagTask {
    pub name: String,
    pub status: DagTaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    /// Parent task names, in shape order.
    pub parents: Vec<String>,
    /// One summary line, traceback scaffolding stripped.
    pub error: Option<String>,
    pub children_total: Option<u32>,
    pub children_completed: Option<u32>,
    pub progress_pct: Option<f64>,
}

/// Payload of a DAG_STATUS event. Later snapshots supersede earlier ones
/// for the same workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagStatusData {
    pub workflow_run_id: String,
    pub tasks: Vec<DagTask>,
}
