//! Engine seam: workflow definitions, task handlers, and the run surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use rf_domain::dag::DagTaskStatus;
use rf_domain::Result;

use crate::dag::ShapeStep;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a task sees while running.
pub struct TaskCtx {
    pub run_id: String,
    /// The workflow's input payload.
    pub input: Value,
    /// Outputs of completed parent tasks, by task name.
    pub parent_outputs: HashMap<String, Value>,
    pub cancel: CancellationToken,
    /// Handle back into the engine for spawning child runs.
    pub spawner: Arc<dyn ChildSpawner>,
    /// Identifies this task for child bookkeeping.
    pub task_name: String,
}

impl TaskCtx {
    /// Start a child workflow attached to this task and wait for it.
    ///
    /// The child's terminal outputs (task name → output) come back as a
    /// JSON object; a failed or cancelled child surfaces as an error.
    pub async fn run_child(&self, workflow: &str, input: Value) -> Result<Value> {
        let child_id = self
            .spawner
            .spawn_child(&self.run_id, &self.task_name, workflow, input)
            .await?;
        self.spawner.wait_child(&child_id).await
    }
}

/// Child-run surface exposed to task handlers.
#[async_trait]
pub trait ChildSpawner: Send + Sync {
    async fn spawn_child(
        &self,
        parent_run_id: &str,
        parent_task: &str,
        workflow: &str,
        input: Value,
    ) -> Result<String>;

    async fn wait_child(&self, child_run_id: &str) -> Result<Value>;
}

/// One unit of work in a workflow DAG.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: TaskCtx) -> Result<Value>;
}

/// Adapter turning an async closure into a [`TaskHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskCtx) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value>> + Send,
{
    async fn run(&self, ctx: TaskCtx) -> Result<Value> {
        (self.0)(ctx).await
    }
}

/// Task declaration: name, parents, execution policy.
#[derive(Clone)]
pub struct TaskDef {
    pub name: String,
    pub parents: Vec<String>,
    pub timeout: Duration,
    pub retries: u32,
    pub handler: Arc<dyn TaskHandler>,
}

impl TaskDef {
    pub fn new(name: &str, parents: &[&str], handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            name: name.to_string(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            timeout: Duration::from_secs(300),
            retries: 3,
            handler,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}

/// A named DAG of tasks. Children are derived from the declared parents.
#[derive(Clone)]
pub struct WorkflowDef {
    pub name: String,
    pub tasks: Vec<TaskDef>,
}

impl WorkflowDef {
    pub fn shape(&self) -> Vec<ShapeStep> {
        self.tasks
            .iter()
            .map(|task| ShapeStep {
                step_id: task.name.clone(),
                task_name: task.name.clone(),
                children_step_ids: self
                    .tasks
                    .iter()
                    .filter(|t| t.parents.contains(&task.name))
                    .map(|t| t.name.clone())
                    .collect(),
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run surface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of one task inside a run.
#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub step_id: String,
    pub status: DagTaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Milliseconds, as reported by the engine.
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub num_spawned_children: Option<u32>,
    pub children_statuses: Vec<DagTaskStatus>,
    pub output: Option<Value>,
}

/// Full run details: shape plus task summaries.
#[derive(Debug, Clone)]
pub struct RunDetails {
    pub run_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub shape: Vec<ShapeStep>,
    pub tasks: Vec<TaskSummary>,
    pub metadata: HashMap<String, String>,
    pub started_at: DateTime<Utc>,
}

/// The workflow engine as the rest of the system sees it.
///
/// Run identifiers issued here are the sole source of truth for run
/// status; callers never persist engine state beyond the id.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start a workflow run and return its id.
    async fn start(
        &self,
        workflow: &str,
        input: Value,
        metadata: HashMap<String, String>,
    ) -> Result<String>;

    async fn run_status(&self, run_id: &str) -> Result<RunStatus>;

    async fn run_details(&self, run_id: &str) -> Result<RunDetails>;

    /// Whether `replay` would do anything useful: the run exists and is
    /// not completed or cancelled.
    async fn can_replay(&self, run_id: &str) -> bool;

    /// Re-run failed and cancelled tasks; completed outputs are kept.
    async fn replay(&self, run_id: &str) -> Result<()>;

    /// Stop pending work. Cancelling an unknown run is a success.
    async fn cancel(&self, run_id: &str) -> Result<()>;

    /// Runs started since `since`, newest first.
    async fn list_recent(&self, since: DateTime<Utc>) -> Result<Vec<(String, RunStatus)>>;

    /// Engine instance name, used in object-store path prefixes.
    fn name(&self) -> &str;
}
