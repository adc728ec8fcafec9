//! In-process workflow engine.
//!
//! Runs execute on the tokio runtime: independent tasks in parallel, each
//! with its own timeout and transient-retry policy. Run state lives under
//! a lock and is queryable at any time; a transition hook fires on every
//! task state change so the broadcaster can publish DAG snapshots.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use rf_domain::dag::DagTaskStatus;
use rf_domain::{Backoff, Error, Result};

use crate::engine::{
    ChildSpawner, RunDetails, RunStatus, TaskCtx, TaskDef, TaskSummary, WorkflowDef,
    WorkflowEngine,
};

/// Called with fresh run details after every task-level transition.
pub type TransitionHook = Arc<dyn Fn(RunDetails) + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
struct TaskState {
    status: Option<DagTaskStatus>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
    retry_count: u32,
    children: Vec<String>,
    output: Option<Value>,
}

impl TaskState {
    fn status(&self) -> DagTaskStatus {
        self.status.unwrap_or(DagTaskStatus::Queued)
    }
}

struct RunState {
    id: String,
    workflow: String,
    input: Value,
    metadata: HashMap<String, String>,
    started_at: DateTime<Utc>,
    tasks: Mutex<HashMap<String, TaskState>>,
    status: watch::Sender<RunStatus>,
    cancel: Mutex<CancellationToken>,
}

impl RunState {
    fn current_status(&self) -> RunStatus {
        *self.status.borrow()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct InProcessEngine {
    name: String,
    workflows: RwLock<HashMap<String, WorkflowDef>>,
    runs: RwLock<HashMap<String, Arc<RunState>>>,
    hook: RwLock<Option<TransitionHook>>,
    /// child run id → parent run id, for fan-out counter refreshes.
    parent_of: RwLock<HashMap<String, String>>,
    weak_self: RwLock<Weak<InProcessEngine>>,
}

impl InProcessEngine {
    pub fn new(name: &str) -> Arc<Self> {
        let engine = Arc::new(Self {
            name: name.to_string(),
            workflows: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            hook: RwLock::new(None),
            parent_of: RwLock::new(HashMap::new()),
            weak_self: RwLock::new(Weak::new()),
        });
        *engine.weak_self.write() = Arc::downgrade(&engine);
        engine
    }

    pub fn register(&self, workflow: WorkflowDef) {
        tracing::info!(workflow = %workflow.name, tasks = workflow.tasks.len(), "workflow registered");
        self.workflows.write().insert(workflow.name.clone(), workflow);
    }

    /// Install the transition hook. One hook, installed at bootstrap.
    pub fn set_transition_hook(&self, hook: TransitionHook) {
        *self.hook.write() = Some(hook);
    }

    fn strong_self(&self) -> Arc<Self> {
        self.weak_self
            .read()
            .upgrade()
            .expect("engine accessed after drop")
    }

    fn run(&self, run_id: &str) -> Result<Arc<RunState>> {
        self.runs
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("workflow run {run_id}")))
    }

    fn fire_hook(&self, run: &Arc<RunState>) {
        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            if let Ok(details) = self.details_of(run) {
                hook(details);
            }
        }

        // A child transition also refreshes the parent's fan-out counters.
        let parent_id = self.parent_of.read().get(&run.id).cloned();
        if let Some(parent_id) = parent_id {
            if let Ok(parent) = self.run(&parent_id) {
                let hook = self.hook.read().clone();
                if let Some(hook) = hook {
                    if let Ok(details) = self.details_of(&parent) {
                        hook(details);
                    }
                }
            }
        }
    }

    fn details_of(&self, run: &Arc<RunState>) -> Result<RunDetails> {
        let def = self
            .workflows
            .read()
            .get(&run.workflow)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("workflow {}", run.workflow)))?;

        let runs = self.runs.read();
        let tasks = run.tasks.lock();
        let now = Utc::now();

        let summaries = def
            .tasks
            .iter()
            .map(|task_def| {
                let state = tasks.get(&task_def.name).cloned().unwrap_or_default();
                let children_statuses: Vec<DagTaskStatus> = state
                    .children
                    .iter()
                    .filter_map(|child_id| runs.get(child_id))
                    .map(|child| match child.current_status() {
                        RunStatus::Queued => DagTaskStatus::Queued,
                        RunStatus::Running => DagTaskStatus::Running,
                        RunStatus::Completed => DagTaskStatus::Completed,
                        RunStatus::Failed => DagTaskStatus::Failed,
                        RunStatus::Cancelled => DagTaskStatus::Cancelled,
                    })
                    .collect();

                let duration_ms = match (state.started_at, state.finished_at) {
                    (Some(start), Some(end)) => {
                        Some((end - start).num_milliseconds().max(0) as u64)
                    }
                    (Some(start), None) if state.status() == DagTaskStatus::Running => {
                        Some((now - start).num_milliseconds().max(0) as u64)
                    }
                    _ => None,
                };

                TaskSummary {
                    step_id: task_def.name.clone(),
                    status: state.status(),
                    started_at: state.started_at,
                    finished_at: state.finished_at,
                    duration_ms,
                    error_message: state.error.clone(),
                    retry_count: state.retry_count,
                    num_spawned_children: if state.children.is_empty() {
                        None
                    } else {
                        Some(state.children.len() as u32)
                    },
                    children_statuses,
                    output: state.output.clone(),
                }
            })
            .collect();

        Ok(RunDetails {
            run_id: run.id.clone(),
            workflow_name: run.workflow.clone(),
            status: run.current_status(),
            shape: def.shape(),
            tasks: summaries,
            metadata: run.metadata.clone(),
            started_at: run.started_at,
        })
    }

    fn spawn_execute(&self, run: Arc<RunState>) {
        let engine = self.strong_self();
        tokio::spawn(async move {
            engine.execute(run).await;
        });
    }

    // ── Execution ──────────────────────────────────────────────────

    async fn execute(self: Arc<Self>, run: Arc<RunState>) {
        let Some(def) = self.workflows.read().get(&run.workflow).cloned() else {
            run.status.send_replace(RunStatus::Failed);
            return;
        };

        run.status.send_replace(RunStatus::Running);
        self.fire_hook(&run);

        let cancel = run.cancel.lock().clone();
        let mut joinset: JoinSet<(String, Result<Value>)> = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                joinset.abort_all();
                self.finish_cancelled(&run);
                return;
            }

            // Launch every task whose parents have completed.
            let ready: Vec<TaskDef> = {
                let tasks = run.tasks.lock();
                def.tasks
                    .iter()
                    .filter(|t| {
                        tasks
                            .get(&t.name)
                            .map(|s| s.status() == DagTaskStatus::Queued)
                            .unwrap_or(false)
                            && t.parents.iter().all(|p| {
                                tasks
                                    .get(p)
                                    .map(|s| s.status() == DagTaskStatus::Completed)
                                    .unwrap_or(false)
                            })
                    })
                    .cloned()
                    .collect()
            };

            for task in ready {
                {
                    let mut tasks = run.tasks.lock();
                    let state = tasks.entry(task.name.clone()).or_default();
                    state.status = Some(DagTaskStatus::Running);
                    state.started_at = Some(Utc::now());
                }
                self.fire_hook(&run);

                let engine = self.clone();
                let run_for_task = run.clone();
                let cancel_for_task = cancel.clone();
                joinset.spawn(async move {
                    let result = engine
                        .run_task_with_retries(&run_for_task, &task, cancel_for_task)
                        .await;
                    (task.name.clone(), result)
                });
            }

            if joinset.is_empty() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    joinset.abort_all();
                    self.finish_cancelled(&run);
                    return;
                }
                joined = joinset.join_next() => {
                    let Some(joined) = joined else { break };
                    let (name, result) = match joined {
                        Ok(pair) => pair,
                        Err(join_err) => {
                            tracing::error!(error = %join_err, "task join failed");
                            continue;
                        }
                    };

                    match result {
                        Ok(output) => {
                            let mut tasks = run.tasks.lock();
                            let state = tasks.entry(name.clone()).or_default();
                            state.status = Some(DagTaskStatus::Completed);
                            state.finished_at = Some(Utc::now());
                            state.output = Some(output);
                            drop(tasks);
                            self.fire_hook(&run);
                        }
                        Err(e) => {
                            tracing::error!(run_id = %run.id, task = %name, error = %e, "task failed");
                            {
                                let mut tasks = run.tasks.lock();
                                let state = tasks.entry(name.clone()).or_default();
                                state.status = Some(DagTaskStatus::Failed);
                                state.finished_at = Some(Utc::now());
                                state.error = Some(e.to_string());
                            }
                            self.fire_hook(&run);

                            // A failed task fails the run: cancel pending work,
                            // leave completed tasks intact.
                            joinset.abort_all();
                            self.mark_unfinished_cancelled(&run, Some(&name));
                            run.status.send_replace(RunStatus::Failed);
                            self.fire_hook(&run);
                            return;
                        }
                    }
                }
            }
        }

        let all_completed = {
            let tasks = run.tasks.lock();
            def.tasks.iter().all(|t| {
                tasks
                    .get(&t.name)
                    .map(|s| s.status() == DagTaskStatus::Completed)
                    .unwrap_or(false)
            })
        };
        run.status.send_replace(if all_completed {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        });
        self.fire_hook(&run);
    }

    async fn run_task_with_retries(
        self: &Arc<Self>,
        run: &Arc<RunState>,
        task: &TaskDef,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let backoff = Backoff {
            max_attempts: task.retries.max(1),
            ..Backoff::default()
        };

        let mut attempt: u32 = 0;
        loop {
            let parent_outputs: HashMap<String, Value> = {
                let tasks = run.tasks.lock();
                task.parents
                    .iter()
                    .filter_map(|p| {
                        tasks
                            .get(p)
                            .and_then(|s| s.output.clone())
                            .map(|o| (p.clone(), o))
                    })
                    .collect()
            };

            let ctx = TaskCtx {
                run_id: run.id.clone(),
                input: run.input.clone(),
                parent_outputs,
                cancel: cancel.clone(),
                spawner: self.clone(),
                task_name: task.name.clone(),
            };

            let outcome = match tokio::time::timeout(task.timeout, task.handler.run(ctx)).await
            {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "task {} exceeded {:?}",
                    task.name, task.timeout
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && !backoff.is_exhausted(attempt) => {
                    {
                        let mut tasks = run.tasks.lock();
                        tasks.entry(task.name.clone()).or_default().retry_count = attempt + 1;
                    }
                    let delay = backoff.delay_for_attempt(attempt);
                    tracing::warn!(
                        task = %task.name,
                        attempt = attempt + 1,
                        error = %e,
                        "task attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn mark_unfinished_cancelled(&self, run: &Arc<RunState>, except: Option<&str>) {
        let def = self.workflows.read().get(&run.workflow).cloned();
        let Some(def) = def else { return };
        let mut tasks = run.tasks.lock();
        for task_def in &def.tasks {
            if Some(task_def.name.as_str()) == except {
                continue;
            }
            let state = tasks.entry(task_def.name.clone()).or_default();
            if !state.status().is_terminal() {
                state.status = Some(DagTaskStatus::Cancelled);
                state.finished_at = Some(Utc::now());
            }
        }
    }

    fn finish_cancelled(&self, run: &Arc<RunState>) {
        self.mark_unfinished_cancelled(run, None);
        run.status.send_replace(RunStatus::Cancelled);
        self.fire_hook(run);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Child runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl ChildSpawner for InProcessEngine {
    async fn spawn_child(
        &self,
        parent_run_id: &str,
        parent_task: &str,
        workflow: &str,
        input: Value,
    ) -> Result<String> {
        let child_id = self
            .start(workflow, input, HashMap::new())
            .await?;
        self.parent_of
            .write()
            .insert(child_id.clone(), parent_run_id.to_string());

        let parent = self.run(parent_run_id)?;
        parent
            .tasks
            .lock()
            .entry(parent_task.to_string())
            .or_default()
            .children
            .push(child_id.clone());
        self.fire_hook(&parent);

        Ok(child_id)
    }

    async fn wait_child(&self, child_run_id: &str) -> Result<Value> {
        let child = self.run(child_run_id)?;
        let mut rx = child.status.subscribe();

        loop {
            let status = *rx.borrow();
            if status.is_terminal() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }

        match child.current_status() {
            RunStatus::Completed => {
                let tasks = child.tasks.lock();
                let outputs: serde_json::Map<String, Value> = tasks
                    .iter()
                    .filter_map(|(name, state)| {
                        state.output.clone().map(|o| (name.clone(), o))
                    })
                    .collect();
                Ok(Value::Object(outputs))
            }
            RunStatus::Failed => {
                let tasks = child.tasks.lock();
                let first_error = tasks
                    .values()
                    .find_map(|s| s.error.clone())
                    .unwrap_or_else(|| "child workflow failed".into());
                Err(Error::Other(first_error))
            }
            other => Err(Error::Other(format!(
                "child workflow ended as {other:?}"
            ))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl WorkflowEngine for InProcessEngine {
    async fn start(
        &self,
        workflow: &str,
        input: Value,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        let def = self
            .workflows
            .read()
            .get(workflow)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("workflow {workflow}")))?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let (status_tx, _) = watch::channel(RunStatus::Queued);
        let tasks = def
            .tasks
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    TaskState {
                        status: Some(DagTaskStatus::Queued),
                        ..Default::default()
                    },
                )
            })
            .collect();

        let run = Arc::new(RunState {
            id: run_id.clone(),
            workflow: workflow.to_string(),
            input,
            metadata,
            started_at: Utc::now(),
            tasks: Mutex::new(tasks),
            status: status_tx,
            cancel: Mutex::new(CancellationToken::new()),
        });

        self.runs.write().insert(run_id.clone(), run.clone());
        tracing::info!(run_id = %run_id, workflow = %workflow, "workflow run started");
        self.spawn_execute(run);

        Ok(run_id)
    }

    async fn run_status(&self, run_id: &str) -> Result<RunStatus> {
        Ok(self.run(run_id)?.current_status())
    }

    async fn run_details(&self, run_id: &str) -> Result<RunDetails> {
        let run = self.run(run_id)?;
        self.details_of(&run)
    }

    async fn can_replay(&self, run_id: &str) -> bool {
        match self.run(run_id) {
            Ok(run) => !matches!(
                run.current_status(),
                RunStatus::Completed | RunStatus::Cancelled
            ),
            Err(_) => false,
        }
    }

    async fn replay(&self, run_id: &str) -> Result<()> {
        let run = self.run(run_id)?;
        match run.current_status() {
            RunStatus::Queued | RunStatus::Running => Ok(()),
            RunStatus::Failed => {
                {
                    let mut tasks = run.tasks.lock();
                    for state in tasks.values_mut() {
                        if state.status() != DagTaskStatus::Completed {
                            *state = TaskState {
                                status: Some(DagTaskStatus::Queued),
                                ..Default::default()
                            };
                        }
                    }
                }
                *run.cancel.lock() = CancellationToken::new();
                tracing::info!(run_id = %run_id, "replaying failed run");
                self.spawn_execute(run);
                Ok(())
            }
            status => Err(Error::Validation(format!(
                "run {run_id} is {status:?} and cannot be replayed"
            ))),
        }
    }

    async fn cancel(&self, run_id: &str) -> Result<()> {
        // Cancelling an unknown workflow is a success.
        let Ok(run) = self.run(run_id) else {
            return Ok(());
        };
        if run.current_status().is_terminal() {
            return Ok(());
        }
        tracing::info!(run_id = %run_id, "cancelling workflow run");
        run.cancel.lock().cancel();
        Ok(())
    }

    async fn list_recent(&self, since: DateTime<Utc>) -> Result<Vec<(String, RunStatus)>> {
        let runs = self.runs.read();
        let mut recent: Vec<(DateTime<Utc>, String, RunStatus)> = runs
            .values()
            .filter(|r| r.started_at >= since)
            .map(|r| (r.started_at, r.id.clone(), r.current_status()))
            .collect();
        recent.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(recent.into_iter().map(|(_, id, status)| (id, status)).collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FnHandler;
    use std::time::Duration;

    fn engine() -> Arc<InProcessEngine> {
        InProcessEngine::new("inproc")
    }

    async fn wait_terminal(engine: &InProcessEngine, run_id: &str) -> RunStatus {
        for _ in 0..500 {
            let status = engine.run_status(run_id).await.unwrap();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run {run_id} never reached a terminal status");
    }

    fn two_step_workflow() -> WorkflowDef {
        WorkflowDef {
            name: "two_step".into(),
            tasks: vec![
                TaskDef::new(
                    "first",
                    &[],
                    Arc::new(FnHandler(|_ctx: TaskCtx| async {
                        Ok(serde_json::json!({"value": 1}))
                    })),
                ),
                TaskDef::new(
                    "second",
                    &["first"],
                    Arc::new(FnHandler(|ctx: TaskCtx| async move {
                        let upstream = ctx.parent_outputs["first"]["value"].as_i64().unwrap();
                        Ok(serde_json::json!({"value": upstream + 1}))
                    })),
                ),
            ],
        }
    }

    #[tokio::test]
    async fn linear_workflow_passes_outputs_downstream() {
        let engine = engine();
        engine.register(two_step_workflow());

        let run_id = engine
            .start("two_step", serde_json::json!({}), HashMap::new())
            .await
            .unwrap();
        assert_eq!(wait_terminal(&engine, &run_id).await, RunStatus::Completed);

        let details = engine.run_details(&run_id).await.unwrap();
        let second = details.tasks.iter().find(|t| t.step_id == "second").unwrap();
        assert_eq!(second.status, DagTaskStatus::Completed);
        assert_eq!(second.output.as_ref().unwrap()["value"], 2);
        assert!(second.duration_ms.is_some());
    }

    #[tokio::test]
    async fn failing_task_fails_run_and_cancels_downstream() {
        let engine = engine();
        engine.register(WorkflowDef {
            name: "doomed".into(),
            tasks: vec![
                TaskDef::new(
                    "boom",
                    &[],
                    Arc::new(FnHandler(|_ctx: TaskCtx| async {
                        Err(Error::Protocol("no decodable frames".into()))
                    })),
                )
                .with_retries(1),
                TaskDef::new(
                    "never",
                    &["boom"],
                    Arc::new(FnHandler(|_ctx: TaskCtx| async {
                        Ok(Value::Null)
                    })),
                ),
            ],
        });

        let run_id = engine
            .start("doomed", serde_json::json!({}), HashMap::new())
            .await
            .unwrap();
        assert_eq!(wait_terminal(&engine, &run_id).await, RunStatus::Failed);

        let details = engine.run_details(&run_id).await.unwrap();
        let boom = details.tasks.iter().find(|t| t.step_id == "boom").unwrap();
        let never = details.tasks.iter().find(|t| t.step_id == "never").unwrap();
        assert_eq!(boom.status, DagTaskStatus::Failed);
        assert!(boom.error_message.as_ref().unwrap().contains("no decodable"));
        assert_eq!(never.status, DagTaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let attempts_for_task = attempts.clone();

        let engine = engine();
        engine.register(WorkflowDef {
            name: "flaky".into(),
            tasks: vec![TaskDef::new(
                "wobbly",
                &[],
                Arc::new(FnHandler(move |_ctx: TaskCtx| {
                    let attempts = attempts_for_task.clone();
                    async move {
                        if attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2 {
                            Err(Error::Http("HTTP 503 - unavailable".into()))
                        } else {
                            Ok(Value::Null)
                        }
                    }
                })),
            )],
        });

        let run_id = engine
            .start("flaky", serde_json::json!({}), HashMap::new())
            .await
            .unwrap();
        assert_eq!(wait_terminal(&engine, &run_id).await, RunStatus::Completed);
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancel_stops_pending_work() {
        let engine = engine();
        engine.register(WorkflowDef {
            name: "slow".into(),
            tasks: vec![
                TaskDef::new(
                    "sleepy",
                    &[],
                    Arc::new(FnHandler(|_ctx: TaskCtx| async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(Value::Null)
                    })),
                ),
                TaskDef::new(
                    "after",
                    &["sleepy"],
                    Arc::new(FnHandler(|_ctx: TaskCtx| async { Ok(Value::Null) })),
                ),
            ],
        });

        let run_id = engine
            .start("slow", serde_json::json!({}), HashMap::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        engine.cancel(&run_id).await.unwrap();

        assert_eq!(wait_terminal(&engine, &run_id).await, RunStatus::Cancelled);
        let details = engine.run_details(&run_id).await.unwrap();
        assert!(details
            .tasks
            .iter()
            .all(|t| t.status == DagTaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn cancel_unknown_run_is_a_success() {
        let engine = engine();
        assert!(engine.cancel("no-such-run").await.is_ok());
    }

    #[tokio::test]
    async fn replay_reruns_only_failed_tasks() {
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let first_runs = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let flag_for_task = flag.clone();
        let first_runs_for_task = first_runs.clone();

        let engine = engine();
        engine.register(WorkflowDef {
            name: "replayable".into(),
            tasks: vec![
                TaskDef::new(
                    "stable",
                    &[],
                    Arc::new(FnHandler(move |_ctx: TaskCtx| {
                        let first_runs = first_runs_for_task.clone();
                        async move {
                            first_runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            Ok(serde_json::json!({"ok": true}))
                        }
                    })),
                ),
                TaskDef::new(
                    "fragile",
                    &["stable"],
                    Arc::new(FnHandler(move |_ctx: TaskCtx| {
                        let flag = flag_for_task.clone();
                        async move {
                            if flag.swap(false, std::sync::atomic::Ordering::SeqCst) {
                                Err(Error::Validation("first pass fails".into()))
                            } else {
                                Ok(Value::Null)
                            }
                        }
                    })),
                )
                .with_retries(1),
            ],
        });

        let run_id = engine
            .start("replayable", serde_json::json!({}), HashMap::new())
            .await
            .unwrap();
        assert_eq!(wait_terminal(&engine, &run_id).await, RunStatus::Failed);
        assert!(engine.can_replay(&run_id).await);

        engine.replay(&run_id).await.unwrap();
        assert_eq!(wait_terminal(&engine, &run_id).await, RunStatus::Completed);

        // Completed task kept its output; it did not run twice.
        assert_eq!(first_runs.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!engine.can_replay(&run_id).await);
    }

    #[tokio::test]
    async fn child_runs_roll_up_into_parent_counters() {
        let engine = engine();
        engine.register(WorkflowDef {
            name: "leaf".into(),
            tasks: vec![TaskDef::new(
                "work",
                &[],
                Arc::new(FnHandler(|ctx: TaskCtx| async move {
                    Ok(serde_json::json!({"index": ctx.input["index"]}))
                })),
            )],
        });
        engine.register(WorkflowDef {
            name: "parent".into(),
            tasks: vec![TaskDef::new(
                "fan_out",
                &[],
                Arc::new(FnHandler(|ctx: TaskCtx| async move {
                    let mut outputs = Vec::new();
                    for index in 0..3 {
                        let child = ctx
                            .run_child("leaf", serde_json::json!({"index": index}))
                            .await?;
                        outputs.push(child["work"]["index"].clone());
                    }
                    Ok(Value::Array(outputs))
                })),
            )],
        });

        let run_id = engine
            .start("parent", serde_json::json!({}), HashMap::new())
            .await
            .unwrap();
        assert_eq!(wait_terminal(&engine, &run_id).await, RunStatus::Completed);

        let details = engine.run_details(&run_id).await.unwrap();
        let fan_out = details.tasks.iter().find(|t| t.step_id == "fan_out").unwrap();
        assert_eq!(fan_out.num_spawned_children, Some(3));
        assert_eq!(
            fan_out
                .children_statuses
                .iter()
                .filter(|s| **s == DagTaskStatus::Completed)
                .count(),
            3
        );
        assert_eq!(fan_out.output.as_ref().unwrap()[2], 2);
    }
}
