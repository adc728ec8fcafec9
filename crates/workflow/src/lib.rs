//! Workflow engine adapter.
//!
//! A DAG of named tasks runs behind the [`WorkflowEngine`] seam: start by
//! external key, query status and details, replay, cancel. The in-process
//! engine executes tasks on the tokio runtime with per-task timeout and
//! retry; the engine's identifiers are the sole source of truth for run
//! status. [`projection`] turns run details into the UI-facing DagTask
//! snapshot, and [`dispatch`] implements the validate → prepare → dispatch
//! protocol in front of it.

pub mod dag;
pub mod dispatch;
pub mod engine;
pub mod inproc;
pub mod projection;

pub use dag::{topo_sort, ShapeStep};
pub use dispatch::{
    Dispatcher, DispatchResult, MultitrackConfig, ProcessingConfig, ValidationOk,
    ValidationResult,
};
pub use engine::{
    ChildSpawner, FnHandler, RunDetails, RunStatus, TaskCtx, TaskDef, TaskHandler, TaskSummary,
    WorkflowDef, WorkflowEngine,
};
pub use inproc::InProcessEngine;
pub use projection::{extract_dag_tasks, summarize_error};
