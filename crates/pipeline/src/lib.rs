//! The meeting-to-transcript pipelines and their reconcilers.
//!
//! This crate wires the component crates into the two workflow
//! definitions (multitrack diarization and single-file), the recording
//! reconciliation layer, the presence reconciler, and the consent /
//! retention cleanup paths.

pub mod assemble;
pub mod cleanup;
pub mod diarization;
pub mod file;
pub mod presence;
pub mod reconcile;
pub mod stages;
pub mod summary;
pub mod topics;
pub mod webvtt;

use std::sync::Arc;

use rf_audio::AudioMux;
use rf_broadcast::EventBroadcaster;
use rf_domain::transcript::{StageProgress, TranscriptStatus};
use rf_inference::{Diarizer, SpeechToText};
use rf_llm::Coordinator;
use rf_storage::Storage;
use rf_store::Stores;
use rf_workflow::{InProcessEngine, RunDetails, RunStatus};

/// Shared dependencies injected into every pipeline task.
#[derive(Clone)]
pub struct PipelineDeps {
    pub stores: Stores,
    pub storage: Arc<dyn Storage>,
    pub audio: Arc<dyn AudioMux>,
    pub broadcaster: EventBroadcaster,
    pub stt: Arc<dyn SpeechToText>,
    /// Absent when diarization is disabled; assembly then keeps the
    /// track-index speakers.
    pub diarizer: Option<Arc<dyn Diarizer>>,
    pub llm: Arc<Coordinator>,
    /// Engine instance name, part of the padded-track object prefix.
    pub engine_name: String,
    pub language: String,
}

/// Register every workflow this crate defines.
pub fn register_pipelines(engine: &InProcessEngine, deps: &PipelineDeps) {
    engine.register(diarization::track_processing_workflow(deps.clone()));
    engine.register(diarization::diarization_pipeline(deps.clone()));
    engine.register(file::file_pipeline(deps.clone()));
}

/// React to a workflow transition: publish the DAG snapshot, and on a
/// terminal failure move the transcript to error and run consent cleanup.
pub async fn handle_run_transition(deps: &PipelineDeps, details: RunDetails) {
    let Some(transcript_id) = details.metadata.get("transcript_id").cloned() else {
        return;
    };

    let snapshot = rf_workflow::projection::dag_status_data(&details);
    deps.broadcaster
        .publish_dag_status(&transcript_id, &snapshot)
        .await;

    if details.status == RunStatus::Failed {
        if let Err(e) = deps
            .broadcaster
            .set_status(&transcript_id, TranscriptStatus::Error)
            .await
        {
            tracing::warn!(transcript_id = %transcript_id, error = %e, "failed to mark error status");
        }
        // Consent cleanup runs regardless of how the pipeline ended.
        if let Err(e) = cleanup::cleanup_consent(deps, &transcript_id).await {
            tracing::warn!(transcript_id = %transcript_id, error = %e, "consent cleanup failed");
        }
    }
}

/// Run a stage body bracketed by progress events.
pub(crate) async fn with_progress<T, Fut>(
    broadcaster: &EventBroadcaster,
    transcript_id: &str,
    stage: &str,
    run_id: &str,
    body: Fut,
) -> rf_domain::Result<T>
where
    Fut: std::future::Future<Output = rf_domain::Result<T>>,
{
    let _ = broadcaster
        .emit_progress(transcript_id, stage, StageProgress::InProgress, run_id)
        .await;
    match body.await {
        Ok(value) => {
            let _ = broadcaster
                .emit_progress(transcript_id, stage, StageProgress::Completed, run_id)
                .await;
            Ok(value)
        }
        Err(e) => {
            tracing::error!(transcript_id = %transcript_id, stage = %stage, error = %e, "stage failed");
            let _ = broadcaster
                .emit_progress(transcript_id, stage, StageProgress::Failed, run_id)
                .await;
            Err(e)
        }
    }
}
