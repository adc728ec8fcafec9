//! The validate → prepare → dispatch protocol.
//!
//! Everything the HTTP surface or a poller needs to get a transcript
//! processed goes through these three steps; the result enums replace
//! exceptions at the component boundary.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use rf_domain::{Error, Result};
use rf_store::{RecordingStore, Transcript, TranscriptStore};

use crate::engine::{RunStatus, WorkflowEngine};

/// Workflow name of the multitrack pipeline.
pub const DIARIZATION_PIPELINE: &str = "DiarizationPipeline";
/// Workflow name of the single-file pipeline.
pub const FILE_PIPELINE: &str = "FileTranscriptionPipeline";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ValidationOk {
    pub transcript_id: String,
    pub recording_id: Option<String>,
    pub room_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ValidationResult {
    Ok(ValidationOk),
    Locked(String),
    NotReady(String),
    AlreadyScheduled(String),
}

#[derive(Debug, Clone)]
pub struct MultitrackConfig {
    pub transcript_id: String,
    pub bucket_name: String,
    pub track_keys: Vec<String>,
    pub recording_id: Option<String>,
    pub room_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ProcessingConfig {
    /// Single uploaded file.
    File { transcript_id: String },
    /// Per-speaker raw tracks.
    Multitrack(MultitrackConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Ok,
    AlreadyRunning,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<dyn WorkflowEngine>,
    transcripts: Arc<TranscriptStore>,
    recordings: Arc<RecordingStore>,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        transcripts: Arc<TranscriptStore>,
        recordings: Arc<RecordingStore>,
    ) -> Self {
        Self {
            engine,
            transcripts,
            recordings,
        }
    }

    /// Check whether the transcript may be (re)processed right now.
    ///
    /// A failed engine lookup for the recorded run counts as "allowed":
    /// the run may have been deleted from the engine while its id is still
    /// on the row.
    pub async fn validate(&self, transcript: &Transcript) -> ValidationResult {
        if transcript.locked {
            return ValidationResult::Locked("recording is locked".into());
        }

        if transcript.status == rf_domain::transcript::TranscriptStatus::Idle
            && transcript.workflow_run_id.is_none()
        {
            return ValidationResult::NotReady("recording is not ready for processing".into());
        }

        if let Some(run_id) = &transcript.workflow_run_id {
            match self.engine.run_status(run_id).await {
                Ok(RunStatus::Running) | Ok(RunStatus::Queued) => {
                    return ValidationResult::AlreadyScheduled(
                        "workflow already running".into(),
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(run_id = %run_id, error = %e, "engine lookup failed, allowing");
                }
            }
        }

        ValidationResult::Ok(ValidationOk {
            transcript_id: transcript.id.clone(),
            recording_id: transcript.recording_id.clone(),
            room_id: transcript.room_id.clone(),
        })
    }

    /// Pick the processing mode from the recording row.
    ///
    /// Non-empty track keys select multitrack; an empty-but-present list
    /// is invalid, and tracks always need a bucket.
    pub async fn prepare(&self, validation: &ValidationOk) -> Result<ProcessingConfig> {
        let mut bucket_name: Option<String> = None;
        let mut track_keys: Option<Vec<String>> = None;

        if let Some(recording_id) = &validation.recording_id {
            if let Some(recording) = self.recordings.get(recording_id) {
                bucket_name = Some(recording.bucket_name.clone());
                track_keys = recording.track_keys.clone();

                if let Some(keys) = &track_keys {
                    if keys.is_empty() {
                        return Err(Error::Validation(
                            "no track keys found, must be either > 0 or none".into(),
                        ));
                    }
                    if bucket_name.as_deref().unwrap_or("").is_empty() {
                        return Err(Error::Validation("bucket name must be specified".into()));
                    }
                }
            }
        }

        match track_keys {
            Some(keys) => Ok(ProcessingConfig::Multitrack(MultitrackConfig {
                transcript_id: validation.transcript_id.clone(),
                bucket_name: bucket_name.unwrap_or_default(),
                track_keys: keys,
                recording_id: validation.recording_id.clone(),
                room_id: validation.room_id.clone(),
            })),
            None => Ok(ProcessingConfig::File {
                transcript_id: validation.transcript_id.clone(),
            }),
        }
    }

    /// Start, replay, or skip a workflow run for the prepared config.
    ///
    /// Runs are idempotent by external key, so the worst outcome of a race
    /// here is a duplicate dispatch the engine absorbs.
    pub async fn dispatch(
        &self,
        config: &ProcessingConfig,
        force: bool,
    ) -> Result<DispatchResult> {
        match config {
            ProcessingConfig::Multitrack(multitrack) => {
                self.dispatch_multitrack(multitrack, force).await
            }
            ProcessingConfig::File { transcript_id } => {
                let run_id = self
                    .engine
                    .start(
                        FILE_PIPELINE,
                        json!({ "transcript_id": transcript_id }),
                        HashMap::from([("transcript_id".to_string(), transcript_id.clone())]),
                    )
                    .await?;
                self.transcripts
                    .set_workflow_run(transcript_id, Some(run_id.clone()));
                tracing::info!(run_id = %run_id, "file workflow dispatched");
                Ok(DispatchResult::Ok)
            }
        }
    }

    async fn dispatch_multitrack(
        &self,
        config: &MultitrackConfig,
        force: bool,
    ) -> Result<DispatchResult> {
        let transcript = self.transcripts.get(&config.transcript_id);

        // Resume or skip an existing run before starting anything new.
        if let Some(run_id) = transcript.as_ref().and_then(|t| t.workflow_run_id.clone()) {
            if !force {
                match self.engine.run_status(&run_id).await {
                    // A live run means another dispatch got here first.
                    Ok(RunStatus::Running) | Ok(RunStatus::Queued) => {
                        tracing::info!(run_id = %run_id, "workflow already live, skipping dispatch");
                        return Ok(DispatchResult::AlreadyRunning);
                    }
                    Ok(RunStatus::Failed) if self.engine.can_replay(&run_id).await => {
                        // Operator reprocess: lift the absorbing error
                        // status before the engine resumes the run.
                        self.transcripts.clear_workflow_run(&config.transcript_id);
                        if let Err(e) = self.transcripts.set_status(
                            &config.transcript_id,
                            rf_domain::transcript::TranscriptStatus::Processing,
                        ) {
                            tracing::warn!(error = %e, "could not reset status for replay");
                        }
                        self.transcripts
                            .set_workflow_run(&config.transcript_id, Some(run_id.clone()));
                        self.engine.replay(&run_id).await?;
                        tracing::info!(run_id = %run_id, "replaying workflow");
                        return Ok(DispatchResult::Ok);
                    }
                    // Completed, cancelled, or deleted: clear the stale id
                    // and start fresh.
                    Ok(status) => tracing::info!(
                        old_run_id = %run_id,
                        old_status = ?status,
                        "old workflow not replayable, starting new"
                    ),
                    Err(_) => tracing::info!(
                        old_run_id = %run_id,
                        "old workflow not found in engine, starting new"
                    ),
                }
                self.transcripts.clear_workflow_run(&config.transcript_id);
            } else {
                // Cancellation is idempotent; a missing run is a success.
                self.engine.cancel(&run_id).await?;
                tracing::info!(run_id = %run_id, "cancelled old workflow (force)");
                self.transcripts.clear_workflow_run(&config.transcript_id);
            }
        }

        // Re-read and bail if a concurrent dispatch won in the meantime.
        if let Some(current) = self.transcripts.get(&config.transcript_id) {
            if let Some(run_id) = &current.workflow_run_id {
                match self.engine.run_status(run_id).await {
                    Ok(RunStatus::Running) | Ok(RunStatus::Queued) => {
                        tracing::info!(run_id = %run_id, "concurrent workflow detected, skipping");
                        return Ok(DispatchResult::AlreadyRunning);
                    }
                    _ => {}
                }
            }
        }

        let tracks: Vec<serde_json::Value> = config
            .track_keys
            .iter()
            .map(|key| json!({ "s3_key": key }))
            .collect();

        let run_id = self
            .engine
            .start(
                DIARIZATION_PIPELINE,
                json!({
                    "recording_id": config.recording_id,
                    "tracks": tracks,
                    "bucket_name": config.bucket_name,
                    "transcript_id": config.transcript_id,
                    "room_id": config.room_id,
                }),
                HashMap::from([
                    ("transcript_id".to_string(), config.transcript_id.clone()),
                    (
                        "recording_id".to_string(),
                        config.recording_id.clone().unwrap_or_default(),
                    ),
                ]),
            )
            .await?;

        self.transcripts
            .set_workflow_run(&config.transcript_id, Some(run_id.clone()));
        tracing::info!(run_id = %run_id, "workflow dispatched");
        Ok(DispatchResult::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FnHandler, TaskCtx, TaskDef, WorkflowDef};
    use crate::inproc::InProcessEngine;
    use chrono::Utc;
    use rf_store::{NewTranscript, Recording, RecordingStatus};

    struct Fixture {
        dispatcher: Dispatcher,
        engine: Arc<InProcessEngine>,
        transcripts: Arc<TranscriptStore>,
        recordings: Arc<RecordingStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let transcripts = Arc::new(TranscriptStore::open(dir.path()).unwrap());
        let recordings = Arc::new(RecordingStore::open(dir.path()).unwrap());
        let engine = InProcessEngine::new("inproc");

        // Stub pipelines so dispatch has something to start.
        for name in [DIARIZATION_PIPELINE, FILE_PIPELINE] {
            engine.register(WorkflowDef {
                name: name.into(),
                tasks: vec![TaskDef::new(
                    "get_recording",
                    &[],
                    Arc::new(FnHandler(|_ctx: TaskCtx| async {
                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                        Ok(serde_json::Value::Null)
                    })),
                )],
            });
        }

        let dispatcher = Dispatcher::new(engine.clone(), transcripts.clone(), recordings.clone());
        Fixture {
            dispatcher,
            engine,
            transcripts,
            recordings,
            _dir: dir,
        }
    }

    fn transcript_with_recording(fx: &Fixture, track_keys: Option<Vec<String>>) -> Transcript {
        let recording = Recording {
            id: "rec-1".into(),
            bucket_name: "bucket".into(),
            object_key: "recordings/room".into(),
            track_keys,
            recorded_at: Utc::now(),
            meeting_id: Some("m-1".into()),
            status: RecordingStatus::Pending,
        };
        assert!(fx.recordings.try_create_with_meeting(recording));

        let t = fx.transcripts.add(NewTranscript {
            name: "room recording".into(),
            recording_id: Some("rec-1".into()),
            ..Default::default()
        });
        fx.transcripts
            .set_status(&t.id, rf_domain::transcript::TranscriptStatus::Uploaded)
            .unwrap();
        fx.transcripts.get(&t.id).unwrap()
    }

    #[tokio::test]
    async fn locked_transcript_is_rejected() {
        let fx = fixture();
        let t = fx.transcripts.add(NewTranscript {
            name: "x".into(),
            ..Default::default()
        });
        fx.transcripts.with_row(&t.id, |t| t.locked = true).unwrap();
        let t = fx.transcripts.get(&t.id).unwrap();

        assert!(matches!(
            fx.dispatcher.validate(&t).await,
            ValidationResult::Locked(_)
        ));
    }

    #[tokio::test]
    async fn idle_without_run_is_not_ready() {
        let fx = fixture();
        let t = fx.transcripts.add(NewTranscript {
            name: "x".into(),
            ..Default::default()
        });
        let t = fx.transcripts.get(&t.id).unwrap();

        assert!(matches!(
            fx.dispatcher.validate(&t).await,
            ValidationResult::NotReady(_)
        ));
    }

    #[tokio::test]
    async fn unknown_engine_run_allows_processing() {
        let fx = fixture();
        let t = transcript_with_recording(&fx, None);
        fx.transcripts
            .set_workflow_run(&t.id, Some("gone-from-engine".into()));
        let t = fx.transcripts.get(&t.id).unwrap();

        assert!(matches!(
            fx.dispatcher.validate(&t).await,
            ValidationResult::Ok(_)
        ));
    }

    #[tokio::test]
    async fn prepare_selects_multitrack_for_track_keys() {
        let fx = fixture();
        let t = transcript_with_recording(
            &fx,
            Some(vec!["a.webm".into(), "b.webm".into(), "c.webm".into()]),
        );
        let ValidationResult::Ok(ok) = fx.dispatcher.validate(&t).await else {
            panic!("expected ok validation");
        };

        match fx.dispatcher.prepare(&ok).await.unwrap() {
            ProcessingConfig::Multitrack(config) => {
                assert_eq!(config.track_keys.len(), 3);
                assert_eq!(config.bucket_name, "bucket");
            }
            other => panic!("expected multitrack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn prepare_rejects_empty_track_list() {
        let fx = fixture();
        let t = transcript_with_recording(&fx, Some(vec![]));
        let ValidationResult::Ok(ok) = fx.dispatcher.validate(&t).await else {
            panic!("expected ok validation");
        };
        assert!(matches!(
            fx.dispatcher.prepare(&ok).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn prepare_falls_back_to_file_mode() {
        let fx = fixture();
        let t = transcript_with_recording(&fx, None);
        let ValidationResult::Ok(ok) = fx.dispatcher.validate(&t).await else {
            panic!("expected ok validation");
        };
        assert!(matches!(
            fx.dispatcher.prepare(&ok).await.unwrap(),
            ProcessingConfig::File { .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_dispatch_is_detected() {
        let fx = fixture();
        let t = transcript_with_recording(&fx, Some(vec!["a.webm".into()]));
        let config = ProcessingConfig::Multitrack(MultitrackConfig {
            transcript_id: t.id.clone(),
            bucket_name: "bucket".into(),
            track_keys: vec!["a.webm".into()],
            recording_id: Some("rec-1".into()),
            room_id: None,
        });

        // Simulate another process having started a run after validation.
        let other_run = fx
            .engine
            .start(
                DIARIZATION_PIPELINE,
                serde_json::json!({}),
                HashMap::new(),
            )
            .await
            .unwrap();
        fx.transcripts.set_workflow_run(&t.id, Some(other_run));

        let result = fx.dispatcher.dispatch(&config, false).await.unwrap();
        assert_eq!(result, DispatchResult::AlreadyRunning);
    }

    #[tokio::test]
    async fn force_cancels_and_starts_fresh() {
        let fx = fixture();
        let t = transcript_with_recording(&fx, Some(vec!["a.webm".into()]));
        let config = ProcessingConfig::Multitrack(MultitrackConfig {
            transcript_id: t.id.clone(),
            bucket_name: "bucket".into(),
            track_keys: vec!["a.webm".into()],
            recording_id: Some("rec-1".into()),
            room_id: None,
        });

        let old_run = fx
            .engine
            .start(
                DIARIZATION_PIPELINE,
                serde_json::json!({}),
                HashMap::new(),
            )
            .await
            .unwrap();
        fx.transcripts.set_workflow_run(&t.id, Some(old_run.clone()));

        let result = fx.dispatcher.dispatch(&config, true).await.unwrap();
        assert_eq!(result, DispatchResult::Ok);

        let new_run = fx
            .transcripts
            .get(&t.id)
            .unwrap()
            .workflow_run_id
            .unwrap();
        assert_ne!(new_run, old_run);
    }

    #[tokio::test]
    async fn missing_old_run_starts_fresh() {
        let fx = fixture();
        let t = transcript_with_recording(&fx, Some(vec!["a.webm".into()]));
        fx.transcripts
            .set_workflow_run(&t.id, Some("deleted-run".into()));

        let config = ProcessingConfig::Multitrack(MultitrackConfig {
            transcript_id: t.id.clone(),
            bucket_name: "bucket".into(),
            track_keys: vec!["a.webm".into()],
            recording_id: Some("rec-1".into()),
            room_id: None,
        });

        let result = fx.dispatcher.dispatch(&config, false).await.unwrap();
        assert_eq!(result, DispatchResult::Ok);
        let run_id = fx
            .transcripts
            .get(&t.id)
            .unwrap()
            .workflow_run_id
            .unwrap();
        assert_ne!(run_id, "deleted-run");
    }
}
