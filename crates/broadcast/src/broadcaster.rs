//! Transcript-scoped event broadcasting with historical replay.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;

use rf_domain::dag::DagStatusData;
use rf_domain::transcript::{EventKind, TranscriptEvent, TranscriptStatus};
use rf_domain::Result;
use rf_store::TranscriptStore;

use crate::{pending_join_key, pending_join_prefix, transcript_room, PubSub};

/// Publishes transcript events: persists them on the row, then fans out to
/// the transcript's room.
#[derive(Clone)]
pub struct EventBroadcaster {
    transcripts: Arc<TranscriptStore>,
    pubsub: Arc<dyn PubSub>,
}

impl EventBroadcaster {
    pub fn new(transcripts: Arc<TranscriptStore>, pubsub: Arc<dyn PubSub>) -> Self {
        Self {
            transcripts,
            pubsub,
        }
    }

    pub fn pubsub(&self) -> Arc<dyn PubSub> {
        self.pubsub.clone()
    }

    /// Persist an event on the transcript and publish it live.
    pub async fn emit(&self, transcript_id: &str, event: TranscriptEvent) -> Result<()> {
        self.transcripts.append_event(transcript_id, event.clone())?;
        self.publish_only(transcript_id, &event).await;
        Ok(())
    }

    /// Publish without persisting. Used for DAG snapshots, which supersede
    /// each other and are recomputable from the engine.
    pub async fn publish_only(&self, transcript_id: &str, event: &TranscriptEvent) {
        let payload = serde_json::to_value(event).unwrap_or(Value::Null);
        self.pubsub
            .publish(&transcript_room(transcript_id), payload)
            .await;
    }

    /// Drive the status machine and broadcast the transition, if any.
    pub async fn set_status(
        &self,
        transcript_id: &str,
        status: TranscriptStatus,
    ) -> Result<()> {
        if let Some(event) = self.transcripts.set_status(transcript_id, status)? {
            self.publish_only(transcript_id, &event).await;
        }
        Ok(())
    }

    /// Stage progress marker, persisted so late subscribers see the
    /// pipeline's history.
    pub async fn emit_progress(
        &self,
        transcript_id: &str,
        stage: &str,
        progress: rf_domain::transcript::StageProgress,
        workflow_run_id: &str,
    ) -> Result<()> {
        self.emit(
            transcript_id,
            TranscriptEvent::new(
                EventKind::Transcript,
                serde_json::json!({
                    "stage": stage,
                    "progress": progress,
                    "workflow_run_id": workflow_run_id,
                }),
            ),
        )
        .await
    }

    /// Publish the latest DAG snapshot for a transcript's workflow run.
    pub async fn publish_dag_status(&self, transcript_id: &str, snapshot: &DagStatusData) {
        let event = TranscriptEvent::new(
            EventKind::DagStatus,
            serde_json::to_value(snapshot).unwrap_or(Value::Null),
        );
        self.publish_only(transcript_id, &event).await;
    }

    /// Attach a subscriber: full persisted history first, then the live
    /// receiver. At-most-once within this connection.
    pub fn subscribe(
        &self,
        transcript_id: &str,
    ) -> (Vec<TranscriptEvent>, broadcast::Receiver<Value>) {
        let history = self.transcripts.events(transcript_id);
        let receiver = self.pubsub.subscribe(&transcript_room(transcript_id));
        (history, receiver)
    }

    // ── Pending joins ──────────────────────────────────────────────

    pub async fn create_pending_join(
        &self,
        meeting_id: &str,
        connection_id: &str,
        grace: Duration,
    ) {
        self.pubsub
            .kv_set_ttl(&pending_join_key(meeting_id, connection_id), grace)
            .await;
    }

    pub async fn clear_pending_join(&self, meeting_id: &str, connection_id: &str) {
        self.pubsub
            .kv_delete(&pending_join_key(meeting_id, connection_id))
            .await;
    }

    pub async fn has_pending_join(&self, meeting_id: &str) -> bool {
        self.pubsub
            .kv_exists_prefix(&pending_join_prefix(meeting_id))
            .await
    }
}
