//! Transcript rows and the monotone status machine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use rf_domain::transcript::{
    AudioLocation, Participant, ShareMode, SourceKind, Topic, TranscriptEvent, TranscriptStatus,
};
use rf_domain::{Error, Result};

use crate::persist::{load_map, save_map, snapshot_path};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub id: String,
    pub name: String,
    pub status: TranscriptStatus,
    pub source_kind: SourceKind,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    pub share_mode: ShareMode,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub meeting_id: Option<String>,
    #[serde(default)]
    pub recording_id: Option<String>,
    #[serde(default)]
    pub workflow_run_id: Option<String>,
    /// Set by the operator reprocess path; spent by the next transition
    /// out of a terminal status.
    #[serde(default)]
    pub reprocess_requested: bool,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub short_summary: Option<String>,
    #[serde(default)]
    pub long_summary: Option<String>,
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Append-only; replayed to new subscribers.
    #[serde(default)]
    pub events: Vec<TranscriptEvent>,
    pub audio_location: AudioLocation,
    #[serde(default)]
    pub audio_deleted: bool,
    #[serde(default)]
    pub webvtt: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transcript {
    /// Flat text used by the search index.
    pub fn search_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        parts.push(&self.name);
        if let Some(t) = &self.title {
            parts.push(t);
        }
        if let Some(s) = &self.short_summary {
            parts.push(s);
        }
        let topics: Vec<&str> = self.topics.iter().map(|t| t.title.as_str()).collect();
        parts.extend(topics);
        parts.join(" ")
    }
}

/// Fields chosen at creation time; everything else starts at its zero
/// value and is filled in by pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct NewTranscript {
    pub name: String,
    pub source_kind: Option<SourceKind>,
    pub user_id: Option<String>,
    pub room_id: Option<String>,
    pub meeting_id: Option<String>,
    pub recording_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Forward-only transitions. Error is absorbing, and leaving a terminal
/// state requires the operator reprocess path to have cleared the workflow
/// run first (which arms `reprocess_requested`).
fn transition_allowed(
    from: TranscriptStatus,
    to: TranscriptStatus,
    reprocess_requested: bool,
) -> bool {
    use TranscriptStatus::*;
    if from == to {
        return true;
    }
    match (from, to) {
        (_, Error) => true,
        (Idle, Uploaded) | (Idle, Recording) | (Idle, Processing) => true,
        (Uploaded, Processing) => true,
        (Recording, Processing) => true,
        (Processing, Ended) => true,
        (Error, Processing) | (Ended, Processing) => reprocess_requested,
        _ => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TranscriptStore {
    path: PathBuf,
    rows: RwLock<HashMap<String, Transcript>>,
}

impl TranscriptStore {
    pub fn open(state_path: &Path) -> Result<Self> {
        let path = snapshot_path(state_path, "transcripts");
        let rows = load_map(&path);
        tracing::info!(rows = rows.len(), path = %path.display(), "transcript store loaded");
        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    pub fn add(&self, new: NewTranscript) -> Transcript {
        let transcript = Transcript {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            status: TranscriptStatus::Idle,
            source_kind: new.source_kind.unwrap_or(SourceKind::File),
            locked: false,
            user_id: new.user_id,
            share_mode: ShareMode::Private,
            room_id: new.room_id,
            meeting_id: new.meeting_id,
            recording_id: new.recording_id,
            workflow_run_id: None,
            reprocess_requested: false,
            duration: None,
            title: None,
            short_summary: None,
            long_summary: None,
            topics: Vec::new(),
            participants: Vec::new(),
            events: Vec::new(),
            audio_location: AudioLocation::S3,
            audio_deleted: false,
            webvtt: None,
            created_at: Utc::now(),
        };
        self.rows
            .write()
            .insert(transcript.id.clone(), transcript.clone());
        transcript
    }

    pub fn get(&self, id: &str) -> Option<Transcript> {
        self.rows.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Transcript> {
        self.rows.read().values().cloned().collect()
    }

    /// Transition the status, appending the STATUS event on success.
    ///
    /// Returns the event for broadcast, or `None` when the status did not
    /// actually change. Invalid transitions are rejected.
    pub fn set_status(
        &self,
        id: &str,
        status: TranscriptStatus,
    ) -> Result<Option<TranscriptEvent>> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("transcript {id}")))?;

        if row.status == status {
            return Ok(None);
        }

        if !transition_allowed(row.status, status, row.reprocess_requested) {
            return Err(Error::Validation(format!(
                "illegal status transition {} -> {status}",
                row.status
            )));
        }

        // The reprocess grant is single-use: spent on leaving a terminal
        // status, and wiped whenever a new terminal status lands.
        let leaving_terminal = matches!(
            row.status,
            TranscriptStatus::Error | TranscriptStatus::Ended
        );
        if leaving_terminal
            || matches!(status, TranscriptStatus::Error | TranscriptStatus::Ended)
        {
            row.reprocess_requested = false;
        }

        row.status = status;
        let event = TranscriptEvent::status(status);
        row.events.push(event.clone());
        tracing::info!(transcript_id = %id, status = %status, "transcript status updated");
        Ok(Some(event))
    }

    /// Append an event to the transcript's replay log.
    pub fn append_event(&self, id: &str, event: TranscriptEvent) -> Result<()> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("transcript {id}")))?;
        row.events.push(event);
        Ok(())
    }

    pub fn events(&self, id: &str) -> Vec<TranscriptEvent> {
        self.rows
            .read()
            .get(id)
            .map(|t| t.events.clone())
            .unwrap_or_default()
    }

    /// Record the workflow run only when none is set. Returns whether this
    /// caller won; the loser is a concurrent dispatch that should back off.
    pub fn set_workflow_run_if_missing(&self, id: &str, run_id: &str) -> bool {
        let mut rows = self.rows.write();
        match rows.get_mut(id) {
            Some(row) if row.workflow_run_id.is_none() => {
                row.workflow_run_id = Some(run_id.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn set_workflow_run(&self, id: &str, run_id: Option<String>) {
        if let Some(row) = self.rows.write().get_mut(id) {
            row.workflow_run_id = run_id;
        }
    }

    /// Operator reprocess: forget the run and grant one transition out of
    /// a terminal status.
    pub fn clear_workflow_run(&self, id: &str) {
        if let Some(row) = self.rows.write().get_mut(id) {
            row.workflow_run_id = None;
            row.reprocess_requested = true;
        }
    }

    pub fn with_row<F: FnOnce(&mut Transcript)>(&self, id: &str, mutate: F) -> Result<()> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("transcript {id}")))?;
        mutate(row);
        Ok(())
    }

    pub fn set_duration(&self, id: &str, duration: f64) -> Result<()> {
        self.with_row(id, |t| t.duration = Some(duration))
    }

    pub fn set_title(&self, id: &str, title: &str) -> Result<()> {
        self.with_row(id, |t| t.title = Some(title.to_string()))
    }

    pub fn set_summaries(&self, id: &str, short: &str, long: &str) -> Result<()> {
        self.with_row(id, |t| {
            t.short_summary = Some(short.to_string());
            t.long_summary = Some(long.to_string());
        })
    }

    pub fn add_topic(&self, id: &str, topic: Topic) -> Result<()> {
        self.with_row(id, |t| t.topics.push(topic))
    }

    pub fn set_webvtt(&self, id: &str, webvtt: &str) -> Result<()> {
        self.with_row(id, |t| t.webvtt = Some(webvtt.to_string()))
    }

    pub fn set_audio_deleted(&self, id: &str) -> Result<()> {
        self.with_row(id, |t| t.audio_deleted = true)
    }

    /// Wipe derived state before a full re-run.
    pub fn reset_outputs(&self, id: &str) -> Result<()> {
        self.with_row(id, |t| {
            t.events.clear();
            t.topics.clear();
            t.title = None;
            t.short_summary = None;
            t.long_summary = None;
            t.webvtt = None;
        })
    }

    pub fn delete(&self, id: &str) {
        self.rows.write().remove(id);
    }

    /// Anonymous transcripts older than the cutoff, for the retention
    /// sweeper.
    pub fn list_expired_anonymous(&self, cutoff: DateTime<Utc>) -> Vec<Transcript> {
        self.rows
            .read()
            .values()
            .filter(|t| t.user_id.is_none() && t.created_at < cutoff)
            .cloned()
            .collect()
    }

    pub fn flush(&self) -> Result<()> {
        save_map(&self.path, &self.rows.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TranscriptStore {
        let dir = tempfile::tempdir().unwrap();
        TranscriptStore::open(dir.path()).unwrap()
    }

    fn added(store: &TranscriptStore) -> Transcript {
        store.add(NewTranscript {
            name: "Weekly sync".into(),
            ..Default::default()
        })
    }

    #[test]
    fn forward_transitions_emit_status_events() {
        let store = store();
        let t = added(&store);

        store
            .set_status(&t.id, TranscriptStatus::Uploaded)
            .unwrap()
            .unwrap();
        store
            .set_status(&t.id, TranscriptStatus::Processing)
            .unwrap()
            .unwrap();
        let event = store
            .set_status(&t.id, TranscriptStatus::Ended)
            .unwrap()
            .unwrap();

        assert_eq!(event.data["status"], "ended");
        assert_eq!(store.events(&t.id).len(), 3);
    }

    #[test]
    fn backward_transition_rejected() {
        let store = store();
        let t = added(&store);
        store.set_status(&t.id, TranscriptStatus::Processing).unwrap();
        store.set_status(&t.id, TranscriptStatus::Ended).unwrap();

        let err = store
            .set_status(&t.id, TranscriptStatus::Uploaded)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn ended_to_processing_requires_cleared_workflow() {
        let store = store();
        let t = added(&store);
        store.set_status(&t.id, TranscriptStatus::Processing).unwrap();
        assert!(store.set_workflow_run_if_missing(&t.id, "run-1"));
        store.set_status(&t.id, TranscriptStatus::Ended).unwrap();

        // A new run cannot restart a finished transcript...
        assert!(store
            .set_status(&t.id, TranscriptStatus::Processing)
            .is_err());

        // ...until the operator clears the old workflow run.
        store.clear_workflow_run(&t.id);
        assert!(store
            .set_status(&t.id, TranscriptStatus::Processing)
            .unwrap()
            .is_some());
    }

    #[test]
    fn reprocess_grant_is_single_use() {
        let store = store();
        let t = added(&store);
        store.set_status(&t.id, TranscriptStatus::Processing).unwrap();
        store.set_status(&t.id, TranscriptStatus::Ended).unwrap();

        store.clear_workflow_run(&t.id);
        store.set_status(&t.id, TranscriptStatus::Processing).unwrap();
        store.set_status(&t.id, TranscriptStatus::Ended).unwrap();

        // The grant was spent by the first reprocess.
        assert!(store
            .set_status(&t.id, TranscriptStatus::Processing)
            .is_err());
    }

    #[test]
    fn error_is_reachable_from_anywhere() {
        let store = store();
        let t = added(&store);
        store
            .set_status(&t.id, TranscriptStatus::Error)
            .unwrap()
            .unwrap();
        // Absorbing while a workflow run is attached.
        store.set_workflow_run(&t.id, Some("run-9".into()));
        assert!(store
            .set_status(&t.id, TranscriptStatus::Processing)
            .is_err());
    }

    #[test]
    fn same_status_is_a_no_op() {
        let store = store();
        let t = added(&store);
        assert!(store
            .set_status(&t.id, TranscriptStatus::Idle)
            .unwrap()
            .is_none());
        assert!(store.events(&t.id).is_empty());
    }

    #[test]
    fn workflow_run_first_writer_wins() {
        let store = store();
        let t = added(&store);
        assert!(store.set_workflow_run_if_missing(&t.id, "run-a"));
        assert!(!store.set_workflow_run_if_missing(&t.id, "run-b"));
        assert_eq!(store.get(&t.id).unwrap().workflow_run_id.unwrap(), "run-a");
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let id;
        {
            let store = TranscriptStore::open(dir.path()).unwrap();
            id = added(&store).id;
            store.flush().unwrap();
        }
        let reloaded = TranscriptStore::open(dir.path()).unwrap();
        assert!(reloaded.get(&id).is_some());
    }
}
