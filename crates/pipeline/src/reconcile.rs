//! Recording reconciliation.
//!
//! Recordings arrive by webhook and by periodic polling; either path goes
//! through [`Reconciler::handle_discovered`], which links the recording to
//! its meeting, guards against double-dispatch, and kicks off processing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use rf_domain::transcript::{RecordingKind, SourceKind};
use rf_domain::Result;
use rf_store::{NewTranscript, Recording, RecordingStatus, Stores};
use rf_workflow::{DispatchResult, Dispatcher, ProcessingConfig, ValidationResult};

/// A recording as reported by the platform, before any linkage.
#[derive(Debug, Clone)]
pub struct DiscoveredRecording {
    /// External platform id.
    pub id: String,
    pub room_name: String,
    pub recorded_at: DateTime<Utc>,
    pub bucket_name: String,
    pub object_key: String,
    /// Per-speaker audio tracks; empty for composed cloud recordings.
    pub track_keys: Vec<String>,
    /// Duration in seconds, when the platform reports one.
    pub duration: Option<u64>,
}

/// Where the platform recordings come from (polling seam).
#[async_trait]
pub trait RecordingSource: Send + Sync {
    async fn list_recordings(&self, since: DateTime<Utc>) -> Result<Vec<DiscoveredRecording>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Processing dispatched for this transcript.
    Dispatched { transcript_id: String },
    /// Another poller already owns this recording.
    Duplicate,
    /// No meeting matched; stored in the orphan ledger.
    Orphan,
    /// Composed cloud recording stored on the meeting row.
    CloudStored,
    /// The meeting already had a cloud recording; first write won.
    CloudDuplicate,
}

pub struct Reconciler {
    stores: Stores,
    dispatcher: Dispatcher,
    match_window_hours: u32,
}

impl Reconciler {
    pub fn new(stores: Stores, dispatcher: Dispatcher, match_window_hours: u32) -> Self {
        Self {
            stores,
            dispatcher,
            match_window_hours,
        }
    }

    /// Poll entry point: reconcile everything the platform reported that
    /// is not yet in the store.
    pub async fn poll(
        &self,
        source: &dyn RecordingSource,
        lookback_hours: u32,
    ) -> Result<Vec<ReconcileOutcome>> {
        let since = Utc::now() - chrono::Duration::hours(lookback_hours as i64);
        let discovered = source.list_recordings(since).await?;

        let mut outcomes = Vec::new();
        for recording in discovered {
            if self.stores.recordings.get(&recording.id).is_some() {
                continue;
            }
            match self.handle_discovered(recording).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "failed to reconcile recording"),
            }
        }
        Ok(outcomes)
    }

    /// Link one discovered recording and dispatch processing at most once.
    pub async fn handle_discovered(
        &self,
        recording: DiscoveredRecording,
    ) -> Result<ReconcileOutcome> {
        // 1. Exact match through the request registry wins.
        let request_match = self.stores.requests.find_by_recording_id(&recording.id);

        if let Some((meeting_id, RecordingKind::Cloud)) = &request_match {
            return Ok(self.store_cloud_recording(meeting_id, &recording));
        }

        // 2. Fall back to time-based matching on the room name.
        let meeting_id = match request_match {
            Some((meeting_id, _)) => Some(meeting_id),
            None => self
                .stores
                .meetings
                .get_by_room_name_and_time(
                    &recording.room_name,
                    recording.recorded_at,
                    self.match_window_hours,
                )
                .map(|m| m.id),
        };

        // 3. No meeting: orphan ledger, idempotently.
        let Some(meeting_id) = meeting_id else {
            self.stores.recordings.create_orphan(Recording {
                id: recording.id.clone(),
                bucket_name: recording.bucket_name.clone(),
                object_key: recording.object_key.clone(),
                track_keys: none_if_empty(&recording.track_keys),
                recorded_at: recording.recorded_at,
                meeting_id: None,
                status: RecordingStatus::Orphan,
            });
            return Ok(ReconcileOutcome::Orphan);
        };

        // The recording row is the canonical lock against double-dispatch:
        // exactly one concurrent caller gets past this point.
        let created = self.stores.recordings.try_create_with_meeting(Recording {
            id: recording.id.clone(),
            bucket_name: recording.bucket_name.clone(),
            object_key: recording.object_key.clone(),
            track_keys: none_if_empty(&recording.track_keys),
            recorded_at: recording.recorded_at,
            meeting_id: Some(meeting_id.clone()),
            status: RecordingStatus::Pending,
        });
        if !created {
            tracing::info!(recording_id = %recording.id, "recording already claimed");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let meeting = self.stores.meetings.get(&meeting_id);
        let transcript = self.stores.transcripts.add(NewTranscript {
            name: format!("{} recording", recording.room_name),
            source_kind: Some(SourceKind::Room),
            room_id: meeting.and_then(|m| m.room_id),
            meeting_id: Some(meeting_id),
            recording_id: Some(recording.id.clone()),
            ..Default::default()
        });
        self.stores
            .transcripts
            .set_status(&transcript.id, rf_domain::transcript::TranscriptStatus::Uploaded)?;

        let transcript = self
            .stores
            .transcripts
            .get(&transcript.id)
            .ok_or_else(|| rf_domain::Error::NotFound(format!("transcript {}", transcript.id)))?;
        match self.dispatcher.validate(&transcript).await {
            ValidationResult::Ok(ok) => {
                let config = self.dispatcher.prepare(&ok).await?;
                match self.dispatcher.dispatch(&config, false).await? {
                    DispatchResult::Ok => {
                        if let ProcessingConfig::Multitrack(_) = config {
                            tracing::info!(
                                transcript_id = %transcript.id,
                                recording_id = %recording.id,
                                "multitrack processing dispatched"
                            );
                        }
                        Ok(ReconcileOutcome::Dispatched {
                            transcript_id: transcript.id,
                        })
                    }
                    DispatchResult::AlreadyRunning => Ok(ReconcileOutcome::Duplicate),
                }
            }
            other => {
                tracing::warn!(
                    transcript_id = %transcript.id,
                    result = ?other,
                    "validation declined dispatch"
                );
                Ok(ReconcileOutcome::Duplicate)
            }
        }
    }

    fn store_cloud_recording(
        &self,
        meeting_id: &str,
        recording: &DiscoveredRecording,
    ) -> ReconcileOutcome {
        let won = self.stores.meetings.set_cloud_recording_if_missing(
            meeting_id,
            &recording.object_key,
            recording.duration.unwrap_or(0),
        );
        if won {
            tracing::info!(
                meeting_id = %meeting_id,
                key = %recording.object_key,
                "cloud recording stored"
            );
            ReconcileOutcome::CloudStored
        } else {
            ReconcileOutcome::CloudDuplicate
        }
    }
}

fn none_if_empty(keys: &[String]) -> Option<Vec<String>> {
    if keys.is_empty() {
        None
    } else {
        Some(keys.to_vec())
    }
}
