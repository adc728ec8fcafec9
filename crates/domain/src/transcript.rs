//! Transcript value types shared across the pipeline, stores, and the
//! event broadcaster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Words and diarization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One recognized word with timing and a speaker label.
///
/// For multitrack recordings the speaker is initially the track index; the
/// diarization assembler may relabel it later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    #[serde(rename = "word")]
    pub text: String,
    /// Seconds into the recording.
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub speaker: u32,
}

/// A diarization segment as returned by the diarization service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiarizationSegment {
    pub start: f64,
    pub end: f64,
    pub speaker: u32,
}

/// A transcribed body of speech: plain text plus word-level timings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeechText {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub words: Vec<Word>,
}

impl SpeechText {
    pub fn from_words(words: Vec<Word>) -> Self {
        let text = words
            .iter()
            .map(|w| w.text.trim())
            .collect::<Vec<_>>()
            .join(" ");
        Self { text, words }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Topics and participants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A detected topic within the recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub summary: String,
    /// Seconds into the recording where the topic starts.
    pub timestamp: f64,
    #[serde(default)]
    pub duration: f64,
    /// The words covered by this topic.
    #[serde(default)]
    pub transcript: SpeechText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub speaker: u32,
    pub name: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptStatus {
    Idle,
    Uploaded,
    Recording,
    Processing,
    Ended,
    Error,
}

impl std::fmt::Display for TranscriptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Uploaded => "uploaded",
            Self::Recording => "recording",
            Self::Processing => "processing",
            Self::Ended => "ended",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Live,
    File,
    Room,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    Private,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioLocation {
    Local,
    S3,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Event tags published on a transcript's room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Status,
    Transcript,
    Topic,
    FinalTitle,
    FinalLongSummary,
    FinalShortSummary,
    Waveform,
    Duration,
    DagStatus,
}

/// One event on a transcript's stream: a tag plus an opaque payload.
///
/// Events are persisted on the transcript in insertion order and replayed
/// to every new subscriber before live delivery begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub event: EventKind,
    pub data: serde_json::Value,
}

impl TranscriptEvent {
    pub fn new(event: EventKind, data: serde_json::Value) -> Self {
        Self { event, data }
    }

    pub fn status(status: TranscriptStatus) -> Self {
        Self::new(
            EventKind::Status,
            serde_json::json!({ "status": status.to_string() }),
        )
    }
}

/// Per-stage progress marker carried in event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageProgress {
    InProgress,
    Completed,
    Failed,
}

/// Timestamped record of a recording request issued to the platform.
/// Several rows may share an `instance_id` when a recording is stopped and
/// restarted within the same meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingRequest {
    pub recording_id: String,
    pub meeting_id: String,
    pub instance_id: uuid::Uuid,
    pub kind: RecordingKind,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingKind {
    Cloud,
    RawTracks,
}
