//! The multitrack diarization pipeline.
//!
//! Shape:
//! `get_recording → process_tracks (one TrackProcessing child per track)
//! → mixdown_tracks → assemble → detect_topics → {title, summaries} →
//! finalize`. Each TrackProcessing child runs `pad_track →
//! transcribe_track`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use rf_domain::transcript::{EventKind, TranscriptEvent, Word};
use rf_domain::{Error, Result};
use rf_storage::PRESIGNED_URL_EXPIRATION_SECONDS;
use rf_workflow::dispatch::DIARIZATION_PIPELINE;
use rf_workflow::{FnHandler, TaskCtx, TaskDef, WorkflowDef};

use crate::stages::{self, parent_output};
use crate::{with_progress, PipelineDeps};

/// Child workflow processing one track.
pub const TRACK_PROCESSING: &str = "TrackProcessing";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackInput {
    pub track_index: u32,
    pub s3_key: String,
    pub bucket_name: String,
    pub transcript_id: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PadTrackResult {
    pub padded_url: String,
    /// Zero when the source passed through unpadded.
    pub size: u64,
    pub track_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeTrackResult {
    pub words: Vec<Word>,
    pub track_index: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct TrackRef {
    s3_key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PipelineInput {
    #[serde(default)]
    recording_id: Option<String>,
    #[serde(default)]
    tracks: Vec<TrackRef>,
    #[serde(default)]
    bucket_name: String,
    transcript_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Track processing (child workflow)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn track_processing_workflow(deps: PipelineDeps) -> WorkflowDef {
    let deps_pad = deps.clone();
    let pad = TaskDef::new(
        "pad_track",
        &[],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_pad.clone();
            async move { pad_track(deps, ctx).await }
        })),
    )
    .with_timeout(Duration::from_secs(300));

    let deps_transcribe = deps;
    let transcribe = TaskDef::new(
        "transcribe_track",
        &["pad_track"],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_transcribe.clone();
            async move { transcribe_track(deps, ctx).await }
        })),
    )
    .with_timeout(Duration::from_secs(600));

    WorkflowDef {
        name: TRACK_PROCESSING.into(),
        tasks: vec![pad, transcribe],
    }
}

/// Prepend silence so the track's media time lines up with the meeting
/// clock.
///
/// The stream's own start time decides the delay; a track starting at or
/// before zero passes through with its source URL.
async fn pad_track(deps: PipelineDeps, ctx: TaskCtx) -> Result<Value> {
    let input: TrackInput = serde_json::from_value(ctx.input.clone())?;
    tracing::info!(
        track_index = input.track_index,
        s3_key = %input.s3_key,
        transcript_id = %input.transcript_id,
        "pad_track"
    );

    let deps_ref = &deps;
    let input_ref = &input;
    with_progress(
        &deps.broadcaster,
        &input.transcript_id,
        "pad_track",
        &ctx.run_id,
        async move {
            let source_url = deps_ref
                .storage
                .presign_get(
                    &input_ref.s3_key,
                    PRESIGNED_URL_EXPIRATION_SECONDS,
                    Some(&input_ref.bucket_name),
                )
                .await?;

            let start_time = deps_ref.audio.probe_start_time(&source_url).await;
            if start_time <= 0.0 {
                tracing::info!(
                    track_index = input_ref.track_index,
                    "track requires no padding"
                );
                return Ok(serde_json::to_value(PadTrackResult {
                    padded_url: source_url,
                    size: 0,
                    track_index: input_ref.track_index,
                })?);
            }

            let delay_ms = rf_audio::delay_ms_for_start_time(start_time);
            let scratch = tempfile::Builder::new().suffix(".webm").tempfile()?;
            deps_ref
                .audio
                .pad_track(&source_url, scratch.path(), delay_ms)
                .await?;

            let body = tokio::fs::read(scratch.path()).await?;
            let size = body.len() as u64;
            let key = format!(
                "file_pipeline_{}/{}/tracks/padded_{}.webm",
                deps_ref.engine_name, input_ref.transcript_id, input_ref.track_index
            );
            deps_ref.storage.put(&key, body, None).await?;
            tracing::info!(key = %key, size, "uploaded padded track");

            let padded_url = deps_ref
                .storage
                .presign_get(&key, PRESIGNED_URL_EXPIRATION_SECONDS, None)
                .await?;

            Ok(serde_json::to_value(PadTrackResult {
                padded_url,
                size,
                track_index: input_ref.track_index,
            })?)
        },
    )
    .await
}

/// Transcribe one padded track; every word carries the track index as its
/// speaker. Assembly never rewrites these when diarization is absent.
async fn transcribe_track(deps: PipelineDeps, ctx: TaskCtx) -> Result<Value> {
    let input: TrackInput = serde_json::from_value(ctx.input.clone())?;
    let pad: PadTrackResult = serde_json::from_value(
        ctx.parent_outputs
            .get("pad_track")
            .cloned()
            .ok_or_else(|| Error::Validation("missing padded_url from pad_track".into()))?,
    )?;

    let deps_ref = &deps;
    let input_ref = &input;
    with_progress(
        &deps.broadcaster,
        &input.transcript_id,
        "transcribe_track",
        &ctx.run_id,
        async move {
            let result = deps_ref
                .stt
                .transcribe_url(&pad.padded_url, &input_ref.language, 0.0)
                .await?;

            let words: Vec<Word> = result
                .words
                .into_iter()
                .map(|mut word| {
                    word.speaker = input_ref.track_index;
                    word
                })
                .collect();

            if words.is_empty() {
                // A silent participant track; downstream stages tolerate it.
                tracing::warn!(
                    track_index = input_ref.track_index,
                    "transcription produced no words"
                );
            }
            tracing::info!(
                track_index = input_ref.track_index,
                word_count = words.len(),
                "transcribe_track complete"
            );

            Ok(serde_json::to_value(TranscribeTrackResult {
                words,
                track_index: input_ref.track_index,
            })?)
        },
    )
    .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Diarization pipeline (parent workflow)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn diarization_pipeline(deps: PipelineDeps) -> WorkflowDef {
    let deps_get = deps.clone();
    let get_recording = TaskDef::new(
        "get_recording",
        &[],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_get.clone();
            async move { get_recording(deps, ctx).await }
        })),
    );

    let deps_tracks = deps.clone();
    let process_tracks = TaskDef::new(
        "process_tracks",
        &["get_recording"],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_tracks.clone();
            async move { process_tracks(deps, ctx).await }
        })),
    )
    .with_timeout(Duration::from_secs(1800));

    let deps_mix = deps.clone();
    let mixdown = TaskDef::new(
        "mixdown_tracks",
        &["process_tracks"],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_mix.clone();
            async move { mixdown_tracks(deps, ctx).await }
        })),
    )
    .with_timeout(Duration::from_secs(900));

    let deps_assemble = deps.clone();
    let assemble = TaskDef::new(
        "assemble",
        &["process_tracks", "mixdown_tracks"],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_assemble.clone();
            async move { assemble_task(deps, ctx).await }
        })),
    )
    .with_timeout(Duration::from_secs(600));

    let mut tasks = vec![get_recording, process_tracks, mixdown, assemble];
    tasks.extend(stages::tail_tasks(&deps));

    WorkflowDef {
        name: DIARIZATION_PIPELINE.into(),
        tasks,
    }
}

/// Resolve the canonical track list, preferring the recording row over the
/// dispatch payload, and move the transcript into processing.
async fn get_recording(deps: PipelineDeps, ctx: TaskCtx) -> Result<Value> {
    let input: PipelineInput = serde_json::from_value(ctx.input.clone())?;

    let deps_ref = &deps;
    let input_ref = &input;
    with_progress(
        &deps.broadcaster,
        &input.transcript_id,
        "get_recording",
        &ctx.run_id,
        async move {
            stages::begin_processing(deps_ref, &input_ref.transcript_id).await?;

            let (bucket_name, track_keys) = match input_ref
                .recording_id
                .as_ref()
                .and_then(|id| deps_ref.stores.recordings.get(id))
            {
                Some(recording) => {
                    let keys = recording.track_keys.clone().unwrap_or_default();
                    (recording.bucket_name, keys)
                }
                None => (
                    input_ref.bucket_name.clone(),
                    input_ref.tracks.iter().map(|t| t.s3_key.clone()).collect(),
                ),
            };

            if track_keys.is_empty() {
                return Err(Error::Validation("recording has no track keys".into()));
            }
            if bucket_name.is_empty() {
                return Err(Error::Validation("recording has no bucket name".into()));
            }

            Ok(json!({
                "bucket_name": bucket_name,
                "track_keys": track_keys,
            }))
        },
    )
    .await
}

/// Fan out one TrackProcessing child per track and merge their outputs.
///
/// All children run in parallel; any child failure fails the stage, since
/// assembly assumes every track is present.
async fn process_tracks(deps: PipelineDeps, ctx: TaskCtx) -> Result<Value> {
    let input: PipelineInput = serde_json::from_value(ctx.input.clone())?;
    let bucket_name: String = parent_output(&ctx, "get_recording", "bucket_name")?;
    let track_keys: Vec<String> = parent_output(&ctx, "get_recording", "track_keys")?;

    let ctx_ref = &ctx;
    let deps_ref = &deps;
    let input_ref = &input;
    let bucket_ref = &bucket_name;
    with_progress(
        &deps.broadcaster,
        &input.transcript_id,
        "process_tracks",
        &ctx.run_id,
        async move {
            let mut child_inputs = Vec::with_capacity(track_keys.len());
            for (index, s3_key) in track_keys.iter().enumerate() {
                child_inputs.push(serde_json::to_value(TrackInput {
                    track_index: index as u32,
                    s3_key: s3_key.clone(),
                    bucket_name: bucket_ref.clone(),
                    transcript_id: input_ref.transcript_id.clone(),
                    language: deps_ref.language.clone(),
                })?);
            }
            let children = child_inputs
                .into_iter()
                .map(|child_input| ctx_ref.run_child(TRACK_PROCESSING, child_input));

            let results = futures_util::future::try_join_all(children).await?;

            let mut padded_urls: Vec<String> = vec![String::new(); track_keys.len()];
            let mut words: Vec<Word> = Vec::new();
            for child in results {
                let pad: PadTrackResult = serde_json::from_value(
                    child
                        .get("pad_track")
                        .cloned()
                        .ok_or_else(|| Error::Protocol("child missing pad_track output".into()))?,
                )?;
                let transcribed: TranscribeTrackResult = serde_json::from_value(
                    child.get("transcribe_track").cloned().ok_or_else(|| {
                        Error::Protocol("child missing transcribe_track output".into())
                    })?,
                )?;
                padded_urls[pad.track_index as usize] = pad.padded_url;
                words.extend(transcribed.words);
            }

            words.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

            Ok(json!({
                "words": words,
                "padded_urls": padded_urls,
            }))
        },
    )
    .await
}

/// Mix every padded track into `<transcript_id>/audio.mp3`.
async fn mixdown_tracks(deps: PipelineDeps, ctx: TaskCtx) -> Result<Value> {
    let input: PipelineInput = serde_json::from_value(ctx.input.clone())?;
    let padded_urls: Vec<String> = parent_output(&ctx, "process_tracks", "padded_urls")?;

    let deps_ref = &deps;
    let input_ref = &input;
    with_progress(
        &deps.broadcaster,
        &input.transcript_id,
        "mixdown_tracks",
        &ctx.run_id,
        async move {
            let scratch = tempfile::Builder::new().suffix(".mp3").tempfile()?;
            let mix = deps_ref.audio.mixdown(&padded_urls, scratch.path()).await?;

            let body = tokio::fs::read(scratch.path()).await?;
            let audio_key = format!("{}/audio.mp3", input_ref.transcript_id);
            deps_ref.storage.put(&audio_key, body, None).await?;

            deps_ref
                .stores
                .transcripts
                .set_duration(&input_ref.transcript_id, mix.duration)?;
            deps_ref
                .broadcaster
                .emit(
                    &input_ref.transcript_id,
                    TranscriptEvent::new(
                        EventKind::Duration,
                        json!({ "duration": mix.duration }),
                    ),
                )
                .await?;

            tracing::info!(
                audio_key = %audio_key,
                duration = mix.duration,
                size = mix.size,
                "mixdown complete"
            );

            Ok(json!({
                "audio_key": audio_key,
                "duration": mix.duration,
                "size": mix.size,
            }))
        },
    )
    .await
}

/// Diarize the mixdown and fold speakers into the merged word list.
async fn assemble_task(deps: PipelineDeps, ctx: TaskCtx) -> Result<Value> {
    let input: PipelineInput = serde_json::from_value(ctx.input.clone())?;
    let words: Vec<Word> = parent_output(&ctx, "process_tracks", "words")?;
    let audio_key: String = parent_output(&ctx, "mixdown_tracks", "audio_key")?;

    let deps_ref = &deps;
    let input_ref = &input;
    with_progress(
        &deps.broadcaster,
        &input.transcript_id,
        "assemble",
        &ctx.run_id,
        async move {
            let audio_url = deps_ref
                .storage
                .presign_get(&audio_key, PRESIGNED_URL_EXPIRATION_SECONDS, None)
                .await?;
            let diarization = stages::diarize_best_effort(deps_ref, &audio_url).await;
            let words =
                stages::run_assemble(deps_ref, &input_ref.transcript_id, words, diarization)
                    .await?;
            Ok(json!({ "words": words }))
        },
    )
    .await
}
