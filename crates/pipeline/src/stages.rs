//! Stage bodies shared by the multitrack and single-file pipelines, plus
//! the common tail of the DAG (topics → title/summaries → finalize).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use rf_domain::transcript::{
    DiarizationSegment, EventKind, SpeechText, Topic, TranscriptEvent, TranscriptStatus, Word,
};
use rf_domain::{Error, Result};
use rf_workflow::{FnHandler, TaskCtx, TaskDef};

use crate::{assemble, cleanup, summary, topics, webvtt, with_progress, PipelineDeps};

/// Generous ceiling for the model-bound stages.
const LLM_STAGE_TIMEOUT: Duration = Duration::from_secs(600);

/// Fold diarization into the word list, persist the WebVTT rendering, and
/// publish the assembled transcript.
pub async fn run_assemble(
    deps: &PipelineDeps,
    transcript_id: &str,
    words: Vec<Word>,
    diarization: Vec<DiarizationSegment>,
) -> Result<Vec<Word>> {
    let words = assemble::assign_speakers(words, &diarization);

    let mut speakers: Vec<u32> = words.iter().map(|w| w.speaker).collect();
    speakers.sort_unstable();
    speakers.dedup();
    let participants: Vec<rf_domain::transcript::Participant> = speakers
        .into_iter()
        .map(|speaker| rf_domain::transcript::Participant {
            speaker,
            name: format!("Speaker {speaker}"),
        })
        .collect();
    deps.stores
        .transcripts
        .with_row(transcript_id, |t| t.participants = participants)?;

    let vtt = webvtt::render(&words);
    deps.stores.transcripts.set_webvtt(transcript_id, &vtt)?;

    let speech = SpeechText::from_words(words.clone());
    deps.broadcaster
        .emit(
            transcript_id,
            TranscriptEvent::new(EventKind::Transcript, serde_json::to_value(&speech)?),
        )
        .await?;

    Ok(words)
}

/// Fetch diarization for the mixed audio, tolerating service failure.
///
/// Diarization enriches the speaker labels but its absence is not fatal;
/// tracks already carry their index as speaker.
pub async fn diarize_best_effort(
    deps: &PipelineDeps,
    audio_url: &str,
) -> Vec<DiarizationSegment> {
    let Some(diarizer) = &deps.diarizer else {
        tracing::info!("diarization disabled");
        return Vec::new();
    };
    match diarizer.diarize(audio_url, 0.0).await {
        Ok(segments) => segments,
        Err(e) => {
            tracing::error!(error = %e, "diarization failed, keeping track speakers");
            Vec::new()
        }
    }
}

/// Close out a successful run: final status, then consent cleanup.
pub async fn run_finalize(deps: &PipelineDeps, transcript_id: &str) -> Result<()> {
    deps.broadcaster
        .set_status(transcript_id, TranscriptStatus::Ended)
        .await?;

    if let Err(e) = cleanup::cleanup_consent(deps, transcript_id).await {
        // Leaves audio_deleted unset so a later pass can finish the job.
        tracing::warn!(transcript_id = %transcript_id, error = %e, "consent cleanup failed");
    }

    Ok(())
}

/// Move the transcript into processing and wipe derived outputs from any
/// previous run.
pub async fn begin_processing(deps: &PipelineDeps, transcript_id: &str) -> Result<()> {
    deps.stores.transcripts.reset_outputs(transcript_id)?;
    deps.broadcaster
        .set_status(transcript_id, TranscriptStatus::Processing)
        .await
}

/// Read the transcript id off a workflow input payload.
pub fn transcript_id_of(input: &Value) -> Result<String> {
    input
        .get("transcript_id")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| Error::Validation("workflow input missing transcript_id".into()))
}

pub(crate) fn parent_output<T: serde::de::DeserializeOwned>(
    ctx: &TaskCtx,
    parent: &str,
    field: &str,
) -> Result<T> {
    let value = ctx
        .parent_outputs
        .get(parent)
        .and_then(|o| o.get(field))
        .cloned()
        .ok_or_else(|| Error::Validation(format!("missing {field} from {parent}")))?;
    Ok(serde_json::from_value(value)?)
}

/// The DAG tail shared by both pipelines, hanging off an `assemble` task
/// whose output carries the final word list.
pub fn tail_tasks(deps: &PipelineDeps) -> Vec<TaskDef> {
    let deps_topics = deps.clone();
    let detect_topics = TaskDef::new(
        "detect_topics",
        &["assemble"],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_topics.clone();
            async move {
                let transcript_id = transcript_id_of(&ctx.input)?;
                let words: Vec<Word> = parent_output(&ctx, "assemble", "words")?;
                let topics = with_progress(
                    &deps.broadcaster,
                    &transcript_id,
                    "detect_topics",
                    &ctx.run_id,
                    topics::run_detect_topics(&deps, &transcript_id, &words),
                )
                .await?;
                Ok(serde_json::json!({ "topics": topics }))
            }
        })),
    )
    .with_timeout(LLM_STAGE_TIMEOUT);

    let deps_title = deps.clone();
    let title = TaskDef::new(
        "title",
        &["detect_topics"],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_title.clone();
            async move {
                let transcript_id = transcript_id_of(&ctx.input)?;
                let topics: Vec<Topic> = parent_output(&ctx, "detect_topics", "topics")?;
                let title = with_progress(
                    &deps.broadcaster,
                    &transcript_id,
                    "title",
                    &ctx.run_id,
                    summary::run_title(&deps, &transcript_id, &topics),
                )
                .await?;
                Ok(serde_json::json!({ "title": title }))
            }
        })),
    )
    .with_timeout(LLM_STAGE_TIMEOUT);

    let deps_summaries = deps.clone();
    let summaries = TaskDef::new(
        "summaries",
        &["detect_topics"],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_summaries.clone();
            async move {
                let transcript_id = transcript_id_of(&ctx.input)?;
                let topics: Vec<Topic> = parent_output(&ctx, "detect_topics", "topics")?;
                let (short, long) = with_progress(
                    &deps.broadcaster,
                    &transcript_id,
                    "summaries",
                    &ctx.run_id,
                    summary::run_summaries(&deps, &transcript_id, &topics),
                )
                .await?;
                Ok(serde_json::json!({
                    "short_summary": short,
                    "long_summary": long,
                }))
            }
        })),
    )
    .with_timeout(LLM_STAGE_TIMEOUT);

    let deps_finalize = deps.clone();
    let finalize = TaskDef::new(
        "finalize",
        &["title", "summaries"],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_finalize.clone();
            async move {
                let transcript_id = transcript_id_of(&ctx.input)?;
                run_finalize(&deps, &transcript_id).await?;
                Ok(Value::Null)
            }
        })),
    );

    vec![detect_topics, title, summaries, finalize]
}
