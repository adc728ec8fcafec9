//! Single-file pipeline: one uploaded object, transcription and
//! diarization in parallel, then the shared tail.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use rf_domain::transcript::Word;
use rf_domain::Result;
use rf_storage::PRESIGNED_URL_EXPIRATION_SECONDS;
use rf_workflow::dispatch::FILE_PIPELINE;
use rf_workflow::{FnHandler, TaskCtx, TaskDef, WorkflowDef};

use crate::stages::{self, parent_output, transcript_id_of};
use crate::{with_progress, PipelineDeps};

/// Object key of the uploaded audio for a file-mode transcript.
pub fn upload_audio_key(transcript_id: &str) -> String {
    format!("file_pipeline/{transcript_id}/audio.mp3")
}

pub fn file_pipeline(deps: PipelineDeps) -> WorkflowDef {
    let deps_prepare = deps.clone();
    let prepare_audio = TaskDef::new(
        "prepare_audio",
        &[],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_prepare.clone();
            async move {
                let transcript_id = transcript_id_of(&ctx.input)?;
                let deps_ref = &deps;
                let tid = &transcript_id;
                with_progress(
                    &deps.broadcaster,
                    &transcript_id,
                    "prepare_audio",
                    &ctx.run_id,
                    async move {
                        stages::begin_processing(deps_ref, tid).await?;
                        let audio_key = upload_audio_key(tid);
                        let audio_url = deps_ref
                            .storage
                            .presign_get(&audio_key, PRESIGNED_URL_EXPIRATION_SECONDS, None)
                            .await?;
                        Ok(json!({ "audio_key": audio_key, "audio_url": audio_url }))
                    },
                )
                .await
            }
        })),
    );

    let deps_transcribe = deps.clone();
    let transcribe_file = TaskDef::new(
        "transcribe_file",
        &["prepare_audio"],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_transcribe.clone();
            async move {
                let transcript_id = transcript_id_of(&ctx.input)?;
                let audio_url: String = parent_output(&ctx, "prepare_audio", "audio_url")?;
                let deps_ref = &deps;
                with_progress(
                    &deps.broadcaster,
                    &transcript_id,
                    "transcribe_file",
                    &ctx.run_id,
                    async move {
                        let result = deps_ref
                            .stt
                            .transcribe_url(&audio_url, &deps_ref.language, 0.0)
                            .await?;
                        Ok(json!({ "words": result.words }))
                    },
                )
                .await
            }
        })),
    )
    .with_timeout(Duration::from_secs(600));

    let deps_diarize = deps.clone();
    let diarize_file = TaskDef::new(
        "diarize_file",
        &["prepare_audio"],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_diarize.clone();
            async move {
                let transcript_id = transcript_id_of(&ctx.input)?;
                let audio_url: String = parent_output(&ctx, "prepare_audio", "audio_url")?;
                let deps_ref = &deps;
                with_progress(
                    &deps.broadcaster,
                    &transcript_id,
                    "diarize_file",
                    &ctx.run_id,
                    async move {
                        let diarization = stages::diarize_best_effort(deps_ref, &audio_url).await;
                        Ok(json!({ "diarization": diarization }))
                    },
                )
                .await
            }
        })),
    )
    .with_timeout(Duration::from_secs(600));

    let deps_assemble = deps.clone();
    let assemble = TaskDef::new(
        "assemble",
        &["transcribe_file", "diarize_file"],
        Arc::new(FnHandler(move |ctx: TaskCtx| {
            let deps = deps_assemble.clone();
            async move { assemble_file(deps, ctx).await }
        })),
    );

    let mut tasks = vec![prepare_audio, transcribe_file, diarize_file, assemble];
    tasks.extend(stages::tail_tasks(&deps));

    WorkflowDef {
        name: FILE_PIPELINE.into(),
        tasks,
    }
}

async fn assemble_file(deps: PipelineDeps, ctx: TaskCtx) -> Result<Value> {
    let transcript_id = transcript_id_of(&ctx.input)?;
    let words: Vec<Word> = parent_output(&ctx, "transcribe_file", "words")?;
    let diarization = parent_output(&ctx, "diarize_file", "diarization")?;

    let deps_ref = &deps;
    let tid = &transcript_id;
    with_progress(
        &deps.broadcaster,
        &transcript_id,
        "assemble",
        &ctx.run_id,
        async move {
            let words = stages::run_assemble(deps_ref, tid, words, diarization).await?;
            Ok(json!({ "words": words }))
        },
    )
    .await
}
