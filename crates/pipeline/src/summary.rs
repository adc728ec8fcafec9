//! Final title and summaries, driven by the detected topics.

use serde::Deserialize;

use rf_domain::transcript::{EventKind, Topic, TranscriptEvent};
use rf_domain::Result;
use rf_llm::{ensure_casing, trim_title, PromptTemplate};

use crate::PipelineDeps;

#[derive(Debug, Deserialize)]
struct TitleOut {
    title: String,
}

#[derive(Debug, Deserialize)]
struct SummaryOut {
    short_summary: String,
    long_summary: String,
}

fn title_template() -> PromptTemplate {
    PromptTemplate::new(
        "You name meetings. Answer with JSON only.",
        "Given these discussion topics, produce one short descriptive \
         meeting title. Respond as {\"title\": \"...\"}.",
    )
}

fn subjects_template() -> PromptTemplate {
    PromptTemplate::new(
        "You extract discussion subjects from meeting notes. Answer with \
         JSON only.",
        "List every distinct subject discussed in the following notes as a \
         JSON array of short strings.",
    )
}

fn dedup_template() -> PromptTemplate {
    PromptTemplate::new(
        "You consolidate lists. Answer with JSON only.",
        "Merge duplicate or overlapping subjects in this list into one \
         entry each, preserving order. Respond as a JSON array of strings.",
    )
}

fn summary_template() -> PromptTemplate {
    PromptTemplate::new(
        "You summarize meetings. Answer with JSON only.",
        "Write two summaries of the meeting described by these subjects and \
         topic notes: a one-sentence short summary and a multi-paragraph \
         long summary. Respond as {\"short_summary\": \"...\", \
         \"long_summary\": \"...\"}.",
    )
}

fn topics_corpus(topics: &[Topic]) -> String {
    topics
        .iter()
        .map(|t| format!("{}\n{}", t.title, t.summary))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One short title, with the casing and lead-in fallbacks applied.
pub async fn run_title(
    deps: &PipelineDeps,
    transcript_id: &str,
    topics: &[Topic],
) -> Result<String> {
    if topics.is_empty() {
        tracing::warn!(transcript_id = %transcript_id, "no topics for title generation");
        return Ok(String::new());
    }

    let out: TitleOut = deps
        .llm
        .structured(&title_template(), &topics_corpus(topics))
        .await?;
    let title = ensure_casing(&trim_title(&out.title));

    deps.stores.transcripts.set_title(transcript_id, &title)?;
    deps.broadcaster
        .emit(
            transcript_id,
            TranscriptEvent::new(EventKind::FinalTitle, serde_json::json!({ "title": title })),
        )
        .await?;

    Ok(title)
}

/// Short and long summaries.
///
/// The corpus first goes through the chunked subject extraction so that
/// arbitrarily long meetings stay inside the model's context budget; the
/// summary call itself then works from the consolidated subjects plus the
/// topic notes.
pub async fn run_summaries(
    deps: &PipelineDeps,
    transcript_id: &str,
    topics: &[Topic],
) -> Result<(String, String)> {
    if topics.is_empty() {
        tracing::warn!(transcript_id = %transcript_id, "no topics for summary generation");
        return Ok((String::new(), String::new()));
    }

    let corpus = topics_corpus(topics);
    let subjects = deps
        .llm
        .process_chunked(&subjects_template(), Some(&dedup_template()), &corpus)
        .await?;

    let body = format!("Subjects:\n- {}\n\nTopic notes:\n{}", subjects.join("\n- "), corpus);
    let out: SummaryOut = deps.llm.structured(&summary_template(), &body).await?;

    deps.stores
        .transcripts
        .set_summaries(transcript_id, &out.short_summary, &out.long_summary)?;
    deps.broadcaster
        .emit(
            transcript_id,
            TranscriptEvent::new(
                EventKind::FinalShortSummary,
                serde_json::json!({ "short_summary": out.short_summary }),
            ),
        )
        .await?;
    deps.broadcaster
        .emit(
            transcript_id,
            TranscriptEvent::new(
                EventKind::FinalLongSummary,
                serde_json::json!({ "long_summary": out.long_summary }),
            ),
        )
        .await?;

    Ok((out.short_summary, out.long_summary))
}
