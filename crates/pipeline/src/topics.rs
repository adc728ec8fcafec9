//! Topic detection over fixed-size word chunks.

use serde::Deserialize;

use rf_domain::transcript::{EventKind, SpeechText, Topic, TranscriptEvent, Word};
use rf_domain::Result;
use rf_llm::{ensure_casing, trim_title, PromptTemplate};

use crate::PipelineDeps;

/// Words per topic-detection chunk.
pub const WORDS_PER_CHUNK: usize = 300;

#[derive(Debug, Deserialize)]
struct TopicOut {
    title: String,
    summary: String,
}

fn topic_template() -> PromptTemplate {
    PromptTemplate::new(
        "You analyze meeting transcripts. Answer with JSON only.",
        "Identify the single main topic of this transcript segment. \
         Respond as {\"title\": \"...\", \"summary\": \"...\"} where the \
         summary is one or two sentences.",
    )
}

/// Turn a word run into speaker-attributed lines for prompting.
pub fn render_speaker_lines(words: &[Word]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current_speaker: Option<u32> = None;

    for word in words {
        if current_speaker != Some(word.speaker) {
            lines.push(format!("Speaker {}: {}", word.speaker, word.text.trim()));
            current_speaker = Some(word.speaker);
        } else if let Some(last) = lines.last_mut() {
            last.push(' ');
            last.push_str(word.text.trim());
        }
    }

    lines.join("\n")
}

/// Detect topics chunk by chunk, in order, emitting a TOPIC event each.
pub async fn run_detect_topics(
    deps: &PipelineDeps,
    transcript_id: &str,
    words: &[Word],
) -> Result<Vec<Topic>> {
    let template = topic_template();
    let mut topics = Vec::new();

    for chunk in words.chunks(WORDS_PER_CHUNK) {
        if chunk.is_empty() {
            continue;
        }
        let body = render_speaker_lines(chunk);
        let out: TopicOut = deps.llm.structured(&template, &body).await?;

        let first = &chunk[0];
        let last = &chunk[chunk.len() - 1];
        let topic = Topic {
            id: uuid::Uuid::new_v4().to_string(),
            title: ensure_casing(&trim_title(&out.title)),
            summary: out.summary,
            timestamp: first.start,
            duration: (last.end - first.start).max(0.0),
            transcript: SpeechText::from_words(chunk.to_vec()),
        };

        deps.stores.transcripts.add_topic(transcript_id, topic.clone())?;
        deps.broadcaster
            .emit(
                transcript_id,
                TranscriptEvent::new(EventKind::Topic, serde_json::to_value(&topic)?),
            )
            .await?;

        topics.push(topic);
    }

    tracing::info!(
        transcript_id = %transcript_id,
        topics = topics.len(),
        "topic detection complete"
    );
    Ok(topics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, speaker: u32) -> Word {
        Word {
            text: text.into(),
            start: 0.0,
            end: 0.1,
            speaker,
        }
    }

    #[test]
    fn speaker_lines_group_consecutive_words() {
        let words = vec![
            word("hello", 0),
            word("there", 0),
            word("hi", 1),
            word("back", 0),
        ];
        let rendered = render_speaker_lines(&words);
        assert_eq!(
            rendered,
            "Speaker 0: hello there\nSpeaker 1: hi\nSpeaker 0: back"
        );
    }

    #[test]
    fn empty_words_render_empty() {
        assert_eq!(render_speaker_lines(&[]), "");
    }
}
