//! Shared fixtures for the pipeline integration tests.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use rf_audio::{AudioMux, MixdownOutput};
use rf_broadcast::{EventBroadcaster, MemoryPubSub};
use rf_domain::transcript::{DiarizationSegment, Word};
use rf_domain::Result;
use rf_inference::{Diarizer, SpeechToText, TranscriptionResult};
use rf_llm::{ChatApi, ChatMessage, CharTokenizer, Chunker, Coordinator};
use rf_pipeline::PipelineDeps;
use rf_storage::MemoryStorage;
use rf_store::Stores;
use rf_workflow::{Dispatcher, InProcessEngine, RunStatus, WorkflowEngine};

/// Per-speaker stream offsets used across the multitrack scenarios.
pub const TRACK_STARTS: [f64; 3] = [0.0, 1.203, 0.850];
pub const MIX_DURATION: f64 = 61.203;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stubs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maps track URLs to canned words; real timestamps, no network.
pub struct StubStt;

fn track_index_of(url: &str) -> u32 {
    if url.contains("a.webm") || url.contains("padded_0") {
        0
    } else if url.contains("b.webm") || url.contains("padded_1") {
        1
    } else {
        2
    }
}

#[async_trait]
impl SpeechToText for StubStt {
    async fn transcribe_url(
        &self,
        audio_file_url: &str,
        _language: &str,
        timestamp_offset: f64,
    ) -> Result<TranscriptionResult> {
        let index = track_index_of(audio_file_url);
        let base = TRACK_STARTS[index as usize] + timestamp_offset;
        let words: Vec<Word> = (0..3)
            .map(|i| Word {
                text: format!("track{index}w{i}"),
                start: base + i as f64,
                end: base + i as f64 + 0.4,
                speaker: 0,
            })
            .collect();
        let text = words
            .iter()
            .map(|w| w.text.clone())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(TranscriptionResult {
            text,
            words,
            filename: None,
        })
    }
}

pub struct StubDiarizer;

#[async_trait]
impl Diarizer for StubDiarizer {
    async fn diarize(&self, _url: &str, _timestamp: f64) -> Result<Vec<DiarizationSegment>> {
        Ok(vec![
            DiarizationSegment {
                start: 0.0,
                end: 1.0,
                speaker: 0,
            },
            DiarizationSegment {
                start: 1.0,
                end: 2.5,
                speaker: 1,
            },
            DiarizationSegment {
                start: 2.5,
                end: MIX_DURATION,
                speaker: 2,
            },
        ])
    }
}

/// Routes on prompt keywords so parallel stages stay deterministic.
pub struct StubChat;

#[async_trait]
impl ChatApi for StubChat {
    async fn complete(&self, messages: &[ChatMessage], _json_mode: bool) -> Result<String> {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let response = if prompt.contains("single main topic") {
            r#"{"title": "quarterly budget", "summary": "The team reviewed the budget."}"#
        } else if prompt.contains("distinct subject") {
            r#"["Budget", "Hiring"]"#
        } else if prompt.contains("Merge duplicate") {
            r#"["Budget", "Hiring"]"#
        } else if prompt.contains("meeting title") {
            r#"{"title": "Discussing Budget Review"}"#
        } else if prompt.contains("two summaries") {
            r#"{"short_summary": "Budget review.", "long_summary": "A long discussion about the budget."}"#
        } else {
            r#"{}"#
        };
        Ok(response.to_string())
    }
}

/// In-memory stand-in for the ffmpeg binding.
pub struct StubMux;

#[async_trait]
impl AudioMux for StubMux {
    async fn probe_start_time(&self, input: &str) -> f64 {
        TRACK_STARTS[track_index_of(input) as usize]
    }

    async fn pad_track(&self, _input_url: &str, output: &Path, delay_ms: u64) -> Result<()> {
        tokio::fs::write(output, format!("padded:{delay_ms}")).await?;
        Ok(())
    }

    async fn mixdown(&self, _inputs: &[String], output: &Path) -> Result<MixdownOutput> {
        tokio::fs::write(output, b"mp3-mix").await?;
        Ok(MixdownOutput {
            duration: MIX_DURATION,
            size: 7,
            sample_rate: 48_000,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixture
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Fixture {
    pub engine: Arc<InProcessEngine>,
    pub deps: PipelineDeps,
    pub storage: Arc<MemoryStorage>,
    pub stores: Stores,
    pub broadcaster: EventBroadcaster,
    pub dispatcher: Dispatcher,
    pub _dir: tempfile::TempDir,
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let stores = Stores::open(dir.path()).unwrap();
    let storage = Arc::new(MemoryStorage::new("transcripts"));
    let broadcaster = EventBroadcaster::new(
        stores.transcripts.clone(),
        Arc::new(MemoryPubSub::new()),
    );
    let engine = InProcessEngine::new("inproc");

    let deps = PipelineDeps {
        stores: stores.clone(),
        storage: storage.clone(),
        audio: Arc::new(StubMux),
        broadcaster: broadcaster.clone(),
        stt: Arc::new(StubStt),
        diarizer: Some(Arc::new(StubDiarizer)),
        llm: Arc::new(Coordinator {
            api: Arc::new(StubChat),
            counter: Box::new(CharTokenizer::default()),
            chunker: Chunker::new(8192, 0.15),
            parse_attempts: 3,
        }),
        engine_name: "inproc".into(),
        language: "en".into(),
    };

    rf_pipeline::register_pipelines(&engine, &deps);

    // Publish DAG snapshots and handle terminal failures like production.
    let hook_deps = deps.clone();
    engine.set_transition_hook(Arc::new(move |details| {
        let deps = hook_deps.clone();
        tokio::spawn(async move {
            rf_pipeline::handle_run_transition(&deps, details).await;
        });
    }));

    let dispatcher = Dispatcher::new(
        engine.clone(),
        stores.transcripts.clone(),
        stores.recordings.clone(),
    );

    Fixture {
        engine,
        deps,
        storage,
        stores,
        broadcaster,
        dispatcher,
        _dir: dir,
    }
}

pub async fn wait_terminal(engine: &InProcessEngine, run_id: &str) -> RunStatus {
    for _ in 0..1000 {
        let status = engine.run_status(run_id).await.unwrap();
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("run {run_id} never finished");
}
