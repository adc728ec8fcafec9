//! Server bootstrap: construct every component, wire the transition hook,
//! start the background loops, serve.

use std::sync::Arc;

use anyhow::Context;

use rf_broadcast::{EventBroadcaster, MemoryPubSub};
use rf_domain::config::{Config, ConfigSeverity};
use rf_inference::{DiarizationClient, Diarizer, TranscriptionClient};
use rf_llm::{CharTokenizer, Chunker, Coordinator, HttpChatApi};
use rf_pipeline::PipelineDeps;
use rf_storage::S3Storage;
use rf_store::Stores;
use rf_workflow::{Dispatcher, InProcessEngine, WorkflowEngine};

use crate::platform::HttpPlatformClient;
use crate::state::AppState;

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("Reflector gateway starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }
    let config = Arc::new(config);

    // ── Stores ───────────────────────────────────────────────────────
    let stores = Stores::open(&config.state.path).context("opening stores")?;
    tracing::info!(path = %config.state.path.display(), "stores ready");

    // ── Object storage ───────────────────────────────────────────────
    let storage = Arc::new(
        S3Storage::from_config(&config.storage)
            .await
            .context("initializing object storage")?,
    );
    tracing::info!(bucket = %config.storage.bucket, "object storage ready");

    // ── Pub/sub + broadcaster ────────────────────────────────────────
    let pubsub = Arc::new(MemoryPubSub::new());
    let broadcaster = EventBroadcaster::new(stores.transcripts.clone(), pubsub);
    tracing::info!("event broadcaster ready");

    // ── Inference clients ────────────────────────────────────────────
    let stt = Arc::new(
        TranscriptionClient::new(
            &config.transcription.url,
            config.transcription.api_key.clone(),
            &config.transcription.model,
            config.transcription.timeout_secs,
        )
        .context("initializing transcription client")?,
    );
    let diarizer: Option<Arc<dyn Diarizer>> = if config.diarization.url.is_empty() {
        tracing::info!("diarization disabled");
        None
    } else {
        Some(Arc::new(
            DiarizationClient::new(&config.diarization.url, config.diarization.api_key.clone())
                .context("initializing diarization client")?,
        ))
    };

    // ── LLM coordinator ──────────────────────────────────────────────
    let llm = Arc::new(Coordinator {
        api: Arc::new(
            HttpChatApi::new(
                &config.llm.url,
                config.llm.api_key.clone(),
                &config.llm.model,
                config.llm.retry_timeout_secs,
                config.llm.retry_attempts,
            )
            .context("initializing LLM client")?,
        ),
        counter: Box::new(CharTokenizer::default()),
        chunker: Chunker::new(config.llm.max_context_tokens, config.llm.overlap_ratio),
        parse_attempts: config.llm.parse_attempts,
    });
    tracing::info!(model = %config.llm.model, "LLM coordinator ready");

    // ── Workflow engine + pipelines ──────────────────────────────────
    let engine = InProcessEngine::new("inproc");
    let deps = PipelineDeps {
        stores: stores.clone(),
        storage,
        audio: Arc::new(rf_audio::FfmpegMux),
        broadcaster: broadcaster.clone(),
        stt,
        diarizer,
        llm,
        engine_name: engine.name().to_string(),
        language: "en".into(),
    };
    rf_pipeline::register_pipelines(&engine, &deps);

    let hook_deps = deps.clone();
    engine.set_transition_hook(Arc::new(move |details| {
        let deps = hook_deps.clone();
        tokio::spawn(async move {
            rf_pipeline::handle_run_transition(&deps, details).await;
        });
    }));
    tracing::info!("workflow engine ready");

    let dispatcher = Dispatcher::new(
        engine.clone(),
        stores.transcripts.clone(),
        stores.recordings.clone(),
    );

    let state = AppState {
        config: config.clone(),
        stores: stores.clone(),
        broadcaster: broadcaster.clone(),
        dispatcher: dispatcher.clone(),
        engine,
        deps: deps.clone(),
    };

    // ── Background loops ─────────────────────────────────────────────
    if config.platform.url.is_empty() {
        tracing::warn!("no platform API configured; poller and presence loops disabled");
    } else {
        let platform =
            HttpPlatformClient::from_config(&config.platform).context("platform client")?;
        crate::pollers::spawn_all(&config, &stores, &broadcaster, &dispatcher, &deps, platform);
        tracing::info!("background loops started");
    }

    // ── HTTP server ──────────────────────────────────────────────────
    let app = crate::api::router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app).await.context("server error")?;

    stores.flush().context("flushing stores")?;
    Ok(())
}
