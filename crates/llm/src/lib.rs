//! LLM coordination layer.
//!
//! Template-aware chunking under strict token budgets, structured-output
//! calls with a validation-retry loop, deduplication across chunk outputs,
//! and the title post-processing fallbacks.

mod chunker;
mod client;
mod extract;
mod title;
mod tokens;

pub use chunker::{find_natural_split_point, ChunkPlan, Chunker};
pub use client::{ChatApi, ChatMessage, HttpChatApi, StructuredCaller};
pub use extract::extract_json;
pub use title::{ensure_casing, trim_title};
pub use tokens::{CharTokenizer, TokenCounter};

use serde::de::DeserializeOwned;

use rf_domain::Result;

/// A prompt template measured for overhead before any content is inserted.
///
/// `render(body)` produces the user prompt; the system prompt rides along
/// unchanged. Token accounting always measures the full rendered pair.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub system: String,
    pub instruct: String,
}

impl PromptTemplate {
    pub fn new(system: &str, instruct: &str) -> Self {
        Self {
            system: system.to_string(),
            instruct: instruct.to_string(),
        }
    }

    /// The user prompt for a given body of text.
    pub fn render(&self, body: &str) -> String {
        format!("{}\n\n{}", self.instruct, body)
    }

    pub fn messages(&self, body: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(&self.system),
            ChatMessage::user(&self.render(body)),
        ]
    }

    /// Tokens consumed by the template alone (empty body).
    pub fn overhead_tokens(&self, counter: &dyn TokenCounter) -> usize {
        counter.count(&self.system) + counter.count(&self.render(""))
    }
}

/// Coordinator facade: chunk a corpus under the template budget, run every
/// chunk in parallel, merge the subject lists.
pub struct Coordinator {
    pub api: std::sync::Arc<dyn ChatApi>,
    pub counter: Box<dyn TokenCounter>,
    pub chunker: Chunker,
    pub parse_attempts: u32,
}

impl Coordinator {
    /// Run a structured call over the whole corpus, chunking when it does
    /// not fit. Returns the merged list of subjects.
    ///
    /// Chunk failures are logged and skipped; with more than one chunk and
    /// more than three subjects a dedup pass runs through the model,
    /// falling back to order-preserving dedup on any failure.
    pub async fn process_chunked(
        &self,
        template: &PromptTemplate,
        dedup_template: Option<&PromptTemplate>,
        corpus: &str,
    ) -> Result<Vec<String>> {
        if corpus.trim().is_empty() {
            return Ok(Vec::new());
        }

        let plan = self
            .chunker
            .plan(corpus, template, self.counter.as_ref())?;
        let caller = StructuredCaller::new(self.api.as_ref(), self.parse_attempts);

        let futures = plan.chunks.iter().enumerate().map(|(i, chunk)| {
            let caller = &caller;
            async move {
                let result: Result<Vec<String>> =
                    caller.call(&template.messages(chunk)).await;
                (i, result)
            }
        });

        let mut subjects: Vec<String> = Vec::new();
        for (i, result) in futures_util::future::join_all(futures).await {
            match result {
                Ok(list) => subjects.extend(list),
                Err(e) => {
                    tracing::error!(chunk = i, error = %e, "chunk failed, skipping");
                }
            }
        }

        tracing::info!(
            chunks = plan.chunks.len(),
            subjects = subjects.len(),
            "collected subjects from chunks"
        );

        if plan.chunks.len() > 1 && subjects.len() > 3 {
            if let Some(dedup) = dedup_template {
                match self.dedup_pass(dedup, &subjects, &caller).await {
                    Ok(consolidated) => return Ok(consolidated),
                    Err(e) => {
                        tracing::error!(error = %e, "dedup pass failed, using basic dedup");
                    }
                }
            }
        }

        Ok(dedup_preserving_order(subjects))
    }

    async fn dedup_pass(
        &self,
        template: &PromptTemplate,
        subjects: &[String],
        caller: &StructuredCaller<'_>,
    ) -> Result<Vec<String>> {
        let listing = subjects
            .iter()
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n");
        let consolidated: Vec<String> = caller.call(&template.messages(&listing)).await?;
        tracing::info!(
            before = subjects.len(),
            after = consolidated.len(),
            "consolidated subjects"
        );
        Ok(consolidated)
    }

    /// One structured call with no chunking.
    pub async fn structured<T: DeserializeOwned>(
        &self,
        template: &PromptTemplate,
        body: &str,
    ) -> Result<T> {
        StructuredCaller::new(self.api.as_ref(), self.parse_attempts)
            .call(&template.messages(body))
            .await
    }
}

/// Order-preserving exact dedup.
pub fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
