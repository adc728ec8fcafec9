//! Chat-completion client and the structured-output call loop.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use rf_domain::{Backoff, Error, Result};
use rf_inference::retry_transient;

use crate::extract::extract_json;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// API seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The remote chat-completion surface. Implemented over HTTP in
/// production; tests substitute canned responders.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], json_mode: bool) -> Result<String>;
}

/// OpenAI-compatible chat completions over HTTP with bearer auth.
pub struct HttpChatApi {
    base_url: String,
    api_key: Option<String>,
    model: String,
    backoff: Backoff,
    client: reqwest::Client,
}

impl HttpChatApi {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        timeout_secs: u64,
        retry_attempts: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            backoff: Backoff {
                max_attempts: retry_attempts.max(1),
                ..Backoff::default()
            },
            client,
        })
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn complete(&self, messages: &[ChatMessage], json_mode: bool) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        retry_transient(&self.backoff, || async {
            tracing::debug!(url = %url, "chat completion request");
            let mut builder = self.client.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                builder = builder.header("Authorization", format!("Bearer {key}"));
            }

            let resp = builder
                .send()
                .await
                .map_err(|e| Error::Llm(e.to_string()))?;
            let status = resp.status();
            let text = resp
                .text()
                .await
                .map_err(|e| Error::Llm(e.to_string()))?;
            if !status.is_success() {
                return Err(Error::Llm(format!("HTTP {} - {}", status.as_u16(), text)));
            }

            let parsed: Value = serde_json::from_str(&text)?;
            let content = parsed
                .get("choices")
                .and_then(|c| c.as_array())
                .and_then(|a| a.first())
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::Llm("no content in completion response".into()))?;
            Ok(content.to_string())
        })
        .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Structured-output loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Calls the model until the output deserializes, feeding each parse or
/// validation failure back into the conversation.
pub struct StructuredCaller<'a> {
    api: &'a dyn ChatApi,
    parse_attempts: u32,
}

impl<'a> StructuredCaller<'a> {
    pub fn new(api: &'a dyn ChatApi, parse_attempts: u32) -> Self {
        Self {
            api,
            parse_attempts: parse_attempts.max(1),
        }
    }

    pub async fn call<T: DeserializeOwned>(&self, messages: &[ChatMessage]) -> Result<T> {
        let mut conversation = messages.to_vec();
        let mut last_error = Error::Llm("structured call produced no attempts".into());

        for attempt in 0..self.parse_attempts {
            let raw = self.api.complete(&conversation, true).await?;

            match extract_json(&raw).and_then(|value| {
                serde_json::from_value::<T>(value)
                    .map_err(|e| Error::Llm(format!("schema mismatch: {e}")))
            }) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "structured output rejected");
                    conversation.push(ChatMessage {
                        role: "assistant".into(),
                        content: raw,
                    });
                    conversation.push(ChatMessage::user(&format!(
                        "The previous response was invalid: {e}. \
                         Respond again with valid JSON only."
                    )));
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedApi {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedApi {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl ChatApi for ScriptedApi {
        async fn complete(&self, _messages: &[ChatMessage], _json: bool) -> Result<String> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| Error::Llm("script exhausted".into()))
        }
    }

    #[tokio::test]
    async fn parses_on_first_attempt() {
        let api = ScriptedApi::new(vec![r#"["budget", "hiring"]"#]);
        let caller = StructuredCaller::new(&api, 3);
        let subjects: Vec<String> = caller.call(&[ChatMessage::user("go")]).await.unwrap();
        assert_eq!(subjects, vec!["budget", "hiring"]);
    }

    #[tokio::test]
    async fn retries_with_error_feedback() {
        let api = ScriptedApi::new(vec!["not json at all", r#"["fixed"]"#]);
        let caller = StructuredCaller::new(&api, 3);
        let subjects: Vec<String> = caller.call(&[ChatMessage::user("go")]).await.unwrap();
        assert_eq!(subjects, vec!["fixed"]);
    }

    #[tokio::test]
    async fn exhausts_parse_attempts() {
        let api = ScriptedApi::new(vec!["bad", "also bad"]);
        let caller = StructuredCaller::new(&api, 2);
        let result: Result<Vec<String>> = caller.call(&[ChatMessage::user("go")]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fenced_output_is_accepted() {
        let api = ScriptedApi::new(vec!["```json\n[\"a\"]\n```"]);
        let caller = StructuredCaller::new(&api, 1);
        let subjects: Vec<String> = caller.call(&[ChatMessage::user("go")]).await.unwrap();
        assert_eq!(subjects, vec!["a"]);
    }
}
