//! Transcription service client.

use serde::{Deserialize, Serialize};

use rf_domain::transcript::Word;
use rf_domain::{Backoff, Error, Result};

use crate::{from_reqwest, map_status, retry_transient};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
struct FromUrlRequest<'a> {
    audio_file_url: &'a str,
    model: &'a str,
    language: &'a str,
    timestamp_offset: f64,
}

/// One transcribed file. `filename` is only present on multipart responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionResult {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub words: Vec<Word>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    results: Vec<TranscriptionResult>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client for the remote transcription service.
pub struct TranscriptionClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    backoff: Backoff,
    client: reqwest::Client,
}

impl TranscriptionClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            backoff: Backoff::default(),
            client,
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    /// Transcribe a remote file by presigned URL.
    ///
    /// `timestamp_offset` is added by the service to every word timestamp,
    /// so chunked callers can keep one shared clock.
    pub async fn transcribe_url(
        &self,
        audio_file_url: &str,
        language: &str,
        timestamp_offset: f64,
    ) -> Result<TranscriptionResult> {
        let url = format!("{}/v1/audio/transcriptions-from-url", self.base_url);

        retry_transient(&self.backoff, || async {
            tracing::debug!(url = %url, language = %language, "transcription request");
            let resp = self
                .authed(self.client.post(&url))
                .json(&FromUrlRequest {
                    audio_file_url,
                    model: &self.model,
                    language,
                    timestamp_offset,
                })
                .send()
                .await
                .map_err(from_reqwest)?;

            let status = resp.status();
            let body = resp.text().await.map_err(from_reqwest)?;
            if !status.is_success() {
                return Err(map_status("transcription", status.as_u16(), &body));
            }

            serde_json::from_str(&body).map_err(Error::from)
        })
        .await
    }

    /// Transcribe one or many local files through the multipart endpoint.
    ///
    /// With `batch` the service runs batched inference and wraps the
    /// results; a single file comes back as a top-level object either way.
    pub async fn transcribe_files(
        &self,
        files: Vec<(String, Vec<u8>)>,
        language: &str,
        batch: bool,
    ) -> Result<Vec<TranscriptionResult>> {
        if files.is_empty() {
            return Err(Error::Validation("no files to transcribe".into()));
        }
        let url = format!("{}/v1/audio/transcriptions", self.base_url);
        let multi = files.len() > 1;

        retry_transient(&self.backoff, || {
            let files = files.clone();
            let url = url.clone();
            async move {
                let mut form = reqwest::multipart::Form::new()
                    .text("model", self.model.clone())
                    .text("language", language.to_string())
                    .text("batch", batch.to_string());
                for (name, body) in files {
                    form = form.part(
                        "files",
                        reqwest::multipart::Part::bytes(body).file_name(name),
                    );
                }

                let resp = self
                    .authed(self.client.post(&url))
                    .multipart(form)
                    .send()
                    .await
                    .map_err(from_reqwest)?;

                let status = resp.status();
                let body = resp.text().await.map_err(from_reqwest)?;
                if !status.is_success() {
                    return Err(map_status("transcription", status.as_u16(), &body));
                }

                if multi {
                    let batch: BatchResponse = serde_json::from_str(&body)?;
                    Ok(batch.results)
                } else {
                    let single: TranscriptionResult = serde_json::from_str(&body)?;
                    Ok(vec![single])
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::ServerGuard) -> TranscriptionClient {
        TranscriptionClient::new(&server.url(), Some("test-key".into()), "whisper-large-v3", 5)
            .unwrap()
    }

    #[tokio::test]
    async fn transcribe_url_parses_words() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/audio/transcriptions-from-url")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_body(
                r#"{"text": "hello world",
                    "words": [{"word": "hello", "start": 0.0, "end": 0.4},
                              {"word": "world", "start": 0.5, "end": 0.9}]}"#,
            )
            .create_async()
            .await;

        let result = client_for(&server)
            .transcribe_url("https://s/padded_0.webm", "en", 0.0)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.text, "hello world");
        assert_eq!(result.words.len(), 2);
        assert_eq!(result.words[1].text, "world");
    }

    #[tokio::test]
    async fn unsupported_language_is_validation_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/audio/transcriptions-from-url")
            .with_status(400)
            .with_body("unsupported language: xx")
            .expect(1)
            .create_async()
            .await;

        let err = client_for(&server)
            .transcribe_url("https://s/a.webm", "xx", 0.0)
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn batch_response_unwraps_results() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/audio/transcriptions")
            .with_status(200)
            .with_body(
                r#"{"results": [
                    {"text": "a", "words": [], "filename": "a.webm"},
                    {"text": "b", "words": [], "filename": "b.webm"}]}"#,
            )
            .create_async()
            .await;

        let results = client_for(&server)
            .transcribe_files(
                vec![("a.webm".into(), vec![1]), ("b.webm".into(), vec![2])],
                "en",
                true,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].filename.as_deref(), Some("a.webm"));
    }
}
