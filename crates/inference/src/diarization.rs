//! Diarization service client.

use serde::{Deserialize, Serialize};

use rf_domain::transcript::DiarizationSegment;
use rf_domain::{Backoff, Error, Result};

use crate::{from_reqwest, map_status, retry_transient};

#[derive(Debug, Serialize)]
struct DiarizeRequest<'a> {
    audio_file_url: &'a str,
    timestamp: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiarizationResponse {
    #[serde(default)]
    pub diarization: Vec<DiarizationSegment>,
}

/// Client for the remote diarization service.
pub struct DiarizationClient {
    base_url: String,
    api_key: Option<String>,
    backoff: Backoff,
    client: reqwest::Client,
}

impl DiarizationClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            backoff: Backoff::default(),
            client,
        })
    }

    /// Diarize a remote file. `timestamp` shifts every returned segment,
    /// mirroring the transcription offset contract.
    pub async fn diarize(
        &self,
        audio_file_url: &str,
        timestamp: f64,
    ) -> Result<Vec<DiarizationSegment>> {
        let url = format!("{}/diarize", self.base_url);

        let response: DiarizationResponse = retry_transient(&self.backoff, || async {
            tracing::debug!(url = %url, "diarization request");
            let mut builder = self.client.post(&url).json(&DiarizeRequest {
                audio_file_url,
                timestamp,
            });
            if let Some(key) = &self.api_key {
                builder = builder.header("Authorization", format!("Bearer {key}"));
            }

            let resp = builder.send().await.map_err(from_reqwest)?;
            let status = resp.status();
            let body = resp.text().await.map_err(from_reqwest)?;
            if !status.is_success() {
                return Err(map_status("diarization", status.as_u16(), &body));
            }

            serde_json::from_str(&body).map_err(Error::from)
        })
        .await?;

        Ok(response.diarization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn diarize_parses_segments() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/diarize")
            .with_status(200)
            .with_body(
                r#"{"diarization": [
                    {"start": 0.0, "end": 4.2, "speaker": 0},
                    {"start": 4.2, "end": 9.0, "speaker": 1}]}"#,
            )
            .create_async()
            .await;

        let client = DiarizationClient::new(&server.url(), None).unwrap();
        let segments = client.diarize("https://s/audio.mp3", 0.0).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].speaker, 1);
    }

    #[tokio::test]
    async fn auth_failure_bubbles() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/diarize")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let client = DiarizationClient::new(&server.url(), Some("bad".into())).unwrap();
        let err = client.diarize("https://s/audio.mp3", 0.0).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }
}
