//! Conferencing-platform REST client.
//!
//! Implements the two seams the reconcilers need: recording discovery and
//! room presence. The platform API is treated as an opaque JSON service
//! with bearer auth.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use rf_domain::config::PlatformConfig;
use rf_domain::{Backoff, Error, Result};
use rf_inference::retry_transient;
use rf_pipeline::presence::{PlatformClient, RoomPresence};
use rf_pipeline::reconcile::{DiscoveredRecording, RecordingSource};

pub struct HttpPlatformClient {
    base_url: String,
    api_key: Option<String>,
    recordings_bucket: String,
    backoff: Backoff,
    client: reqwest::Client,
}

impl HttpPlatformClient {
    pub fn from_config(cfg: &PlatformConfig) -> Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Arc::new(Self {
            base_url: cfg.url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            recordings_bucket: cfg.recordings_bucket.clone(),
            backoff: Backoff::default(),
            client,
        }))
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct RecordingRow {
    id: String,
    room_name: String,
    /// Unix seconds.
    start_ts: i64,
    #[serde(default)]
    s3_key: String,
    #[serde(default)]
    tracks: Vec<TrackRow>,
    #[serde(default)]
    duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TrackRow {
    #[serde(rename = "s3Key")]
    s3_key: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RecordingsPage {
    #[serde(default)]
    data: Vec<RecordingRow>,
}

#[derive(Debug, Deserialize)]
struct PresenceBody {
    #[serde(default)]
    total_count: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Seams
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl RecordingSource for HttpPlatformClient {
    async fn list_recordings(&self, since: DateTime<Utc>) -> Result<Vec<DiscoveredRecording>> {
        let url = format!("{}/recordings", self.base_url);

        let page: RecordingsPage = retry_transient(&self.backoff, || async {
            let resp = self
                .authed(self.client.get(&url))
                .query(&[("since_ts", since.timestamp().to_string())])
                .send()
                .await
                .map_err(|e| Error::Http(e.to_string()))?;
            let status = resp.status();
            let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
            if !status.is_success() {
                return Err(Error::Http(format!("HTTP {} - {}", status.as_u16(), body)));
            }
            serde_json::from_str(&body).map_err(Error::from)
        })
        .await?;

        Ok(page
            .data
            .into_iter()
            .map(|row| {
                let track_keys: Vec<String> = row
                    .tracks
                    .iter()
                    .filter(|t| t.kind.is_empty() || t.kind == "audio")
                    .map(|t| t.s3_key.clone())
                    .collect();
                DiscoveredRecording {
                    id: row.id,
                    room_name: row.room_name,
                    recorded_at: Utc
                        .timestamp_opt(row.start_ts, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                    bucket_name: self.recordings_bucket.clone(),
                    object_key: row.s3_key,
                    track_keys,
                    duration: row.duration,
                }
            })
            .collect())
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn get_room_presence(&self, room_name: &str) -> Result<RoomPresence> {
        let url = format!("{}/rooms/{room_name}/presence", self.base_url);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Http(format!("HTTP {} - {}", status.as_u16(), body)));
        }
        let parsed: PresenceBody = serde_json::from_str(&body)?;
        Ok(RoomPresence {
            total_count: parsed.total_count,
        })
    }

    async fn delete_room(&self, room_name: &str) -> Result<()> {
        let url = format!("{}/rooms/{room_name}", self.base_url);
        let resp = self
            .authed(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        // Deleting a room that is already gone is a success.
        if resp.status().is_success() || resp.status().as_u16() == 404 {
            Ok(())
        } else {
            Err(Error::Http(format!(
                "room deletion failed: HTTP {}",
                resp.status().as_u16()
            )))
        }
    }
}
