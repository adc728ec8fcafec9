//! Remote inference clients.
//!
//! Transcription and diarization run as remote JSON/HTTP services with
//! bearer auth. Inputs are presigned URLs; only transient failures are
//! retried.

mod diarization;
mod retry;
mod transcription;

pub use diarization::{DiarizationClient, DiarizationResponse};
pub use retry::retry_transient;
pub use transcription::{TranscriptionClient, TranscriptionResult};

use async_trait::async_trait;
use rf_domain::transcript::DiarizationSegment;
use rf_domain::{Error, Result};

/// Seam over the transcription service so pipelines can be exercised with
/// stub implementations.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe_url(
        &self,
        audio_file_url: &str,
        language: &str,
        timestamp_offset: f64,
    ) -> Result<TranscriptionResult>;
}

#[async_trait]
impl SpeechToText for TranscriptionClient {
    async fn transcribe_url(
        &self,
        audio_file_url: &str,
        language: &str,
        timestamp_offset: f64,
    ) -> Result<TranscriptionResult> {
        TranscriptionClient::transcribe_url(self, audio_file_url, language, timestamp_offset)
            .await
    }
}

/// Seam over the diarization service.
#[async_trait]
pub trait Diarizer: Send + Sync {
    async fn diarize(
        &self,
        audio_file_url: &str,
        timestamp: f64,
    ) -> Result<Vec<DiarizationSegment>>;
}

#[async_trait]
impl Diarizer for DiarizationClient {
    async fn diarize(
        &self,
        audio_file_url: &str,
        timestamp: f64,
    ) -> Result<Vec<DiarizationSegment>> {
        DiarizationClient::diarize(self, audio_file_url, timestamp).await
    }
}

/// Convert a [`reqwest::Error`] into the domain error type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Map a non-success inference response to the error taxonomy.
///
/// 400 means the request itself is wrong (unsupported language on a
/// language-constrained model); 401 is an auth failure; both are final.
/// Everything else keeps the status code in the message so the transient
/// classifier can see 5xx/429.
pub(crate) fn map_status(service: &str, status: u16, body: &str) -> Error {
    match status {
        400 => Error::Validation(format!("{service}: {body}")),
        401 => Error::Auth(format!("{service}: invalid API key")),
        _ => Error::Inference {
            service: service.to_string(),
            message: format!("HTTP {status} - {body}"),
        },
    }
}
