/// Shared error type used across all Reflector crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Access denied or missing bucket on the object store. Never retried.
    #[error("storage permission: {operation} on bucket {bucket}: {message}")]
    StoragePermission {
        bucket: String,
        operation: String,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input (empty track keys, missing bucket, schema violation).
    /// Never retried.
    #[error("validation: {0}")]
    Validation(String),

    /// A stage produced no output where one is required. Fatal to the
    /// workflow run.
    #[error("protocol: {0}")]
    Protocol(String),

    #[error("inference {service}: {message}")]
    Inference { service: String, message: String },

    #[error("LLM: {0}")]
    Llm(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a retry at the component boundary can reasonably succeed.
    ///
    /// Covers timeouts, connection errors, and 5xx/429 responses surfaced by
    /// the HTTP clients. Permission, validation, and protocol errors are
    /// final.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Io(_) => true,
            Error::Http(msg) => is_transient_http(msg),
            Error::Inference { message, .. } => is_transient_http(message),
            Error::Llm(msg) => is_transient_http(msg),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// HTTP client errors carry the status code in their message; anything in
/// the 5xx range, 429, or a transport-level failure is worth retrying.
fn is_transient_http(message: &str) -> bool {
    if message.contains("429") {
        return true;
    }
    for code in 500..=599 {
        if message.contains(&code.to_string()) {
            return true;
        }
    }
    message.contains("connect") || message.contains("timed out") || message.contains("reset")
}
