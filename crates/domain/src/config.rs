//! Configuration tree.
//!
//! Loaded from a TOML file with environment overrides layered on top.
//! `Config::validate()` returns a list of issues with severities; the
//! gateway refuses to start when any error-level issue is present.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub diarization: DiarizationConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_1250")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 1250,
            host: "127.0.0.1".into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding store snapshots and scratch space.
    #[serde(default = "d_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: d_state_path(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Object storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Credentials are either an access-key pair or a role ARN, never both.
/// When `endpoint_url` is set (S3-compatible stores) the client switches to
/// path-style addressing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "d_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub role_arn: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inference services
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_whisper")]
    pub model: String,
    #[serde(default = "d_600")]
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            model: d_whisper(),
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiarizationConfig {
    /// Empty URL disables diarization; assembly then keeps track-index
    /// speakers.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_8192")]
    pub max_context_tokens: usize,
    /// Fraction of a chunk shared with its neighbors (0 ≤ r < 0.5).
    #[serde(default = "d_overlap")]
    pub overlap_ratio: f64,
    #[serde(default = "d_3")]
    pub retry_attempts: u32,
    #[serde(default = "d_120")]
    pub retry_timeout_secs: u64,
    #[serde(default = "d_3")]
    pub parse_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            model: d_model(),
            max_context_tokens: 8192,
            overlap_ratio: 0.15,
            retry_attempts: 3,
            retry_timeout_secs: 120,
            parse_attempts: 3,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Presence / retention / polling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// TTL of a pending-join reservation, seconds.
    #[serde(default = "d_60")]
    pub join_grace_seconds: u64,
    #[serde(default = "d_30")]
    pub reconcile_interval_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            join_grace_seconds: 60,
            reconcile_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Public deployments sweep anonymous transcripts after this many days.
    #[serde(default)]
    pub public_mode: bool,
    #[serde(default = "d_7")]
    pub public_data_retention_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            public_mode: false,
            public_data_retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// How far back the recording poller looks, hours.
    #[serde(default = "d_24h")]
    pub recording_lookback_hours: u32,
    #[serde(default = "d_300")]
    pub recording_interval_secs: u64,
    /// Half-width of the time window used to match a recording to a
    /// meeting by room name, hours.
    #[serde(default = "d_168")]
    pub match_window_hours: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            recording_lookback_hours: 24,
            recording_interval_secs: 300,
            match_window_hours: 168,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conferencing platform
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The recorder platform's REST API. Empty URL disables the recording
/// poller and presence reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlatformConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Bucket the platform writes raw tracks into.
    #[serde(default)]
    pub recordings_bucket: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sev = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{sev}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&std::path::Path>) -> crate::Result<Self> {
        let mut config: Config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw)
                    .map_err(|e| crate::Error::Validation(format!("config parse: {e}")))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment contract: deployment credentials and flags are injected
    /// via env, everything structural stays in the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PUBLIC_MODE") {
            self.retention.public_mode = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("PUBLIC_DATA_RETENTION_DAYS") {
            if let Ok(days) = v.parse() {
                self.retention.public_data_retention_days = days;
            }
        }
        if let Ok(v) = std::env::var("LLM_URL") {
            self.llm.url = v;
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_RETRY_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                self.llm.retry_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("LLM_RETRY_TIMEOUT") {
            if let Ok(n) = v.parse() {
                self.llm.retry_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("TRANSCRIPTION_URL") {
            self.transcription.url = v;
        }
        if let Ok(v) = std::env::var("TRANSCRIPTION_API_KEY") {
            self.transcription.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("DIARIZATION_URL") {
            self.diarization.url = v;
        }
        if let Ok(v) = std::env::var("DIARIZATION_API_KEY") {
            self.diarization.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("STORAGE_BUCKET") {
            self.storage.bucket = v;
        }
        if let Ok(v) = std::env::var("STORAGE_ACCESS_KEY_ID") {
            self.storage.access_key_id = Some(v);
        }
        if let Ok(v) = std::env::var("STORAGE_SECRET_ACCESS_KEY") {
            self.storage.secret_access_key = Some(v);
        }
        if let Ok(v) = std::env::var("STORAGE_ROLE_ARN") {
            self.storage.role_arn = Some(v);
        }
        if let Ok(v) = std::env::var("STORAGE_ENDPOINT_URL") {
            self.storage.endpoint_url = Some(v);
        }
        if let Ok(v) = std::env::var("PLATFORM_URL") {
            self.platform.url = v;
        }
        if let Ok(v) = std::env::var("PLATFORM_API_KEY") {
            self.platform.api_key = Some(v);
        }
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        // Credentials: access-key pair XOR role ARN.
        let has_pair =
            self.storage.access_key_id.is_some() || self.storage.secret_access_key.is_some();
        if has_pair && self.storage.role_arn.is_some() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "storage".into(),
                message: "configure either an access-key pair or a role ARN, not both".into(),
            });
        }
        if self.storage.access_key_id.is_some() != self.storage.secret_access_key.is_some() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "storage".into(),
                message: "access_key_id and secret_access_key must be set together".into(),
            });
        }
        if self.storage.bucket.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "storage.bucket".into(),
                message: "no default bucket configured".into(),
            });
        }

        for (field, url) in [
            ("transcription.url", &self.transcription.url),
            ("llm.url", &self.llm.url),
        ] {
            if url.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: field.into(),
                    message: "service URL not configured; dependent stages will fail".into(),
                });
            } else if !url.starts_with("http://") && !url.starts_with("https://") {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: field.into(),
                    message: format!("must start with http:// or https:// (got \"{url}\")"),
                });
            }
        }

        if !(0.0..0.5).contains(&self.llm.overlap_ratio) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "llm.overlap_ratio".into(),
                message: "must be in [0, 0.5)".into(),
            });
        }

        if self.llm.max_context_tokens < 512 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "llm.max_context_tokens".into(),
                message: "context window too small to fit any template".into(),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// serde defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_1250() -> u16 {
    1250
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_region() -> String {
    "us-east-1".into()
}
fn d_whisper() -> String {
    "whisper-large-v3".into()
}
fn d_model() -> String {
    "gpt-4o-mini".into()
}
fn d_overlap() -> f64 {
    0.15
}
fn d_8192() -> usize {
    8192
}
fn d_600() -> u64 {
    600
}
fn d_120() -> u64 {
    120
}
fn d_300() -> u64 {
    300
}
fn d_60() -> u64 {
    60
}
fn d_30() -> u64 {
    30
}
fn d_3() -> u32 {
    3
}
fn d_7() -> u32 {
    7
}
fn d_24h() -> u32 {
    24
}
fn d_168() -> u32 {
    168
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_with_warnings_only() {
        let config = Config::default();
        let issues = config.validate();
        assert!(issues
            .iter()
            .all(|i| i.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn pair_and_role_is_an_error() {
        let mut config = Config::default();
        config.storage.access_key_id = Some("AK".into());
        config.storage.secret_access_key = Some("SK".into());
        config.storage.role_arn = Some("arn:aws:iam::1:role/x".into());
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "storage"));
    }

    #[test]
    fn half_pair_is_an_error() {
        let mut config = Config::default();
        config.storage.access_key_id = Some("AK".into());
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.message.contains("together")));
    }

    #[test]
    fn overlap_ratio_bounds() {
        let mut config = Config::default();
        config.llm.overlap_ratio = 0.5;
        assert!(config
            .validate()
            .iter()
            .any(|i| i.field == "llm.overlap_ratio"));
    }

    #[test]
    fn parses_minimal_toml() {
        let raw = r#"
            [server]
            port = 9000

            [storage]
            bucket = "recordings"

            [llm]
            url = "https://llm.internal/v1"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.bucket, "recordings");
        assert_eq!(config.llm.max_context_tokens, 8192);
    }
}
