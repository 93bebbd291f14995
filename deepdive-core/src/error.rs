//! Error types for the Deepdive research core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the language model, the search provider, the job lifecycle,
//! configuration, and report storage.

use std::path::PathBuf;
use std::time::Duration;

use crate::research::job::JobState;

/// Top-level error type for the Deepdive core library.
#[derive(Debug, thiserror::Error)]
pub enum DeepdiveError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from language-model provider interactions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Context window exceeded: used {used} of {limit} tokens")]
    ContextOverflow { used: usize, limit: usize },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

impl LlmError {
    /// Whether the failure is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Timeout { .. } | LlmError::Connection { .. }
        )
    }

    /// Minimum wait the provider asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

/// Errors from the external search/content provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} request failed: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} request timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} response could not be parsed: {message}")]
    Parse { provider: String, message: String },

    #[error("Environment variable not set: {var}")]
    MissingApiKey { var: String },
}

impl ProviderError {
    /// Transport and availability failures are retryable; definitive
    /// client errors (bad request, auth, malformed body) are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport { .. } | ProviderError::Timeout { .. } => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Parse { .. } | ProviderError::MissingApiKey { .. } => false,
        }
    }
}

/// A language-model reply that did not decode into the expected structured
/// decision. Every decoder that produces this has a fallback; it is never
/// surfaced to callers of the job API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Judgment could not be parsed: {message}")]
pub struct JudgmentParseError {
    pub message: String,
}

impl JudgmentParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors from the research job lifecycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    #[error("A research job is already active (state: {state})")]
    AlreadyActive { state: JobState },

    #[error("No clarification is pending (state: {state})")]
    NotClarifying { state: JobState },

    #[error("Job cannot be reset while {state}")]
    NotTerminal { state: JobState },

    #[error("No research query was provided")]
    EmptyQuery,

    #[error("Research job was canceled")]
    Canceled,
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from report persistence.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to write report to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Report store unavailable: {message}")]
    Unavailable { message: String },
}

/// A type alias for results using the top-level `DeepdiveError`.
pub type Result<T> = std::result::Result<T, DeepdiveError>;
