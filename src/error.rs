//! Error types for the automation engine.

use std::time::Duration;

/// Errors raised while loading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Errors from the JSON-backed stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt store file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors that can occur while compiling a posting schedule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Unsupported frequency '{0}'")]
    UnsupportedFrequency(String),

    #[error("Custom frequency requires at least one entry in customTimes")]
    MissingCustomTimes,

    #[error("Invalid time of day '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    Cron { expression: String, reason: String },
}

/// Errors from the content generation provider.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The provider has no usable credentials or endpoint.
    #[error("Content generator not configured: {0}")]
    NotConfigured(String),

    #[error("Content generation request failed: {0}")]
    RequestFailed(String),

    #[error("Content generator rate limited, retry after {0:?}")]
    RateLimited(Option<Duration>),

    #[error("Content generator returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Content generator returned no text")]
    EmptyResponse,
}

/// Errors from the Business Profile API.
#[derive(Debug, thiserror::Error)]
pub enum RemoteApiError {
    #[error("Business Profile API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Business Profile API request failed: {0}")]
    Transport(String),

    #[error("Business Profile API returned an unreadable body: {0}")]
    Decode(String),
}

impl RemoteApiError {
    /// HTTP status of the failure, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors from the credential store.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Token refresh failed for {user_id}: {reason}")]
    RefreshFailed { user_id: String, reason: String },

    #[error("OAuth client credentials are not configured")]
    ClientNotConfigured,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Top-level error for automation runs and runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    /// A collaborator is missing credentials or settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No usable credential for the location's user (or any user, under fallback).
    #[error("Authentication required for user '{user_id}'")]
    AuthenticationRequired {
        user_id: String,
        fallback_attempted: bool,
    },

    #[error(transparent)]
    RemoteApi(#[from] RemoteApiError),

    #[error("Content generation failed: {0}")]
    ContentGeneration(String),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("No automation settings for location {0}")]
    NotConfigured(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

impl AutomationError {
    /// True when the caller should re-authenticate rather than retry.
    pub fn requires_auth(&self) -> bool {
        matches!(self, Self::AuthenticationRequired { .. })
    }

    /// Short machine-readable reason stored in activity details.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::AuthenticationRequired { .. } => "authentication_required",
            Self::RemoteApi(_) => "remote_api_error",
            Self::ContentGeneration(_) => "system_error",
            Self::Schedule(_) => "schedule_error",
            Self::Storage(_) => "storage_error",
            Self::NotConfigured(_) => "not_configured",
            Self::Timeout { .. } => "timeout",
        }
    }
}

impl From<GenerationError> for AutomationError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::NotConfigured(reason) => AutomationError::Configuration(reason),
            other => AutomationError::ContentGeneration(other.to_string()),
        }
    }
}

/// Result type for automation operations.
pub type Result<T> = std::result::Result<T, AutomationError>;
