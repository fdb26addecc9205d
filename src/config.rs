//! Process configuration loaded from the environment.
//!
//! Every section has a `Default` so tests and dry runs can build a config
//! without touching the environment. `Config::from_env` layers environment
//! variables (and a `.env` file, via `dotenvy`) on top of those defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::automation::CredentialPolicy;
use crate::error::ConfigError;

/// Fallback timezone for schedules that do not name one.
pub const DEFAULT_TIMEZONE: &str = "Asia/Kolkata";

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub storage: StorageConfig,
    pub google: GoogleConfig,
    pub llm: LlmConfig,
    pub automation: AutomationSettings,
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let defaults = Config::default();

        let storage = StorageConfig {
            data_dir: optional_env("AUTOPILOT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage.data_dir),
        };

        let google = GoogleConfig {
            api_base_url: optional_env("GBP_API_BASE_URL").unwrap_or(defaults.google.api_base_url),
            token_url: optional_env("GOOGLE_TOKEN_URL").unwrap_or(defaults.google.token_url),
            client_id: optional_env("GOOGLE_CLIENT_ID"),
            client_secret: optional_env("GOOGLE_CLIENT_SECRET").map(SecretString::from),
        };

        let llm = LlmConfig {
            base_url: optional_env("AZURE_OPENAI_ENDPOINT")
                .or_else(|| optional_env("LLM_BASE_URL"))
                .unwrap_or(defaults.llm.base_url),
            api_key: optional_env("AZURE_OPENAI_API_KEY")
                .or_else(|| optional_env("LLM_API_KEY"))
                .map(SecretString::from),
            model: optional_env("AZURE_OPENAI_DEPLOYMENT")
                .or_else(|| optional_env("LLM_MODEL"))
                .unwrap_or(defaults.llm.model),
            api_version: optional_env("AZURE_OPENAI_API_VERSION"),
            max_tokens: parse_env("LLM_MAX_TOKENS", defaults.llm.max_tokens)?,
            temperature: parse_env("LLM_TEMPERATURE", defaults.llm.temperature)?,
        };

        let automation = AutomationSettings {
            default_timezone: optional_env("AUTOPILOT_DEFAULT_TIMEZONE")
                .unwrap_or(defaults.automation.default_timezone),
            review_poll_interval: Duration::from_secs(parse_env(
                "REVIEW_POLL_INTERVAL_SECS",
                defaults.automation.review_poll_interval.as_secs(),
            )?),
            reply_delay: Duration::from_millis(parse_env(
                "REVIEW_REPLY_DELAY_MS",
                defaults.automation.reply_delay.as_millis() as u64,
            )?),
            request_timeout: nonzero_secs(
                "REMOTE_CALL_TIMEOUT_SECS",
                parse_env(
                    "REMOTE_CALL_TIMEOUT_SECS",
                    defaults.automation.request_timeout.as_secs(),
                )?,
            )?,
            credential_policy: parse_env(
                "CREDENTIAL_POLICY",
                defaults.automation.credential_policy,
            )?,
        };

        let api = ApiConfig {
            port: parse_env("AUTOPILOT_PORT", defaults.api.port)?,
        };

        Ok(Self {
            storage,
            google,
            llm,
            automation,
            api,
        })
    }
}

/// Where persisted state lives.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn replied_reviews_path(&self) -> PathBuf {
        self.data_dir.join("replied_reviews.json")
    }

    pub fn activity_path(&self) -> PathBuf {
        self.data_dir.join("activity.json")
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.data_dir.join("tokens.json")
    }
}

/// Get the default data directory (~/.gbp-autopilot).
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gbp-autopilot")
}

/// Google Business Profile API and OAuth endpoints.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub api_base_url: String,
    pub token_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://mybusiness.googleapis.com/v4".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            client_id: None,
            client_secret: None,
        }
    }
}

/// OpenAI-compatible chat completions endpoint used for content generation.
///
/// When `api_version` is set the base URL is treated as an Azure OpenAI
/// resource and `model` as the deployment name.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub api_version: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            api_version: None,
            max_tokens: 600,
            temperature: 0.8,
        }
    }
}

/// Tunables for scheduling and pipelines.
#[derive(Debug, Clone)]
pub struct AutomationSettings {
    /// Timezone applied to schedules that do not specify one.
    pub default_timezone: String,
    /// Interval between review polls for one location.
    pub review_poll_interval: Duration,
    /// Pause between successive review replies.
    pub reply_delay: Duration,
    /// Upper bound on each remote call.
    pub request_timeout: Duration,
    pub credential_policy: CredentialPolicy,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            default_timezone: DEFAULT_TIMEZONE.to_string(),
            review_poll_interval: Duration::from_secs(10 * 60),
            reply_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(60),
            credential_policy: CredentialPolicy::AnyCredentialFallback,
        }
    }
}

/// HTTP surface settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 5000 }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn nonzero_secs(key: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
