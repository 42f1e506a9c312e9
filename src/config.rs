//! Configuration types.
//!
//! Every component takes its config struct by value in its constructor.
//! `from_env()` constructors read the process environment once at startup.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use uuid::Uuid;

use crate::accounts::Provider;
use crate::error::ConfigError;

/// Default timeout for any single provider HTTP call.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// OAuth client registration for one provider.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    /// Absent for public clients.
    pub client_secret: Option<SecretString>,
    pub token_url: String,
    /// Endpoint that reports the mailbox's primary address.
    pub profile_url: String,
    pub scopes: Vec<String>,
    pub request_timeout: Duration,
}

impl OAuthClientConfig {
    /// Google endpoints with the given client registration.
    pub fn google(client_id: impl Into<String>, client_secret: Option<SecretString>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            profile_url: "https://gmail.googleapis.com/gmail/v1/users/me/profile".to_string(),
            scopes: vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()],
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Microsoft identity platform endpoints for `tenant` (usually `common`).
    pub fn microsoft(
        client_id: impl Into<String>,
        client_secret: Option<SecretString>,
        tenant: &str,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            token_url: format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token"),
            profile_url: "https://graph.microsoft.com/v1.0/me".to_string(),
            scopes: vec![
                "offline_access".to_string(),
                "User.Read".to_string(),
                "Mail.Read".to_string(),
            ],
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Returns `None` when `GOOGLE_CLIENT_ID` is unset.
    pub fn google_from_env() -> Option<Self> {
        let client_id = std::env::var("GOOGLE_CLIENT_ID").ok()?;
        let secret = std::env::var("GOOGLE_CLIENT_SECRET")
            .ok()
            .map(SecretString::from);
        Some(Self::google(client_id, secret))
    }

    /// Returns `None` when `MICROSOFT_CLIENT_ID` is unset.
    pub fn microsoft_from_env() -> Option<Self> {
        let client_id = std::env::var("MICROSOFT_CLIENT_ID").ok()?;
        let secret = std::env::var("MICROSOFT_CLIENT_SECRET")
            .ok()
            .map(SecretString::from);
        let tenant = std::env::var("MICROSOFT_TENANT").unwrap_or_else(|_| "common".to_string());
        Some(Self::microsoft(client_id, secret, &tenant))
    }

    /// Point both endpoints at another host (mock servers, sovereign clouds).
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.token_url = format!("{base}/token");
        self.profile_url = format!("{base}/profile");
        self
    }
}

/// Provider mail API endpoint settings.
#[derive(Debug, Clone)]
pub struct MailApiConfig {
    pub base_url: String,
    /// Messages requested per list page.
    pub page_size: usize,
    pub request_timeout: Duration,
}

impl MailApiConfig {
    pub fn for_provider(provider: Provider) -> Self {
        let base_url = match provider {
            Provider::Gmail => "https://gmail.googleapis.com",
            Provider::Outlook => "https://graph.microsoft.com",
        };
        Self {
            base_url: base_url.to_string(),
            page_size: 50,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Sync engine and poller settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval_secs: u64,
    /// Upper bound on messages fetched in one sync run.
    pub max_messages_per_sync: usize,
    /// How far back the first sync of a new mailbox reaches.
    pub initial_lookback_days: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            max_messages_per_sync: 100,
            initial_lookback_days: 7,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval_secs: env_parse("SYNC_POLL_INTERVAL_SECS")
                .unwrap_or(defaults.poll_interval_secs),
            max_messages_per_sync: env_parse("SYNC_MAX_MESSAGES")
                .unwrap_or(defaults.max_messages_per_sync),
            initial_lookback_days: env_parse("SYNC_INITIAL_LOOKBACK_DAYS")
                .unwrap_or(defaults.initial_lookback_days),
        }
    }
}

/// Extraction orchestrator and processor settings.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub default_batch_size: usize,
    /// Maximum simultaneous oracle calls within one run.
    pub max_concurrency: usize,
    pub oracle_timeout: Duration,
    pub interval_secs: u64,
    /// Message bodies are truncated to this many characters in the prompt.
    pub max_body_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 10,
            max_concurrency: 4,
            oracle_timeout: Duration::from_secs(30),
            interval_secs: 600,
            max_body_chars: 4000,
        }
    }
}

impl ExtractionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_batch_size: env_parse("EXTRACTION_BATCH_SIZE")
                .unwrap_or(defaults.default_batch_size),
            max_concurrency: env_parse::<usize>("EXTRACTION_CONCURRENCY")
                .unwrap_or(defaults.max_concurrency)
                .max(1),
            oracle_timeout: env_parse("EXTRACTION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.oracle_timeout),
            interval_secs: env_parse("EXTRACTION_INTERVAL_SECS")
                .unwrap_or(defaults.interval_secs),
            max_body_chars: env_parse("EXTRACTION_MAX_BODY_CHARS")
                .unwrap_or(defaults.max_body_chars),
        }
    }
}

/// Process-level settings for the binary.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub db_path: PathBuf,
    pub sync: SyncConfig,
    pub extraction: ExtractionConfig,
    /// Projects the background extraction processor runs for. Empty disables it.
    pub extraction_project_ids: Vec<Uuid>,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = std::env::var("MAILBOX_TASKS_DB_PATH")
            .unwrap_or_else(|_| "./data/mailbox-tasks.db".to_string());
        let extraction_project_ids = match std::env::var("EXTRACTION_PROJECT_IDS") {
            Ok(raw) => parse_project_ids(&raw)?,
            Err(_) => Vec::new(),
        };
        Ok(Self {
            db_path: PathBuf::from(db_path),
            sync: SyncConfig::from_env(),
            extraction: ExtractionConfig::from_env(),
            extraction_project_ids,
        })
    }
}

/// Comma-separated project UUIDs; blank entries are ignored.
fn parse_project_ids(raw: &str) -> Result<Vec<Uuid>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s).map_err(|e| ConfigError::InvalidValue {
                key: "EXTRACTION_PROJECT_IDS".to_string(),
                message: format!("{s}: {e}"),
            })
        })
        .collect()
}
