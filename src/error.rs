//! Error types for the mailbox → task pipeline.

use std::time::Duration;

use uuid::Uuid;

use crate::accounts::Provider;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Mail API error: {0}")]
    MailApi(#[from] MailApiError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// OAuth code exchange, profile lookup and token refresh errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token endpoint refused the code or refresh token
    /// (expired, already used, redirect mismatch, revoked).
    #[error("{provider} rejected the authorization grant ({status}): {reason}")]
    Rejected {
        provider: Provider,
        status: u16,
        reason: String,
    },

    #[error("{provider} profile lookup failed: {reason}")]
    Profile { provider: Provider, reason: String },

    #[error("{provider} request failed: {reason}")]
    Transport { provider: Provider, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: Provider, reason: String },

    #[error("No OAuth client configured for provider {0}")]
    UnsupportedProvider(Provider),

    #[error("Account {0} has no refresh token")]
    MissingRefreshToken(Uuid),
}

impl AuthError {
    /// Whether the user has to go through the OAuth consent flow again.
    ///
    /// Only a refused grant or a missing refresh token means the stored
    /// credentials are unusable. Transport, profile, response and
    /// configuration failures are retried on a later run.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::MissingRefreshToken(_))
    }
}

/// Provider mail API errors.
#[derive(Debug, thiserror::Error)]
pub enum MailApiError {
    #[error("{provider} rejected the access token")]
    Unauthorized { provider: Provider },

    #[error("{provider} API error {status}: {message}")]
    Http {
        provider: Provider,
        status: u16,
        message: String,
    },

    #[error("{provider} request failed: {reason}")]
    Transport { provider: Provider, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: Provider, reason: String },
}

/// Mailbox synchronization errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Mailbox account {0} not found")]
    AccountNotFound(Uuid),

    #[error("Mailbox account {0} is not connected")]
    AccountNotConnected(Uuid),

    #[error("Access token expired for mailbox account {0}")]
    TokenExpired(Uuid),

    #[error("Fetching mail for account {account_id} failed: {source}")]
    Fetch {
        account_id: Uuid,
        #[source]
        source: MailApiError,
    },

    #[error("Persisting mail for account {account_id} failed: {source}")]
    Persistence {
        account_id: Uuid,
        #[source]
        source: DatabaseError,
    },

    #[error("No mail client registered for provider {provider}")]
    MissingMailClient { provider: Provider },

    #[error("Token refresh for account {account_id} failed: {source}")]
    Refresh {
        account_id: Uuid,
        #[source]
        source: AuthError,
    },
}

/// Task extraction errors.
///
/// `Llm`, `Timeout` and `MalformedResponse` are per-message failures: the
/// orchestrator logs them and leaves the message eligible for the next run.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Project {0} not found")]
    ProjectNotFound(Uuid),

    #[error("Extraction oracle failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Extraction oracle timed out after {timeout:?} for message {message_id}")]
    Timeout { message_id: Uuid, timeout: Duration },

    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),

    #[error("Persisting extraction results for message {message_id} failed: {source}")]
    Persistence {
        message_id: Uuid,
        #[source]
        source: DatabaseError,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
