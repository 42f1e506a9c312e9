//! Token broker: OAuth code exchange, token refresh and mailbox address lookup.
//!
//! Each provider dialect lives behind the [`OAuthProvider`] trait; the
//! [`TokenBroker`] picks the right one and assembles an unsaved
//! [`MailboxAccount`]. Persisting it is the registry's job.

pub mod google;
pub mod microsoft;

pub use google::GoogleOAuth;
pub use microsoft::MicrosoftOAuth;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::accounts::{MailboxAccount, Provider};
use crate::config::OAuthClientConfig;
use crate::error::AuthError;

/// Access/refresh token pair returned by a token endpoint.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: SecretString,
    /// Providers may omit this on refresh.
    pub refresh_token: Option<SecretString>,
    /// Access token lifetime in seconds, when reported.
    pub expires_in: Option<u64>,
}

/// One provider's OAuth dialect.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn provider(&self) -> Provider;

    /// Exchange a single-use authorization code for tokens.
    async fn exchange_code(&self, code: &str, redirect_uri: &str)
    -> Result<TokenPair, AuthError>;

    /// Primary address of the mailbox the token grants access to.
    async fn fetch_address(&self, access_token: &SecretString) -> Result<String, AuthError>;

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// POST a form to the token endpoint and parse the token response.
///
/// 4xx means the grant itself was refused; 5xx and network failures are
/// reported as transport errors.
pub(crate) async fn request_tokens(
    http: &reqwest::Client,
    provider: Provider,
    config: &OAuthClientConfig,
    grant: &[(&str, &str)],
) -> Result<TokenPair, AuthError> {
    let mut params: Vec<(&str, &str)> = grant.to_vec();
    params.push(("client_id", config.client_id.as_str()));
    if let Some(secret) = &config.client_secret {
        params.push(("client_secret", secret.expose_secret()));
    }

    let response = http
        .post(&config.token_url)
        .timeout(config.request_timeout)
        .form(&params)
        .send()
        .await
        .map_err(|e| AuthError::Transport {
            provider,
            reason: if e.is_timeout() {
                format!("token endpoint timed out after {:?}", config.request_timeout)
            } else {
                e.to_string()
            },
        })?;

    let status = response.status();
    if status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        let parsed: TokenErrorResponse = serde_json::from_str(&body).unwrap_or_default();
        let reason = match (parsed.error.is_empty(), parsed.error_description) {
            (false, Some(desc)) => format!("{}: {desc}", parsed.error),
            (false, None) => parsed.error,
            (true, _) => body,
        };
        warn!(provider = %provider, status = status.as_u16(), reason = %reason, "Token endpoint rejected grant");
        return Err(AuthError::Rejected {
            provider,
            status: status.as_u16(),
            reason,
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::Transport {
            provider,
            reason: format!("token endpoint returned {status}: {body}"),
        });
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| AuthError::InvalidResponse {
            provider,
            reason: e.to_string(),
        })?;

    if token.access_token.is_empty() {
        return Err(AuthError::InvalidResponse {
            provider,
            reason: "empty access_token".to_string(),
        });
    }

    debug!(provider = %provider, expires_in = ?token.expires_in, "Token endpoint returned tokens");
    Ok(TokenPair {
        access_token: SecretString::from(token.access_token),
        refresh_token: token
            .refresh_token
            .filter(|t| !t.is_empty())
            .map(SecretString::from),
        expires_in: token.expires_in,
    })
}

/// GET a profile document with the bearer token. Every failure is a profile error.
pub(crate) async fn fetch_profile<T: DeserializeOwned>(
    http: &reqwest::Client,
    provider: Provider,
    config: &OAuthClientConfig,
    access_token: &SecretString,
) -> Result<T, AuthError> {
    let response = http
        .get(&config.profile_url)
        .timeout(config.request_timeout)
        .bearer_auth(access_token.expose_secret())
        .send()
        .await
        .map_err(|e| AuthError::Profile {
            provider,
            reason: format!("profile endpoint unreachable: {e}"),
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::Profile {
            provider,
            reason: format!("profile endpoint returned {status}: {body}"),
        });
    }

    response.json().await.map_err(|e| AuthError::Profile {
        provider,
        reason: format!("unreadable profile: {e}"),
    })
}

/// Routes OAuth operations to the configured provider client.
#[derive(Clone, Default)]
pub struct TokenBroker {
    providers: HashMap<Provider, Arc<dyn OAuthProvider>>,
}

impl TokenBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider client, replacing any previous one for the same provider.
    pub fn with_provider(mut self, client: Arc<dyn OAuthProvider>) -> Self {
        self.providers.insert(client.provider(), client);
        self
    }

    pub fn supports(&self, provider: Provider) -> bool {
        self.providers.contains_key(&provider)
    }

    fn client(&self, provider: Provider) -> Result<&Arc<dyn OAuthProvider>, AuthError> {
        self.providers
            .get(&provider)
            .ok_or(AuthError::UnsupportedProvider(provider))
    }

    /// Exchange an authorization code and look up the mailbox address.
    ///
    /// The returned account is connected, has no sync cursor, and is not yet
    /// persisted. Codes are single-use, so nothing here is retried.
    pub async fn connect(
        &self,
        user_id: &str,
        provider: Provider,
        code: &str,
        redirect_uri: &str,
    ) -> Result<MailboxAccount, AuthError> {
        let client = self.client(provider)?;
        let tokens = client.exchange_code(code, redirect_uri).await?;
        let address = client.fetch_address(&tokens.access_token).await?;
        let address = address.trim();
        if address.is_empty() {
            return Err(AuthError::Profile {
                provider,
                reason: "profile has no mailbox address".to_string(),
            });
        }

        info!(user_id, provider = %provider, address, "Mailbox authorized");
        Ok(MailboxAccount::new(user_id, provider, address, tokens))
    }

    /// Obtain a fresh access token for a stored account.
    ///
    /// The stored refresh token is carried forward when the provider does not
    /// rotate it.
    pub async fn refresh(&self, account: &MailboxAccount) -> Result<TokenPair, AuthError> {
        let refresh_token = account
            .refresh_token
            .as_ref()
            .ok_or(AuthError::MissingRefreshToken(account.id))?;
        let client = self.client(account.provider)?;

        let mut tokens = client.refresh(refresh_token).await?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.clone());
        }
        debug!(account_id = %account.id, provider = %account.provider, "Access token refreshed");
        Ok(tokens)
    }
}
