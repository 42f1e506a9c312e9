//! Google OAuth dialect.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::accounts::Provider;
use crate::config::OAuthClientConfig;
use crate::error::AuthError;
use crate::oauth::{OAuthProvider, TokenPair, fetch_profile, request_tokens};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailProfile {
    #[serde(default)]
    email_address: String,
}

/// Google token endpoint plus the Gmail profile for the mailbox address.
pub struct GoogleOAuth {
    config: OAuthClientConfig,
    http: reqwest::Client,
}

impl GoogleOAuth {
    pub fn new(config: OAuthClientConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuth {
    fn provider(&self) -> Provider {
        Provider::Gmail
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenPair, AuthError> {
        request_tokens(
            &self.http,
            Provider::Gmail,
            &self.config,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ],
        )
        .await
    }

    async fn fetch_address(&self, access_token: &SecretString) -> Result<String, AuthError> {
        let profile: GmailProfile =
            fetch_profile(&self.http, Provider::Gmail, &self.config, access_token).await?;
        Ok(profile.email_address)
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, AuthError> {
        request_tokens(
            &self.http,
            Provider::Gmail,
            &self.config,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
            ],
        )
        .await
    }
}
