//! Microsoft identity platform dialect. Requires `scope` on every token request
//! and reads the address from Graph `/me`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::accounts::Provider;
use crate::config::OAuthClientConfig;
use crate::error::AuthError;
use crate::oauth::{OAuthProvider, TokenPair, fetch_profile, request_tokens};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    #[serde(default)]
    mail: Option<String>,
    #[serde(default)]
    user_principal_name: Option<String>,
}

impl GraphUser {
    /// `mail` is null for some personal accounts; the UPN is the sign-in address.
    fn address(self) -> String {
        self.mail
            .filter(|m| !m.trim().is_empty())
            .or(self.user_principal_name)
            .unwrap_or_default()
    }
}

pub struct MicrosoftOAuth {
    config: OAuthClientConfig,
    scope: String,
    http: reqwest::Client,
}

impl MicrosoftOAuth {
    pub fn new(config: OAuthClientConfig) -> Self {
        let scope = config.scopes.join(" ");
        Self {
            config,
            scope,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OAuthProvider for MicrosoftOAuth {
    fn provider(&self) -> Provider {
        Provider::Outlook
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenPair, AuthError> {
        request_tokens(
            &self.http,
            Provider::Outlook,
            &self.config,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("scope", self.scope.as_str()),
            ],
        )
        .await
    }

    async fn fetch_address(&self, access_token: &SecretString) -> Result<String, AuthError> {
        let user: GraphUser =
            fetch_profile(&self.http, Provider::Outlook, &self.config, access_token).await?;
        Ok(user.address())
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenPair, AuthError> {
        request_tokens(
            &self.http,
            Provider::Outlook,
            &self.config,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
                ("scope", self.scope.as_str()),
            ],
        )
        .await
    }
}
