//! Provider mail APIs: list and fetch messages from a sync cursor on.

pub mod body;
pub mod gmail;
pub mod outlook;

pub use gmail::GmailApi;
pub use outlook::OutlookApi;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::accounts::{MailboxAccount, Provider};
use crate::error::MailApiError;
use crate::store::Direction;

/// A message as returned by a provider, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteMessage {
    /// Provider-native id (Gmail message id, Graph message id).
    pub external_id: String,
    pub subject: String,
    /// Plain text with quoted replies removed.
    pub body: String,
    pub correspondent: String,
    pub sent_at: DateTime<Utc>,
    pub direction: Direction,
}

/// Read access to one provider's mailboxes.
#[async_trait]
pub trait MailApi: Send + Sync {
    fn provider(&self) -> Provider;

    /// Messages received at or after `since`, oldest first, at most `limit`
    /// of them.
    ///
    /// The window is inclusive so messages sharing the cursor's timestamp
    /// are fetched again rather than skipped; callers deduplicate.
    ///
    /// Fails with [`MailApiError::Unauthorized`] when the access token is
    /// expired or revoked.
    async fn fetch_since(
        &self,
        account: &MailboxAccount,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, MailApiError>;
}

/// Map a provider HTTP response to an error unless it succeeded.
pub(crate) async fn check_response(
    provider: Provider,
    response: reqwest::Response,
) -> Result<reqwest::Response, MailApiError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(MailApiError::Unauthorized { provider });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(MailApiError::Http {
            provider,
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(response)
}

pub(crate) fn transport_error(provider: Provider, e: reqwest::Error) -> MailApiError {
    MailApiError::Transport {
        provider,
        reason: if e.is_timeout() {
            "request timed out".to_string()
        } else {
            e.to_string()
        },
    }
}

pub(crate) fn invalid_response(provider: Provider, e: impl std::fmt::Display) -> MailApiError {
    MailApiError::InvalidResponse {
        provider,
        reason: e.to_string(),
    }
}
