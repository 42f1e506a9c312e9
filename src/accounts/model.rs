//! Mailbox account model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::oauth::TokenPair;

/// Mail providers a user can connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gmail,
    Outlook,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" | "google" => Ok(Self::Gmail),
            "outlook" | "microsoft" => Ok(Self::Outlook),
            other => Err(format!("unknown mail provider: '{other}'")),
        }
    }
}

/// A connected external mailbox.
///
/// One account exists per (user, provider). `last_synced` is the sync cursor:
/// the timestamp of the newest message already stored for this mailbox.
#[derive(Debug, Clone)]
pub struct MailboxAccount {
    pub id: Uuid,
    pub user_id: String,
    pub provider: Provider,
    /// Primary address reported by the provider profile endpoint.
    pub address: String,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// False once auth has failed persistently; such accounts are never synced.
    pub connected: bool,
    pub last_synced: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MailboxAccount {
    /// Build a freshly connected (not yet persisted) account.
    pub fn new(
        user_id: impl Into<String>,
        provider: Provider,
        address: impl Into<String>,
        tokens: TokenPair,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            provider,
            address: address.into(),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            connected: true,
            last_synced: None,
            created_at: now,
            updated_at: now,
        }
    }
}
