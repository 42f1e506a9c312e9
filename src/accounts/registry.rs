//! Mailbox account registry: durable record of connected mailboxes.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::accounts::model::MailboxAccount;
use crate::error::DatabaseError;
use crate::oauth::TokenPair;
use crate::store::Database;

/// Owns persistence of `MailboxAccount` records.
///
/// Enforces one account per (user, provider): registering a second connection
/// for the same pair updates the existing record instead of adding a row.
#[derive(Clone)]
pub struct AccountRegistry {
    db: Arc<dyn Database>,
}

impl AccountRegistry {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Persist an account produced by `TokenBroker::connect`.
    ///
    /// On reconnect the existing id is kept, tokens and address are replaced,
    /// and the account is marked connected again. The sync cursor survives
    /// only when the mailbox address is unchanged.
    pub async fn register(&self, account: &MailboxAccount) -> Result<MailboxAccount, DatabaseError> {
        let stored = self.db.upsert_account(account).await?;
        info!(
            account_id = %stored.id,
            user_id = %stored.user_id,
            provider = %stored.provider,
            "Mailbox account registered"
        );
        Ok(stored)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<MailboxAccount>, DatabaseError> {
        self.db.get_account(id).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<MailboxAccount>, DatabaseError> {
        self.db.list_accounts_for_user(user_id).await
    }

    /// All accounts eligible for sync.
    pub async fn list_connected(&self) -> Result<Vec<MailboxAccount>, DatabaseError> {
        self.db.list_connected_accounts().await
    }

    /// Store a refreshed token pair.
    ///
    /// A provider that does not rotate refresh tokens returns none; the stored
    /// refresh token is kept in that case.
    pub async fn update_tokens(&self, id: Uuid, tokens: &TokenPair) -> Result<(), DatabaseError> {
        self.db
            .update_account_tokens(id, &tokens.access_token, tokens.refresh_token.as_ref())
            .await
    }

    /// Exclude the account from all future syncs until it is reconnected.
    pub async fn disconnect(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.db.set_account_connected(id, false).await?;
        warn!(account_id = %id, "Mailbox account disconnected");
        Ok(())
    }
}
