//! Sync engine: pulls new mail for one mailbox into the message store.
//!
//! A run fetches everything at or after the account's cursor, stores each
//! message idempotently, and only then advances the cursor in a single step.
//! Runs for the same account are serialized.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::accounts::Provider;
use crate::config::SyncConfig;
use crate::error::{MailApiError, SyncError};
use crate::mail::{MailApi, RemoteMessage};
use crate::store::{Database, StoredMessage};

pub struct SyncEngine {
    db: Arc<dyn Database>,
    clients: HashMap<Provider, Arc<dyn MailApi>>,
    config: SyncConfig,
    /// One lock per account id, created on first use.
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(db: Arc<dyn Database>, config: SyncConfig) -> Self {
        Self {
            db,
            clients: HashMap::new(),
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Register the mail client for its provider.
    pub fn with_mail_api(mut self, client: Arc<dyn MailApi>) -> Self {
        self.clients.insert(client.provider(), client);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn account_lock(&self, account_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(account_id).or_default())
    }

    /// Ingest messages from the cursor on. Returns how many new messages were stored.
    ///
    /// On any failure the cursor is left where it was; messages stored before
    /// the failure stay stored and are deduplicated on the next run.
    pub async fn sync_mailbox(&self, account_id: Uuid) -> Result<usize, SyncError> {
        let lock = self.account_lock(account_id).await;
        let _guard = lock.lock().await;

        let persistence = |source| SyncError::Persistence { account_id, source };

        let account = self
            .db
            .get_account(account_id)
            .await
            .map_err(persistence)?
            .ok_or(SyncError::AccountNotFound(account_id))?;
        if !account.connected {
            return Err(SyncError::AccountNotConnected(account_id));
        }
        let client = self
            .clients
            .get(&account.provider)
            .ok_or(SyncError::MissingMailClient {
                provider: account.provider,
            })?;

        let since = account
            .last_synced
            .unwrap_or_else(|| Utc::now() - Duration::days(self.config.initial_lookback_days));

        debug!(account_id = %account_id, provider = %account.provider, since = %since, "Syncing mailbox");

        let remote = client
            .fetch_since(&account, since, self.config.max_messages_per_sync)
            .await
            .map_err(|e| match e {
                MailApiError::Unauthorized { .. } => SyncError::TokenExpired(account_id),
                other => SyncError::Fetch {
                    account_id,
                    source: other,
                },
            })?;

        let mut ingested = 0;
        let mut newest = None;
        for message in remote {
            let sent_at = message.sent_at;
            let stored = to_stored(account_id, message);
            match self.db.insert_message(&stored).await {
                Ok(true) => ingested += 1,
                Ok(false) => {
                    debug!(account_id = %account_id, external_id = %stored.external_id, "Message already stored");
                }
                Err(e) => {
                    error!(account_id = %account_id, external_id = %stored.external_id, error = %e, "Failed to store message, sync aborted");
                    return Err(persistence(e));
                }
            }
            newest = newest.max(Some(sent_at));
        }

        if let Some(newest) = newest {
            self.db
                .advance_sync_cursor(account_id, newest)
                .await
                .map_err(persistence)?;
        }

        info!(account_id = %account_id, provider = %account.provider, ingested, "Mailbox synced");
        Ok(ingested)
    }
}

fn to_stored(account_id: Uuid, message: RemoteMessage) -> StoredMessage {
    StoredMessage {
        id: Uuid::new_v4(),
        account_id,
        external_id: message.external_id,
        subject: message.subject,
        body: message.body,
        correspondent: message.correspondent,
        sent_at: message.sent_at,
        direction: message.direction,
        processed_for_extraction: false,
        created_at: Utc::now(),
    }
}
