//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::MailboxAccount;
use crate::audit::AuditEntry;
use crate::error::DatabaseError;
use crate::tasks::{Project, Task};

/// Whether a message was received by or sent from the mailbox owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// A message ingested from a connected mailbox.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Provider-native message id; unique per account.
    pub external_id: String,
    pub subject: String,
    pub body: String,
    /// The other party: sender for inbound mail, first recipient for outbound.
    pub correspondent: String,
    pub sent_at: DateTime<Utc>,
    pub direction: Direction,
    /// Monotonic false → true, set once task extraction has committed.
    pub processed_for_extraction: bool,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering accounts, messages, tasks and audit.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Mailbox accounts ────────────────────────────────────────────

    /// Insert or update the account for (user_id, provider).
    ///
    /// Returns the stored row; on conflict the existing id is kept.
    async fn upsert_account(&self, account: &MailboxAccount)
    -> Result<MailboxAccount, DatabaseError>;

    async fn get_account(&self, id: Uuid) -> Result<Option<MailboxAccount>, DatabaseError>;

    async fn list_accounts_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<MailboxAccount>, DatabaseError>;

    async fn list_connected_accounts(&self) -> Result<Vec<MailboxAccount>, DatabaseError>;

    /// Replace the access token, and the refresh token when one is given.
    async fn update_account_tokens(
        &self,
        id: Uuid,
        access_token: &SecretString,
        refresh_token: Option<&SecretString>,
    ) -> Result<(), DatabaseError>;

    async fn set_account_connected(&self, id: Uuid, connected: bool) -> Result<(), DatabaseError>;

    /// Move the sync cursor forward. A cursor older than the stored one is ignored.
    async fn advance_sync_cursor(
        &self,
        id: Uuid,
        synced_to: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert a message unless (account_id, external_id) already exists.
    ///
    /// Returns `true` if a row was inserted.
    async fn insert_message(&self, message: &StoredMessage) -> Result<bool, DatabaseError>;

    async fn get_message(&self, id: Uuid) -> Result<Option<StoredMessage>, DatabaseError>;

    async fn count_messages_for_account(&self, account_id: Uuid) -> Result<usize, DatabaseError>;

    /// Up to `limit` messages not yet processed for extraction, from the
    /// user's mailboxes, newest first.
    async fn list_unprocessed_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, DatabaseError>;

    /// Atomically insert the tasks extracted from a message and flag it processed.
    ///
    /// Returns `false` (and writes nothing) if the message was already
    /// processed or does not exist.
    async fn commit_extraction(
        &self,
        message_id: Uuid,
        tasks: &[Task],
    ) -> Result<bool, DatabaseError>;

    // ── Projects & tasks ────────────────────────────────────────────

    async fn insert_project(&self, project: &Project) -> Result<(), DatabaseError>;

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, DatabaseError>;

    async fn list_tasks_for_project(&self, project_id: Uuid) -> Result<Vec<Task>, DatabaseError>;

    async fn list_tasks_for_message(&self, message_id: Uuid) -> Result<Vec<Task>, DatabaseError>;

    // ── Audit ───────────────────────────────────────────────────────

    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<(), DatabaseError>;

    async fn list_audit_entries(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, DatabaseError>;
}
