//! Audit log: append-only record of extraction runs.
//!
//! One entry is written per orchestrator run. Entries are never updated or
//! deleted; the dashboard reads them through `list_for_user`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::Database;

/// Outcome counts of one extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub user_id: String,
    pub project_id: Uuid,
    pub run_at: DateTime<Utc>,
    /// Messages attempted in the run, successful or not.
    pub messages_processed: usize,
    pub tasks_extracted: usize,
}

impl AuditEntry {
    pub fn new(
        user_id: impl Into<String>,
        project_id: Uuid,
        messages_processed: usize,
        tasks_extracted: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            project_id,
            run_at: Utc::now(),
            messages_processed,
            tasks_extracted,
        }
    }
}

/// Append-only writer over the audit table.
#[derive(Clone)]
pub struct AuditLog {
    db: Arc<dyn Database>,
}

impl AuditLog {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub async fn record(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        self.db.insert_audit_entry(entry).await?;
        debug!(
            id = %entry.id,
            user_id = %entry.user_id,
            messages = entry.messages_processed,
            tasks = entry.tasks_extracted,
            "Audit entry recorded"
        );
        Ok(())
    }

    /// Most recent entries for a user, newest first.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, DatabaseError> {
        self.db.list_audit_entries(user_id, limit).await
    }
}
