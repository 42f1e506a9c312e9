//! Extraction orchestrator: runs unprocessed messages through the oracle
//! and attaches the resulting tasks to a project.
//!
//! Each message is an independent unit of work. A failed unit is logged and
//! left unprocessed for the next run; it never aborts the batch. A unit that
//! succeeds commits its tasks and its processed flag in one transaction, so a
//! message is never extracted twice.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLog};
use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::extraction::oracle::{CandidateTask, ExtractionOracle};
use crate::mail::body::truncate_chars;
use crate::store::{Database, Direction, StoredMessage};
use crate::tasks::{Project, Task, TaskPriority};

/// Result of one `extract_tasks` call.
#[derive(Debug, Clone)]
pub struct ExtractionRun {
    /// Tasks actually committed in this run.
    pub tasks_created: Vec<Task>,
    /// Messages attempted, successful or not.
    pub messages_processed: usize,
    /// Messages whose extraction failed and were left for a later run.
    pub failures: usize,
    pub audit_entry: AuditEntry,
}

pub struct ExtractionOrchestrator {
    db: Arc<dyn Database>,
    oracle: Arc<dyn ExtractionOracle>,
    audit: AuditLog,
    config: ExtractionConfig,
}

impl ExtractionOrchestrator {
    pub fn new(
        db: Arc<dyn Database>,
        oracle: Arc<dyn ExtractionOracle>,
        config: ExtractionConfig,
    ) -> Self {
        let audit = AuditLog::new(Arc::clone(&db));
        Self {
            db,
            oracle,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract tasks from up to `batch_size` unprocessed messages of the
    /// project owner's mailboxes, newest first.
    ///
    /// Always writes exactly one audit entry once the project is found,
    /// even when there is nothing to process.
    pub async fn extract_tasks(
        &self,
        project_id: Uuid,
        batch_size: usize,
    ) -> Result<ExtractionRun, ExtractionError> {
        let project = self
            .db
            .get_project(project_id)
            .await?
            .ok_or(ExtractionError::ProjectNotFound(project_id))?;

        let messages = if batch_size == 0 {
            Vec::new()
        } else {
            self.db
                .list_unprocessed_messages(&project.user_id, batch_size)
                .await?
        };
        let messages_processed = messages.len();
        debug!(project_id = %project.id, count = messages_processed, "Extraction batch selected");

        let project = &project;
        // Built up front so the run stays `Send` when spawned.
        let units: Vec<BoxFuture<'_, (Uuid, Result<Vec<Task>, ExtractionError>)>> = messages
            .iter()
            .map(|message| {
                async move { (message.id, self.process_message(project, message).await) }.boxed()
            })
            .collect();
        let outcomes: Vec<_> = stream::iter(units)
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut tasks_created = Vec::new();
        let mut failures = 0;
        for (message_id, outcome) in outcomes {
            match outcome {
                Ok(tasks) => tasks_created.extend(tasks),
                Err(e) => {
                    failures += 1;
                    error!(message_id = %message_id, project_id = %project.id, error = %e, "Task extraction failed, message left for retry");
                }
            }
        }

        let audit_entry = AuditEntry::new(
            project.user_id.clone(),
            project.id,
            messages_processed,
            tasks_created.len(),
        );
        self.audit.record(&audit_entry).await?;

        info!(
            project_id = %project.id,
            messages = messages_processed,
            tasks = tasks_created.len(),
            failures,
            "Extraction run complete"
        );

        Ok(ExtractionRun {
            tasks_created,
            messages_processed,
            failures,
            audit_entry,
        })
    }

    async fn process_message(
        &self,
        project: &Project,
        message: &StoredMessage,
    ) -> Result<Vec<Task>, ExtractionError> {
        let prompt = build_extraction_prompt(project, message, self.config.max_body_chars);

        let result = tokio::time::timeout(self.config.oracle_timeout, self.oracle.extract(&prompt))
            .await
            .map_err(|_| ExtractionError::Timeout {
                message_id: message.id,
                timeout: self.config.oracle_timeout,
            })??;

        let tasks: Vec<Task> = result
            .tasks
            .into_iter()
            .map(|candidate| candidate_to_task(project.id, message.id, candidate))
            .collect();

        let committed = self
            .db
            .commit_extraction(message.id, &tasks)
            .await
            .map_err(|source| ExtractionError::Persistence {
                message_id: message.id,
                source,
            })?;

        if !committed {
            debug!(message_id = %message.id, "Message already processed by another run");
            return Ok(Vec::new());
        }

        debug!(message_id = %message.id, tasks = tasks.len(), "Message extracted");
        Ok(tasks)
    }
}

/// Build the oracle prompt for one message.
pub(crate) fn build_extraction_prompt(
    project: &Project,
    message: &StoredMessage,
    max_body_chars: usize,
) -> String {
    let mut prompt = String::with_capacity(512);

    prompt.push_str(&format!("Project: {}\n", project.name));
    match message.direction {
        Direction::Inbound => prompt.push_str(&format!("From: {}\n", message.correspondent)),
        Direction::Outbound => prompt.push_str(&format!(
            "To: {} (sent by the mailbox owner)\n",
            message.correspondent
        )),
    }
    prompt.push_str(&format!(
        "Date: {}\n",
        message.sent_at.format("%Y-%m-%d %H:%M UTC")
    ));
    prompt.push_str(&format!("Subject: {}\n", message.subject));
    prompt.push_str(&format!(
        "\nMessage:\n{}",
        truncate_chars(&message.body, max_body_chars)
    ));

    prompt
}

fn candidate_to_task(project_id: Uuid, message_id: Uuid, candidate: CandidateTask) -> Task {
    let mut task = Task::new(project_id, candidate.title.trim())
        .with_priority(TaskPriority::parse_lenient(candidate.priority.as_deref()))
        .with_source_message(message_id, candidate.confidence);

    if let Some(description) = candidate.description.filter(|d| !d.trim().is_empty()) {
        task = task.with_description(description);
    }
    if let Some(due) = candidate.due_date.as_deref().and_then(parse_due_date) {
        task = task.with_due_date(due);
    }
    task
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
fn parse_due_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
