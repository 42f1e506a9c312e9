//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All statements go through a
//! single connection guarded by an async mutex, so the extraction
//! transaction never interleaves with other writers.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::{MailboxAccount, Provider};
use crate::audit::AuditEntry;
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Database, Direction, StoredMessage};
use crate::tasks::{Project, Task, TaskPriority, TaskStatus};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Mutex<Connection>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn: Mutex::new(conn),
        })
    }

    /// Get the connection.
    async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format. Fixed precision keeps text comparison in SQL
/// consistent with chronological order.
fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.filter(|s| !s.is_empty()).map(|s| parse_datetime(&s))
}

fn parse_uuid(s: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Query(format!("{field} parse: {e}")))
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn str_to_direction(s: &str) -> Direction {
    match s {
        "outbound" => Direction::Outbound,
        _ => Direction::Inbound,
    }
}

const ACCOUNT_COLUMNS: &str = "id, user_id, provider, address, access_token, refresh_token, connected, last_synced, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, account_id, external_id, subject, body, correspondent, sent_at, direction, processed_for_extraction, created_at";

const TASK_COLUMNS: &str = "id, project_id, title, description, priority, status, due_date, source_message_id, confidence_score, created_at, updated_at";

const PROJECT_COLUMNS: &str = "id, user_id, name, created_at";

const AUDIT_COLUMNS: &str =
    "id, user_id, project_id, run_at, messages_processed, tasks_extracted";

fn row_to_account(row: &libsql::Row) -> Result<MailboxAccount, DatabaseError> {
    let field = |name: &str, e: libsql::Error| DatabaseError::Query(format!("account.{name}: {e}"));

    let id_str: String = row.get(0).map_err(|e| field("id", e))?;
    let provider_str: String = row.get(2).map_err(|e| field("provider", e))?;
    let provider: Provider = provider_str
        .parse()
        .map_err(|e: String| DatabaseError::Serialization(e))?;
    let access_token: String = row.get(4).map_err(|e| field("access_token", e))?;
    let refresh_token: Option<String> = row.get(5).ok();
    let connected: i64 = row.get(6).unwrap_or(0);
    let created_str: String = row.get(8).map_err(|e| field("created_at", e))?;
    let updated_str: String = row.get(9).map_err(|e| field("updated_at", e))?;

    Ok(MailboxAccount {
        id: parse_uuid(&id_str, "account.id")?,
        user_id: row.get(1).map_err(|e| field("user_id", e))?,
        provider,
        address: row.get(3).map_err(|e| field("address", e))?,
        access_token: SecretString::from(access_token),
        refresh_token: refresh_token
            .filter(|t| !t.is_empty())
            .map(SecretString::from),
        connected: connected != 0,
        last_synced: parse_optional_datetime(row.get(7).ok()),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<StoredMessage, DatabaseError> {
    let field = |name: &str, e: libsql::Error| DatabaseError::Query(format!("message.{name}: {e}"));

    let id_str: String = row.get(0).map_err(|e| field("id", e))?;
    let account_str: String = row.get(1).map_err(|e| field("account_id", e))?;
    let sent_str: String = row.get(6).map_err(|e| field("sent_at", e))?;
    let direction_str: String = row.get(7).unwrap_or_else(|_| "inbound".to_string());
    let processed: i64 = row.get(8).unwrap_or(0);
    let created_str: String = row.get(9).map_err(|e| field("created_at", e))?;

    Ok(StoredMessage {
        id: parse_uuid(&id_str, "message.id")?,
        account_id: parse_uuid(&account_str, "message.account_id")?,
        external_id: row.get(2).map_err(|e| field("external_id", e))?,
        subject: row.get(3).unwrap_or_default(),
        body: row.get(4).unwrap_or_default(),
        correspondent: row.get(5).unwrap_or_default(),
        sent_at: parse_datetime(&sent_str),
        direction: str_to_direction(&direction_str),
        processed_for_extraction: processed != 0,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let field = |name: &str, e: libsql::Error| DatabaseError::Query(format!("task.{name}: {e}"));

    let id_str: String = row.get(0).map_err(|e| field("id", e))?;
    let project_str: String = row.get(1).map_err(|e| field("project_id", e))?;
    let priority_str: String = row.get(4).unwrap_or_else(|_| "medium".to_string());
    let status_str: String = row.get(5).unwrap_or_else(|_| "pending".to_string());
    let source_str: Option<String> = row.get(7).ok();
    let confidence: Option<f64> = row.get(8).ok();
    let created_str: String = row.get(9).map_err(|e| field("created_at", e))?;
    let updated_str: String = row.get(10).map_err(|e| field("updated_at", e))?;

    Ok(Task {
        id: parse_uuid(&id_str, "task.id")?,
        project_id: parse_uuid(&project_str, "task.project_id")?,
        title: row.get(2).map_err(|e| field("title", e))?,
        description: row.get::<String>(3).ok().filter(|d| !d.is_empty()),
        priority: TaskPriority::parse_lenient(Some(&priority_str)),
        status: status_str.parse().unwrap_or(TaskStatus::Pending),
        due_date: parse_optional_datetime(row.get(6).ok()),
        source_message_id: source_str
            .filter(|s| !s.is_empty())
            .and_then(|s| Uuid::parse_str(&s).ok()),
        confidence_score: confidence.map(|c| c as f32),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_project(row: &libsql::Row) -> Result<Project, DatabaseError> {
    let field = |name: &str, e: libsql::Error| DatabaseError::Query(format!("project.{name}: {e}"));

    let id_str: String = row.get(0).map_err(|e| field("id", e))?;
    let created_str: String = row.get(3).map_err(|e| field("created_at", e))?;
    Ok(Project {
        id: parse_uuid(&id_str, "project.id")?,
        user_id: row.get(1).map_err(|e| field("user_id", e))?,
        name: row.get(2).map_err(|e| field("name", e))?,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_audit_entry(row: &libsql::Row) -> Result<AuditEntry, DatabaseError> {
    let field = |name: &str, e: libsql::Error| DatabaseError::Query(format!("audit.{name}: {e}"));

    let id_str: String = row.get(0).map_err(|e| field("id", e))?;
    let project_str: String = row.get(2).map_err(|e| field("project_id", e))?;
    let run_str: String = row.get(3).map_err(|e| field("run_at", e))?;
    let processed: i64 = row.get(4).map_err(|e| field("messages_processed", e))?;
    let extracted: i64 = row.get(5).map_err(|e| field("tasks_extracted", e))?;

    Ok(AuditEntry {
        id: parse_uuid(&id_str, "audit.id")?,
        user_id: row.get(1).map_err(|e| field("user_id", e))?,
        project_id: parse_uuid(&project_str, "audit.project_id")?,
        run_at: parse_datetime(&run_str),
        messages_processed: processed.max(0) as usize,
        tasks_extracted: extracted.max(0) as usize,
    })
}

/// Drain a result set through a row mapper.
async fn collect_rows<T>(
    mut rows: libsql::Rows,
    op: &str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op} row: {e}")))?
    {
        out.push(map(&row)?);
    }
    Ok(out)
}

/// Flip the processed flag, then insert the tasks. Runs inside the caller's transaction.
async fn write_extraction(
    conn: &Connection,
    message_id: Uuid,
    tasks: &[Task],
) -> Result<bool, DatabaseError> {
    let flipped = conn
        .execute(
            "UPDATE messages SET processed_for_extraction = 1 WHERE id = ?1 AND processed_for_extraction = 0",
            params![message_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("commit_extraction flag: {e}")))?;
    if flipped == 0 {
        return Ok(false);
    }

    for task in tasks {
        conn.execute(
            &format!(
                "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                task.id.to_string(),
                task.project_id.to_string(),
                task.title.as_str(),
                opt_text_owned(task.description.clone()),
                task.priority.as_str(),
                task.status.as_str(),
                opt_text_owned(task.due_date.as_ref().map(to_db_time)),
                opt_text_owned(task.source_message_id.map(|id| id.to_string())),
                match task.confidence_score {
                    Some(c) => libsql::Value::Real(c as f64),
                    None => libsql::Value::Null,
                },
                to_db_time(&task.created_at),
                to_db_time(&task.updated_at),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("commit_extraction insert task: {e}")))?;
    }
    Ok(true)
}

async fn rollback(conn: &Connection) {
    if let Err(e) = conn.execute("ROLLBACK", ()).await {
        warn!(error = %e, "Failed to roll back extraction transaction");
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.conn().await;
        migrations::run_migrations(&conn).await
    }

    // ── Mailbox accounts ────────────────────────────────────────────

    async fn upsert_account(
        &self,
        account: &MailboxAccount,
    ) -> Result<MailboxAccount, DatabaseError> {
        let conn = self.conn().await;
        conn.execute(
            &format!(
                "INSERT INTO mailbox_accounts ({ACCOUNT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(user_id, provider) DO UPDATE SET
                    address = excluded.address,
                    access_token = excluded.access_token,
                    refresh_token = COALESCE(excluded.refresh_token, mailbox_accounts.refresh_token),
                    connected = 1,
                    last_synced = CASE WHEN mailbox_accounts.address = excluded.address
                                       THEN mailbox_accounts.last_synced ELSE NULL END,
                    updated_at = excluded.updated_at"
            ),
            params![
                account.id.to_string(),
                account.user_id.as_str(),
                account.provider.as_str(),
                account.address.as_str(),
                account.access_token.expose_secret(),
                opt_text_owned(
                    account
                        .refresh_token
                        .as_ref()
                        .map(|t| t.expose_secret().to_string())
                ),
                account.connected as i64,
                opt_text_owned(account.last_synced.as_ref().map(to_db_time)),
                to_db_time(&account.created_at),
                to_db_time(&account.updated_at),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_account: {e}")))?;

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM mailbox_accounts WHERE user_id = ?1 AND provider = ?2"
                ),
                params![account.user_id.as_str(), account.provider.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_account reload: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let stored = row_to_account(&row)?;
                debug!(account_id = %stored.id, provider = %stored.provider, "Mailbox account upserted");
                Ok(stored)
            }
            Ok(None) => Err(DatabaseError::NotFound {
                entity: "mailbox_account".into(),
                id: format!("{}/{}", account.user_id, account.provider),
            }),
            Err(e) => Err(DatabaseError::Query(format!("upsert_account reload row: {e}"))),
        }
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<MailboxAccount>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM mailbox_accounts WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_account: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_account(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_account row: {e}"))),
        }
    }

    async fn list_accounts_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<MailboxAccount>, DatabaseError> {
        let conn = self.conn().await;
        let rows = conn
            .query(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM mailbox_accounts WHERE user_id = ?1 ORDER BY created_at ASC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_accounts_for_user: {e}")))?;
        collect_rows(rows, "list_accounts_for_user", row_to_account).await
    }

    async fn list_connected_accounts(&self) -> Result<Vec<MailboxAccount>, DatabaseError> {
        let conn = self.conn().await;
        let rows = conn
            .query(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM mailbox_accounts WHERE connected = 1 ORDER BY created_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_connected_accounts: {e}")))?;
        collect_rows(rows, "list_connected_accounts", row_to_account).await
    }

    async fn update_account_tokens(
        &self,
        id: Uuid,
        access_token: &SecretString,
        refresh_token: Option<&SecretString>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await;
        let updated = conn
            .execute(
                "UPDATE mailbox_accounts
                 SET access_token = ?1,
                     refresh_token = COALESCE(?2, refresh_token),
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    access_token.expose_secret(),
                    opt_text_owned(refresh_token.map(|t| t.expose_secret().to_string())),
                    to_db_time(&Utc::now()),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_account_tokens: {e}")))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "mailbox_account".into(),
                id: id.to_string(),
            });
        }
        debug!(account_id = %id, "Mailbox tokens updated");
        Ok(())
    }

    async fn set_account_connected(&self, id: Uuid, connected: bool) -> Result<(), DatabaseError> {
        let conn = self.conn().await;
        let updated = conn
            .execute(
                "UPDATE mailbox_accounts SET connected = ?1, updated_at = ?2 WHERE id = ?3",
                params![connected as i64, to_db_time(&Utc::now()), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_account_connected: {e}")))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "mailbox_account".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn advance_sync_cursor(
        &self,
        id: Uuid,
        synced_to: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await;
        let ts = to_db_time(&synced_to);
        let updated = conn
            .execute(
                "UPDATE mailbox_accounts SET last_synced = ?1, updated_at = ?2
                 WHERE id = ?3 AND (last_synced IS NULL OR last_synced < ?1)",
                params![ts, to_db_time(&Utc::now()), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("advance_sync_cursor: {e}")))?;

        debug!(account_id = %id, advanced = updated > 0, "Sync cursor checked");
        Ok(())
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &StoredMessage) -> Result<bool, DatabaseError> {
        let conn = self.conn().await;
        let inserted = conn
            .execute(
                &format!(
                    "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(account_id, external_id) DO NOTHING"
                ),
                params![
                    message.id.to_string(),
                    message.account_id.to_string(),
                    message.external_id.as_str(),
                    message.subject.as_str(),
                    message.body.as_str(),
                    message.correspondent.as_str(),
                    to_db_time(&message.sent_at),
                    message.direction.as_str(),
                    message.processed_for_extraction as i64,
                    to_db_time(&message.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_message: {e}")))?;
        Ok(inserted > 0)
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<StoredMessage>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_message(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message row: {e}"))),
        }
    }

    async fn count_messages_for_account(&self, account_id: Uuid) -> Result<usize, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM messages WHERE account_id = ?1",
                params![account_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_messages_for_account: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_messages_for_account: {e}")))?;
                Ok(count.max(0) as usize)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_messages_for_account row: {e}"))),
        }
    }

    async fn list_unprocessed_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, DatabaseError> {
        let conn = self.conn().await;
        let columns = MESSAGE_COLUMNS
            .split(", ")
            .map(|c| format!("m.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let rows = conn
            .query(
                &format!(
                    "SELECT {columns} FROM messages m
                     JOIN mailbox_accounts a ON a.id = m.account_id
                     WHERE a.user_id = ?1 AND m.processed_for_extraction = 0
                     ORDER BY m.sent_at DESC
                     LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_unprocessed_messages: {e}")))?;
        collect_rows(rows, "list_unprocessed_messages", row_to_message).await
    }

    async fn commit_extraction(
        &self,
        message_id: Uuid,
        tasks: &[Task],
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn().await;
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("commit_extraction begin: {e}")))?;

        match write_extraction(&conn, message_id, tasks).await {
            Ok(true) => {
                if let Err(e) = conn.execute("COMMIT", ()).await {
                    rollback(&conn).await;
                    return Err(DatabaseError::Query(format!("commit_extraction commit: {e}")));
                }
                debug!(message_id = %message_id, tasks = tasks.len(), "Extraction committed");
                Ok(true)
            }
            Ok(false) => {
                rollback(&conn).await;
                debug!(message_id = %message_id, "Message already processed, nothing written");
                Ok(false)
            }
            Err(e) => {
                rollback(&conn).await;
                Err(e)
            }
        }
    }

    // ── Projects & tasks ────────────────────────────────────────────

    async fn insert_project(&self, project: &Project) -> Result<(), DatabaseError> {
        let conn = self.conn().await;
        conn.execute(
            &format!("INSERT INTO projects ({PROJECT_COLUMNS}) VALUES (?1, ?2, ?3, ?4)"),
            params![
                project.id.to_string(),
                project.user_id.as_str(),
                project.name.as_str(),
                to_db_time(&project.created_at),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_project: {e}")))?;
        debug!(project_id = %project.id, "Project created");
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, DatabaseError> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_project: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_project(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_project row: {e}"))),
        }
    }

    async fn list_tasks_for_project(&self, project_id: Uuid) -> Result<Vec<Task>, DatabaseError> {
        let conn = self.conn().await;
        let rows = conn
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ?1 ORDER BY created_at ASC"
                ),
                params![project_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks_for_project: {e}")))?;
        collect_rows(rows, "list_tasks_for_project", row_to_task).await
    }

    async fn list_tasks_for_message(&self, message_id: Uuid) -> Result<Vec<Task>, DatabaseError> {
        let conn = self.conn().await;
        let rows = conn
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE source_message_id = ?1 ORDER BY created_at ASC"
                ),
                params![message_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks_for_message: {e}")))?;
        collect_rows(rows, "list_tasks_for_message", row_to_task).await
    }

    // ── Audit ───────────────────────────────────────────────────────

    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        let conn = self.conn().await;
        conn.execute(
            &format!("INSERT INTO audit_entries ({AUDIT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                entry.id.to_string(),
                entry.user_id.as_str(),
                entry.project_id.to_string(),
                to_db_time(&entry.run_at),
                entry.messages_processed as i64,
                entry.tasks_extracted as i64,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_audit_entry: {e}")))?;
        Ok(())
    }

    async fn list_audit_entries(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, DatabaseError> {
        let conn = self.conn().await;
        let rows = conn
            .query(
                &format!(
                    "SELECT {AUDIT_COLUMNS} FROM audit_entries WHERE user_id = ?1 ORDER BY run_at DESC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_audit_entries: {e}")))?;
        collect_rows(rows, "list_audit_entries", row_to_audit_entry).await
    }
}
