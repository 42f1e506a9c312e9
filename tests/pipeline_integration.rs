//! End-to-end tests for connect → sync → extract.
//!
//! OAuth runs against a mockito server through the real Google client; the
//! mail API and the LLM are in-process fakes. Storage is in-memory libSQL.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockito::Matcher;

use mailbox_tasks::accounts::{AccountRegistry, MailboxAccount, Provider};
use mailbox_tasks::config::{ExtractionConfig, OAuthClientConfig, SyncConfig};
use mailbox_tasks::error::{LlmError, MailApiError, SyncError};
use mailbox_tasks::extraction::{ExtractionOrchestrator, LlmOracle};
use mailbox_tasks::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use mailbox_tasks::mail::{MailApi, RemoteMessage};
use mailbox_tasks::oauth::{GoogleOAuth, TokenBroker};
use mailbox_tasks::store::{Database, Direction, LibSqlBackend};
use mailbox_tasks::sync::SyncEngine;
use mailbox_tasks::tasks::{Project, TaskStatus};

/// Serves a fixed inbox, filtered by the sync window.
struct FixedInbox {
    messages: Mutex<Vec<RemoteMessage>>,
}

#[async_trait]
impl MailApi for FixedInbox {
    fn provider(&self) -> Provider {
        Provider::Gmail
    }

    async fn fetch_since(
        &self,
        _account: &MailboxAccount,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, MailApiError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.sent_at >= since)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// LLM that answers by subject line. "Slow" never answers in time.
struct SubjectLlm;

#[async_trait]
impl LlmProvider for SubjectLlm {
    fn model_name(&self) -> &str {
        "subject-llm"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = &request.messages.last().unwrap().content;
        let content = if prompt.contains("Subject: Proposal") {
            r#"```json
{"has_tasks": true, "tasks": [{"title": "Send proposal", "priority": "high", "confidence": 0.92}]}
```"#
                .to_string()
        } else if prompt.contains("Subject: Slow") {
            tokio::time::sleep(Duration::from_secs(30)).await;
            r#"{"has_tasks": false, "tasks": []}"#.to_string()
        } else {
            r#"{"has_tasks": false, "tasks": []}"#.to_string()
        };
        Ok(CompletionResponse {
            content,
            input_tokens: 300,
            output_tokens: 60,
            finish_reason: FinishReason::Stop,
        })
    }
}

fn inbound(external_id: &str, subject: &str, minutes_ago: i64) -> RemoteMessage {
    RemoteMessage {
        external_id: external_id.to_string(),
        subject: subject.to_string(),
        body: format!("Body of {subject}"),
        correspondent: "client@example.com".to_string(),
        sent_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
        direction: Direction::Inbound,
    }
}

async fn connect_gmail(server: &mut mockito::ServerGuard, registry: &AccountRegistry) -> MailboxAccount {
    let _token = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "4/0Abc".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"ya29.a0","refresh_token":"1//0g","expires_in":3599,"token_type":"Bearer"}"#)
        .create_async()
        .await;
    let _profile = server
        .mock("GET", "/profile")
        .match_header("authorization", "Bearer ya29.a0")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"emailAddress":"owner@gmail.com","messagesTotal":42}"#)
        .create_async()
        .await;

    let google = GoogleOAuth::new(OAuthClientConfig::google("client-id", None).with_base_url(&server.url()));
    let broker = TokenBroker::new().with_provider(Arc::new(google));

    let account = broker
        .connect("owner", Provider::Gmail, "4/0Abc", "http://localhost/callback")
        .await
        .unwrap();
    registry.register(&account).await.unwrap()
}

fn orchestrator(db: &Arc<dyn Database>) -> ExtractionOrchestrator {
    ExtractionOrchestrator::new(
        Arc::clone(db),
        Arc::new(LlmOracle::new(Arc::new(SubjectLlm))),
        ExtractionConfig {
            oracle_timeout: Duration::from_millis(300),
            ..ExtractionConfig::default()
        },
    )
}

#[tokio::test]
async fn connect_sync_extract_end_to_end() {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let registry = AccountRegistry::new(Arc::clone(&db));
    let mut server = mockito::Server::new_async().await;

    let account = connect_gmail(&mut server, &registry).await;
    assert!(account.connected);
    assert_eq!(account.address, "owner@gmail.com");

    let inbox = Arc::new(FixedInbox {
        messages: Mutex::new(vec![
            inbound("m1", "Proposal", 30),
            inbound("m2", "Newsletter", 20),
        ]),
    });
    let engine = SyncEngine::new(Arc::clone(&db), SyncConfig::default()).with_mail_api(inbox);

    assert_eq!(engine.sync_mailbox(account.id).await.unwrap(), 2);
    // Nothing new upstream: second run ingests nothing.
    assert_eq!(engine.sync_mailbox(account.id).await.unwrap(), 0);

    let project = Project::new("owner", "Q4 sales");
    db.insert_project(&project).await.unwrap();
    let orchestrator = orchestrator(&db);

    let run = orchestrator.extract_tasks(project.id, 10).await.unwrap();
    assert_eq!(run.messages_processed, 2);
    assert_eq!(run.failures, 0);
    assert_eq!(run.tasks_created.len(), 1);

    let task = &run.tasks_created[0];
    assert_eq!(task.title, "Send proposal");
    assert_eq!(task.project_id, project.id);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.confidence_score, Some(0.92));

    let source = db.get_message(task.source_message_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(source.external_id, "m1");
    assert!(source.processed_for_extraction);

    // Processed messages never yield more tasks.
    let again = orchestrator.extract_tasks(project.id, 10).await.unwrap();
    assert_eq!(again.messages_processed, 0);
    assert_eq!(db.list_tasks_for_project(project.id).await.unwrap().len(), 1);

    let audit = db.list_audit_entries("owner", 10).await.unwrap();
    assert_eq!(audit.len(), 2);
}

#[tokio::test]
async fn timed_out_message_is_counted_and_left_unprocessed() {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let registry = AccountRegistry::new(Arc::clone(&db));
    let mut server = mockito::Server::new_async().await;
    let account = connect_gmail(&mut server, &registry).await;

    let inbox = Arc::new(FixedInbox {
        messages: Mutex::new(vec![
            inbound("m1", "Proposal", 30),
            inbound("m2", "Slow", 20),
        ]),
    });
    let engine = SyncEngine::new(Arc::clone(&db), SyncConfig::default()).with_mail_api(inbox);
    engine.sync_mailbox(account.id).await.unwrap();

    let project = Project::new("owner", "Q4 sales");
    db.insert_project(&project).await.unwrap();

    let run = orchestrator(&db).extract_tasks(project.id, 10).await.unwrap();
    assert_eq!(run.messages_processed, 2);
    assert_eq!(run.failures, 1);
    assert_eq!(run.tasks_created.len(), 1);
    assert_eq!(run.audit_entry.messages_processed, 2);

    let unprocessed = db.list_unprocessed_messages("owner", 10).await.unwrap();
    assert_eq!(unprocessed.len(), 1);
    assert_eq!(unprocessed[0].external_id, "m2");
    assert!(db.list_tasks_for_message(unprocessed[0].id).await.unwrap().is_empty());
}

#[tokio::test]
async fn disconnected_account_cannot_sync() {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let registry = AccountRegistry::new(Arc::clone(&db));
    let mut server = mockito::Server::new_async().await;
    let account = connect_gmail(&mut server, &registry).await;
    registry.disconnect(account.id).await.unwrap();

    let inbox = Arc::new(FixedInbox {
        messages: Mutex::new(vec![inbound("m1", "Proposal", 5)]),
    });
    let engine = SyncEngine::new(Arc::clone(&db), SyncConfig::default()).with_mail_api(inbox);

    let err = engine.sync_mailbox(account.id).await.unwrap_err();
    assert!(matches!(err, SyncError::AccountNotConnected(_)));
    assert_eq!(db.count_messages_for_account(account.id).await.unwrap(), 0);
    assert!(registry.get(account.id).await.unwrap().unwrap().last_synced.is_none());
}

#[tokio::test]
async fn reconnect_keeps_one_account_per_provider() {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let registry = AccountRegistry::new(Arc::clone(&db));
    let mut server = mockito::Server::new_async().await;

    let first = connect_gmail(&mut server, &registry).await;
    registry.disconnect(first.id).await.unwrap();
    let second = connect_gmail(&mut server, &registry).await;

    assert_eq!(first.id, second.id);
    assert!(second.connected);
    assert_eq!(registry.list_for_user("owner").await.unwrap().len(), 1);
}
