use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use mailbox_tasks::accounts::{AccountRegistry, Provider};
use mailbox_tasks::config::{MailApiConfig, OAuthClientConfig, PipelineConfig};
use mailbox_tasks::extraction::{ExtractionOrchestrator, LlmOracle, spawn_extraction_processor};
use mailbox_tasks::llm::{LlmConfig, create_provider};
use mailbox_tasks::mail::{GmailApi, OutlookApi};
use mailbox_tasks::oauth::{GoogleOAuth, MicrosoftOAuth, TokenBroker};
use mailbox_tasks::store::{Database, LibSqlBackend};
use mailbox_tasks::sync::{SyncEngine, spawn_sync_poller};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = PipelineConfig::from_env()?;
    info!("Mailbox Tasks v{}", env!("CARGO_PKG_VERSION"));

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    info!(path = %config.db_path.display(), "Database ready");

    // ── OAuth ────────────────────────────────────────────────────────────
    let mut broker = TokenBroker::new();
    if let Some(google) = OAuthClientConfig::google_from_env() {
        broker = broker.with_provider(Arc::new(GoogleOAuth::new(google)));
    }
    if let Some(microsoft) = OAuthClientConfig::microsoft_from_env() {
        broker = broker.with_provider(Arc::new(MicrosoftOAuth::new(microsoft)));
    }
    for provider in [Provider::Gmail, Provider::Outlook] {
        if !broker.supports(provider) {
            warn!(provider = %provider, "No OAuth client configured, token refresh disabled");
        }
    }

    // ── Sync ─────────────────────────────────────────────────────────────
    let registry = AccountRegistry::new(Arc::clone(&db));
    let engine = SyncEngine::new(Arc::clone(&db), config.sync.clone())
        .with_mail_api(Arc::new(GmailApi::new(MailApiConfig::for_provider(
            Provider::Gmail,
        ))))
        .with_mail_api(Arc::new(OutlookApi::new(MailApiConfig::for_provider(
            Provider::Outlook,
        ))));

    let (sync_handle, sync_shutdown) = spawn_sync_poller(
        Arc::new(engine),
        Arc::new(broker),
        registry,
        config.sync.poll_interval_secs,
    );

    // ── Extraction ───────────────────────────────────────────────────────
    let extraction = if config.extraction_project_ids.is_empty() {
        info!("EXTRACTION_PROJECT_IDS not set, background extraction disabled");
        None
    } else {
        let llm_config = LlmConfig::from_env()?;
        let llm = create_provider(&llm_config)?;
        let orchestrator = ExtractionOrchestrator::new(
            Arc::clone(&db),
            Arc::new(LlmOracle::new(llm)),
            config.extraction.clone(),
        );
        Some(spawn_extraction_processor(
            Arc::new(orchestrator),
            config.extraction_project_ids.clone(),
            config.extraction.interval_secs,
        ))
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    sync_shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    sync_handle.abort();
    if let Some((handle, shutdown)) = extraction {
        shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
        handle.abort();
    }

    Ok(())
}
