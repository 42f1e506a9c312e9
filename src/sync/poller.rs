//! Background sync poller. Every tick syncs each connected mailbox once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::accounts::AccountRegistry;
use crate::error::{DatabaseError, SyncError};
use crate::oauth::TokenBroker;
use crate::sync::engine::SyncEngine;
use crate::sync::refresh::sync_with_refresh;

/// Outcome of one pass over all connected accounts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncPass {
    pub accounts: usize,
    pub ingested: usize,
    pub failed: usize,
}

/// Sync every connected account in turn. Failures are logged and do not stop the pass.
pub async fn sync_all(
    engine: &SyncEngine,
    broker: &TokenBroker,
    registry: &AccountRegistry,
) -> Result<SyncPass, DatabaseError> {
    let accounts = registry.list_connected().await?;

    let mut pass = SyncPass {
        accounts: accounts.len(),
        ..SyncPass::default()
    };
    for account in accounts {
        match sync_with_refresh(engine, broker, registry, account.id).await {
            Ok(n) => pass.ingested += n,
            // Disconnected between listing and locking.
            Err(SyncError::AccountNotConnected(id)) => {
                debug!(account_id = %id, "Skipping disconnected account");
            }
            Err(e) => {
                pass.failed += 1;
                warn!(account_id = %account.id, provider = %account.provider, error = %e, "Mailbox sync failed");
            }
        }
    }
    Ok(pass)
}

/// Spawn a background task that syncs all connected mailboxes on an interval.
///
/// Runs immediately, then every `interval_secs`. Returns a `JoinHandle` and
/// shutdown flag; set the flag to stop the loop at the next tick.
pub fn spawn_sync_poller(
    engine: Arc<SyncEngine>,
    broker: Arc<TokenBroker>,
    registry: AccountRegistry,
    interval_secs: u64,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Sync poller started, polling every {interval_secs}s");

        let mut tick = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Sync poller shutting down");
                return;
            }

            match sync_all(&engine, &broker, &registry).await {
                Ok(pass) if pass.accounts > 0 => {
                    info!(
                        accounts = pass.accounts,
                        ingested = pass.ingested,
                        failed = pass.failed,
                        "Sync pass complete"
                    );
                }
                Ok(_) => debug!("No connected mailboxes to sync"),
                Err(e) => error!(error = %e, "Failed to list connected mailboxes"),
            }
        }
    });

    (handle, shutdown_flag)
}
