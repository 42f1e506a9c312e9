//! Token refresh around a sync run.
//!
//! An expired access token gets exactly one refresh and one retry. If the
//! retry is rejected again, or the provider refuses the refresh grant, the
//! account is disconnected and must be reconnected through OAuth.

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::accounts::AccountRegistry;
use crate::error::SyncError;
use crate::oauth::TokenBroker;
use crate::sync::engine::SyncEngine;

/// Run one sync for `account_id`, refreshing the access token once on expiry.
pub async fn sync_with_refresh(
    engine: &SyncEngine,
    broker: &TokenBroker,
    registry: &AccountRegistry,
    account_id: Uuid,
) -> Result<usize, SyncError> {
    match engine.sync_mailbox(account_id).await {
        Err(SyncError::TokenExpired(_)) => {}
        other => return other,
    }

    info!(account_id = %account_id, "Access token expired, refreshing");
    let persistence = |source| SyncError::Persistence { account_id, source };

    let account = registry
        .get(account_id)
        .await
        .map_err(persistence)?
        .ok_or(SyncError::AccountNotFound(account_id))?;

    match broker.refresh(&account).await {
        Ok(tokens) => registry
            .update_tokens(account_id, &tokens)
            .await
            .map_err(persistence)?,
        Err(e) => {
            if e.requires_reauthorization() {
                error!(account_id = %account_id, error = %e, "Token refresh refused");
                disconnect(registry, account_id).await;
            } else {
                warn!(account_id = %account_id, error = %e, "Token refresh failed, will retry next run");
            }
            return Err(SyncError::Refresh {
                account_id,
                source: e,
            });
        }
    }

    match engine.sync_mailbox(account_id).await {
        Err(SyncError::TokenExpired(_)) => {
            error!(account_id = %account_id, "Refreshed token rejected");
            disconnect(registry, account_id).await;
            Err(SyncError::TokenExpired(account_id))
        }
        other => other,
    }
}

async fn disconnect(registry: &AccountRegistry, account_id: Uuid) {
    if let Err(e) = registry.disconnect(account_id).await {
        error!(account_id = %account_id, error = %e, "Failed to mark account disconnected");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use secrecy::{ExposeSecret, SecretString};

    use super::*;
    use crate::accounts::{MailboxAccount, Provider};
    use crate::config::SyncConfig;
    use crate::error::AuthError;
    use crate::oauth::{OAuthProvider, TokenPair};
    use crate::store::{Database, LibSqlBackend};
    use crate::sync::engine::tests::{FakeMailApi, remote};

    struct FakeGoogle {
        refuse: bool,
    }

    #[async_trait]
    impl OAuthProvider for FakeGoogle {
        fn provider(&self) -> Provider {
            Provider::Gmail
        }

        async fn exchange_code(&self, _: &str, _: &str) -> Result<TokenPair, AuthError> {
            unreachable!("not used by refresh")
        }

        async fn fetch_address(&self, _: &SecretString) -> Result<String, AuthError> {
            unreachable!("not used by refresh")
        }

        async fn refresh(&self, _: &SecretString) -> Result<TokenPair, AuthError> {
            if self.refuse {
                return Err(AuthError::Rejected {
                    provider: Provider::Gmail,
                    status: 400,
                    reason: "invalid_grant: Token has been revoked.".into(),
                });
            }
            Ok(TokenPair {
                access_token: SecretString::from("fresh-access"),
                refresh_token: None,
                expires_in: Some(3599),
            })
        }
    }

    struct Harness {
        db: Arc<dyn Database>,
        api: Arc<FakeMailApi>,
        engine: SyncEngine,
        registry: AccountRegistry,
        account_id: Uuid,
    }

    async fn harness() -> Harness {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let registry = AccountRegistry::new(db.clone());
        let account = registry
            .register(&MailboxAccount::new(
                "user-1",
                Provider::Gmail,
                "me@gmail.com",
                TokenPair {
                    access_token: SecretString::from("stale-access"),
                    refresh_token: Some(SecretString::from("refresh-1")),
                    expires_in: None,
                },
            ))
            .await
            .unwrap();
        let api = Arc::new(FakeMailApi::new(Provider::Gmail, vec![remote("m1", 5)]));
        let engine = SyncEngine::new(db.clone(), SyncConfig::default()).with_mail_api(api.clone());
        Harness {
            db,
            api,
            engine,
            registry,
            account_id: account.id,
        }
    }

    fn broker(refuse: bool) -> TokenBroker {
        TokenBroker::new().with_provider(Arc::new(FakeGoogle { refuse }))
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_retried_once() {
        let h = harness().await;
        h.api.reject_next(1);

        let ingested = sync_with_refresh(&h.engine, &broker(false), &h.registry, h.account_id)
            .await
            .unwrap();
        assert_eq!(ingested, 1);

        let account = h.registry.get(h.account_id).await.unwrap().unwrap();
        assert!(account.connected);
        assert_eq!(account.access_token.expose_secret(), "fresh-access");
        assert_eq!(
            account.refresh_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("refresh-1".to_string())
        );
    }

    #[tokio::test]
    async fn second_expiry_disconnects_account() {
        let h = harness().await;
        h.api.reject_next(2);

        let err = sync_with_refresh(&h.engine, &broker(false), &h.registry, h.account_id)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::TokenExpired(_)));

        let account = h.registry.get(h.account_id).await.unwrap().unwrap();
        assert!(!account.connected);
        assert_eq!(h.db.count_messages_for_account(h.account_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refused_refresh_disconnects_without_retry() {
        let h = harness().await;
        h.api.reject_next(1);

        let err = sync_with_refresh(&h.engine, &broker(true), &h.registry, h.account_id)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Refresh { .. }));
        assert_eq!(
            h.api.calls.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        assert!(!h.registry.get(h.account_id).await.unwrap().unwrap().connected);
    }

    #[tokio::test]
    async fn unconfigured_oauth_client_keeps_account_connected() {
        let h = harness().await;
        h.api.reject_next(1);

        let err = sync_with_refresh(&h.engine, &TokenBroker::new(), &h.registry, h.account_id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Refresh {
                source: AuthError::UnsupportedProvider(Provider::Gmail),
                ..
            }
        ));
        assert!(h.registry.get(h.account_id).await.unwrap().unwrap().connected);

        // Once the client is configured the next run recovers.
        let ingested = sync_with_refresh(&h.engine, &broker(false), &h.registry, h.account_id)
            .await
            .unwrap();
        assert_eq!(ingested, 1);
    }

    #[tokio::test]
    async fn healthy_sync_does_not_refresh() {
        let h = harness().await;
        let ingested = sync_with_refresh(&h.engine, &broker(true), &h.registry, h.account_id)
            .await
            .unwrap();
        assert_eq!(ingested, 1);
        let account = h.registry.get(h.account_id).await.unwrap().unwrap();
        assert_eq!(account.access_token.expose_secret(), "stale-access");
    }
}
