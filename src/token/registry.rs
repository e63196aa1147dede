use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::dispatch::Dispatcher;
use crate::error::{AppError, Result};
use crate::metrics::{TOKENS_INVALIDATED_TOTAL, TOKENS_REGISTERED_TOTAL};
use crate::notification::Notification;
use crate::storage::TokenStore;

use super::{DeviceToken, Platform, TokenFilter, TokenStatus};

/// Owns device-token records and their validation lifecycle.
///
/// Registration validates the token against the gateway with a silent probe
/// before it becomes addressable. A successful registration supersedes any
/// prior token for the same (owner, platform): the old record is marked
/// INVALID, never deleted.
pub struct TokenRegistry {
    store: Arc<dyn TokenStore>,
    dispatcher: Arc<Dispatcher>,
    /// Serializes registrations per (owner, platform) so a racing pair
    /// cannot leave two VALID tokens for one key
    registration_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TokenRegistry {
    pub fn new(store: Arc<dyn TokenStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            registration_locks: DashMap::new(),
        }
    }

    /// Register a device token for one owner on one platform.
    ///
    /// The record is persisted PENDING, then validated with a silent probe:
    /// - gateway accepts → prior tokens for the key are superseded and the
    ///   record becomes VALID
    /// - gateway rejects the token → the record becomes INVALID and the call
    ///   fails with a validation error
    /// - transient gateway failure → the record stays PENDING and the call
    ///   fails with a transient error; the caller may retry
    ///
    /// The validation probe is not a delivery: no dispatch record is written.
    #[tracing::instrument(
        name = "registry.register",
        skip(self, token),
        fields(owner_id = %owner_id, platform = %platform)
    )]
    pub async fn register(
        &self,
        owner_id: &str,
        platform: Platform,
        token: String,
    ) -> Result<DeviceToken> {
        let key = format!("{owner_id}:{platform}");
        let lock = self
            .registration_locks
            .entry(key)
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let mut device = DeviceToken::pending(owner_id, platform, token);
        self.store.upsert(device.clone()).await?;

        let probe = Notification::validation_probe();
        let attempt = self.dispatcher.send(&device, &probe).await;

        if attempt.is_delivered() {
            let superseded = self
                .store
                .supersede(owner_id, platform, &device.token)
                .await?;
            if superseded > 0 {
                tracing::info!(
                    owner_id = %owner_id,
                    platform = %platform,
                    superseded = superseded,
                    "Superseded prior tokens"
                );
            }

            device.status = TokenStatus::Valid;
            device.last_validated_at = Some(Utc::now());
            self.store.upsert(device.clone()).await?;

            TOKENS_REGISTERED_TOTAL
                .with_label_values(&[platform.as_str()])
                .inc();
            tracing::info!(owner_id = %owner_id, platform = %platform, "Token registered");
            Ok(device)
        } else if attempt.is_invalid_token() {
            // The dispatcher already marked the record INVALID
            Err(AppError::Validation(
                attempt
                    .error_detail
                    .unwrap_or_else(|| "token rejected by gateway".to_string()),
            ))
        } else {
            // Record stays PENDING so a retry can pick it up
            Err(AppError::Transient(
                attempt
                    .error_detail
                    .unwrap_or_else(|| "gateway unavailable".to_string()),
            ))
        }
    }

    /// Snapshot of all VALID tokens matching the filter.
    ///
    /// Not a live view: a token invalidated after this call returns may
    /// still be in the result, and dispatch treats that as a normal
    /// INVALID_TOKEN outcome.
    pub async fn active_tokens(&self, filter: &TokenFilter) -> Result<Vec<DeviceToken>> {
        Ok(self.store.find_valid(filter).await?)
    }

    /// Look up one token record.
    pub async fn token(&self, token: &str) -> Result<Option<DeviceToken>> {
        Ok(self.store.get(token).await?)
    }

    /// Mark a token INVALID regardless of its current state.
    ///
    /// Idempotent; returns whether a record existed.
    pub async fn invalidate(&self, token: &str) -> Result<bool> {
        let existed = self
            .store
            .set_status(token, TokenStatus::Invalid, None)
            .await?;
        if existed {
            TOKENS_INVALIDATED_TOTAL.inc();
            tracing::info!(token = %token, "Token invalidated");
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayResponse, PushGateway};
    use crate::storage::memory::MemoryTokenStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedGateway {
        response: GatewayResponse,
    }

    #[async_trait]
    impl PushGateway for FixedGateway {
        async fn push(&self, _token: &str, _notification: &Notification) -> GatewayResponse {
            self.response.clone()
        }
    }

    fn registry_with(response: GatewayResponse) -> (TokenRegistry, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(FixedGateway { response }),
            store.clone(),
            Duration::from_secs(1),
        ));
        (TokenRegistry::new(store.clone(), dispatcher), store)
    }

    #[tokio::test]
    async fn test_register_valid_token() {
        let (registry, _store) = registry_with(GatewayResponse::delivered("msg-1"));

        let device = registry
            .register("user-1", Platform::Web, "tok-1".to_string())
            .await
            .unwrap();

        assert_eq!(device.status, TokenStatus::Valid);
        assert!(device.last_validated_at.is_some());

        let active = registry
            .active_tokens(&TokenFilter::owner("user-1"))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token, "tok-1");
    }

    #[tokio::test]
    async fn test_register_rejected_token() {
        let (registry, store) = registry_with(GatewayResponse::invalid_token("unregistered"));

        let err = registry
            .register("user-1", Platform::Web, "tok-bad".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Record persisted INVALID, never addressable
        let stored = store.get("tok-bad").await.unwrap().unwrap();
        assert_eq!(stored.status, TokenStatus::Invalid);
        let active = registry
            .active_tokens(&TokenFilter::default())
            .await
            .unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_register_transient_failure_stays_pending() {
        let (registry, store) = registry_with(GatewayResponse::transient("rate limited"));

        let err = registry
            .register("user-1", Platform::Web, "tok-1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Transient(_)));

        let stored = store.get("tok-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TokenStatus::Pending);
    }

    #[tokio::test]
    async fn test_register_supersedes_prior_token() {
        let (registry, store) = registry_with(GatewayResponse::delivered("msg-1"));

        registry
            .register("user-1", Platform::Web, "tok-old".to_string())
            .await
            .unwrap();
        registry
            .register("user-1", Platform::Web, "tok-new".to_string())
            .await
            .unwrap();

        assert_eq!(
            store.get("tok-old").await.unwrap().unwrap().status,
            TokenStatus::Invalid
        );
        assert_eq!(
            store.get("tok-new").await.unwrap().unwrap().status,
            TokenStatus::Valid
        );

        let active = registry
            .active_tokens(&TokenFilter::owner("user-1"))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token, "tok-new");
    }

    #[tokio::test]
    async fn test_concurrent_registration_same_key_leaves_one_valid() {
        let (registry, store) = registry_with(GatewayResponse::delivered("msg-1"));
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .register("user-1", Platform::Web, format!("tok-{i}"))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let valid = store
            .find_valid(&TokenFilter::owner("user-1"))
            .await
            .unwrap();
        assert_eq!(valid.len(), 1, "exactly one token may survive the race");
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let (registry, _store) = registry_with(GatewayResponse::delivered("msg-1"));

        registry
            .register("user-1", Platform::Web, "tok-1".to_string())
            .await
            .unwrap();

        assert!(registry.invalidate("tok-1").await.unwrap());
        assert!(registry.invalidate("tok-1").await.unwrap());
        assert!(!registry.invalidate("tok-unknown").await.unwrap());

        let active = registry
            .active_tokens(&TokenFilter::default())
            .await
            .unwrap();
        assert!(active.is_empty());
    }
}
