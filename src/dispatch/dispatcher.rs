use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::{GatewayResponse, PushGateway};
use crate::metrics::{GATEWAY_TIMEOUTS_TOTAL, TOKENS_INVALIDATED_TOTAL};
use crate::notification::Notification;
use crate::storage::TokenStore;
use crate::token::{DeviceToken, TokenStatus};

/// Terminal classification of one delivery attempt, as persisted in the
/// dispatch ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchOutcome {
    /// The gateway confirmed delivery
    Delivered,
    /// The gateway rejected the token as unregistered, expired or malformed
    InvalidToken,
    /// Transient gateway failure, possibly after retry exhaustion
    TransientError,
    /// The token was invalidated between target resolution and dispatch
    Skipped,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Delivered => "DELIVERED",
            DispatchOutcome::InvalidToken => "INVALID_TOKEN",
            DispatchOutcome::TransientError => "TRANSIENT_ERROR",
            DispatchOutcome::Skipped => "SKIPPED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DELIVERED" => Some(DispatchOutcome::Delivered),
            "INVALID_TOKEN" => Some(DispatchOutcome::InvalidToken),
            "TRANSIENT_ERROR" => Some(DispatchOutcome::TransientError),
            "SKIPPED" => Some(DispatchOutcome::Skipped),
            _ => None,
        }
    }

    /// Outcomes reported by `failed_notifications`.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::InvalidToken | DispatchOutcome::TransientError
        )
    }
}

impl std::fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single gateway call, classified.
#[derive(Debug, Clone)]
pub struct DispatchAttempt {
    pub outcome: DispatchOutcome,
    pub error_detail: Option<String>,
}

impl DispatchAttempt {
    fn delivered() -> Self {
        Self {
            outcome: DispatchOutcome::Delivered,
            error_detail: None,
        }
    }

    fn invalid_token(reason: String) -> Self {
        Self {
            outcome: DispatchOutcome::InvalidToken,
            error_detail: Some(reason),
        }
    }

    fn transient(reason: String) -> Self {
        Self {
            outcome: DispatchOutcome::TransientError,
            error_detail: Some(reason),
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.outcome == DispatchOutcome::Delivered
    }

    pub fn is_invalid_token(&self) -> bool {
        self.outcome == DispatchOutcome::InvalidToken
    }

    pub fn is_transient(&self) -> bool {
        self.outcome == DispatchOutcome::TransientError
    }
}

/// Sends one payload to one token and classifies the gateway response.
///
/// Performs exactly one remote call per invocation. The only state the
/// dispatcher ever mutates is the token record itself: a gateway-reported
/// invalid token is immediately marked INVALID so later campaigns stop
/// resolving it. This is the single place token lifecycle and delivery
/// failure are coupled.
pub struct Dispatcher {
    gateway: Arc<dyn PushGateway>,
    tokens: Arc<dyn TokenStore>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        gateway: Arc<dyn PushGateway>,
        tokens: Arc<dyn TokenStore>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            tokens,
            send_timeout,
        }
    }

    /// Push one notification to one device token.
    #[tracing::instrument(
        name = "dispatcher.send",
        skip(self, device, notification),
        fields(token = %device.token, notification_id = %notification.id)
    )]
    pub async fn send(&self, device: &DeviceToken, notification: &Notification) -> DispatchAttempt {
        let response = match tokio::time::timeout(
            self.send_timeout,
            self.gateway.push(&device.token, notification),
        )
        .await
        {
            Ok(response) => response,
            Err(_) => {
                GATEWAY_TIMEOUTS_TOTAL.inc();
                tracing::warn!(
                    token = %device.token,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Gateway call timed out"
                );
                return DispatchAttempt::transient(format!(
                    "gateway call timed out after {}ms",
                    self.send_timeout.as_millis()
                ));
            }
        };

        match response {
            GatewayResponse::Delivered { message_id } => {
                tracing::debug!(
                    token = %device.token,
                    message_id = %message_id,
                    "Gateway confirmed delivery"
                );
                DispatchAttempt::delivered()
            }
            GatewayResponse::InvalidToken { reason } => {
                tracing::info!(
                    token = %device.token,
                    reason = %reason,
                    "Gateway rejected token, invalidating"
                );
                match self
                    .tokens
                    .set_status(&device.token, TokenStatus::Invalid, None)
                    .await
                {
                    Ok(true) => TOKENS_INVALIDATED_TOTAL.inc(),
                    Ok(false) => {}
                    Err(e) => {
                        // The dispatch outcome is still INVALID_TOKEN; the next
                        // campaign will hit the same rejection and retry the write.
                        tracing::warn!(
                            token = %device.token,
                            error = %e,
                            "Failed to invalidate rejected token"
                        );
                    }
                }
                DispatchAttempt::invalid_token(reason)
            }
            GatewayResponse::Transient { reason } => {
                tracing::debug!(
                    token = %device.token,
                    reason = %reason,
                    "Transient gateway failure"
                );
                DispatchAttempt::transient(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryTokenStore;
    use crate::token::Platform;
    use async_trait::async_trait;

    struct FixedGateway {
        response: GatewayResponse,
    }

    #[async_trait]
    impl PushGateway for FixedGateway {
        async fn push(&self, _token: &str, _notification: &Notification) -> GatewayResponse {
            self.response.clone()
        }
    }

    struct HangingGateway;

    #[async_trait]
    impl PushGateway for HangingGateway {
        async fn push(&self, _token: &str, _notification: &Notification) -> GatewayResponse {
            tokio::time::sleep(Duration::from_secs(60)).await;
            GatewayResponse::delivered("never")
        }
    }

    async fn valid_token(store: &MemoryTokenStore) -> DeviceToken {
        let mut device = DeviceToken::pending("user-1", Platform::Web, "tok-1");
        device.status = TokenStatus::Valid;
        store.upsert(device.clone()).await.unwrap();
        device
    }

    fn dispatcher(gateway: impl PushGateway + 'static, store: Arc<MemoryTokenStore>) -> Dispatcher {
        Dispatcher::new(Arc::new(gateway), store, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_delivered_maps_to_delivered() {
        let store = Arc::new(MemoryTokenStore::new());
        let device = valid_token(&store).await;
        let dispatcher = dispatcher(
            FixedGateway {
                response: GatewayResponse::delivered("msg-1"),
            },
            store.clone(),
        );

        let attempt = dispatcher
            .send(&device, &Notification::builder("t", "b").build())
            .await;
        assert!(attempt.is_delivered());
        assert!(attempt.error_detail.is_none());

        // No token mutation on success
        let stored = store.get("tok-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TokenStatus::Valid);
    }

    #[tokio::test]
    async fn test_invalid_token_invalidates_record() {
        let store = Arc::new(MemoryTokenStore::new());
        let device = valid_token(&store).await;
        let dispatcher = dispatcher(
            FixedGateway {
                response: GatewayResponse::invalid_token("unregistered"),
            },
            store.clone(),
        );

        let attempt = dispatcher
            .send(&device, &Notification::builder("t", "b").build())
            .await;
        assert!(attempt.is_invalid_token());
        assert_eq!(attempt.error_detail.as_deref(), Some("unregistered"));

        let stored = store.get("tok-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TokenStatus::Invalid);
    }

    #[tokio::test]
    async fn test_transient_leaves_token_untouched() {
        let store = Arc::new(MemoryTokenStore::new());
        let device = valid_token(&store).await;
        let dispatcher = dispatcher(
            FixedGateway {
                response: GatewayResponse::transient("503 from gateway"),
            },
            store.clone(),
        );

        let attempt = dispatcher
            .send(&device, &Notification::builder("t", "b").build())
            .await;
        assert!(attempt.is_transient());

        let stored = store.get("tok-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TokenStatus::Valid);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let store = Arc::new(MemoryTokenStore::new());
        let device = valid_token(&store).await;
        let dispatcher = dispatcher(HangingGateway, store.clone());

        let attempt = dispatcher
            .send(&device, &Notification::builder("t", "b").build())
            .await;
        assert!(attempt.is_transient());
        assert!(attempt.error_detail.unwrap().contains("timed out"));
    }
}
