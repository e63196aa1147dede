//! Logging push gateway.

use async_trait::async_trait;
use uuid::Uuid;

use crate::notification::Notification;

use super::{GatewayResponse, PushGateway};

/// Gateway stand-in that acknowledges every send.
///
/// Used when no real provider is configured. Every push is logged with its
/// synthetic message id so delivery flow stays traceable end-to-end in
/// environments without gateway credentials.
pub struct LogGateway;

impl LogGateway {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushGateway for LogGateway {
    async fn push(&self, token: &str, notification: &Notification) -> GatewayResponse {
        let message_id = Uuid::new_v4().to_string();

        tracing::info!(
            token = %token,
            notification_id = %notification.id,
            kind = %notification.kind.as_str(),
            silent = notification.is_silent(),
            message_id = %message_id,
            "Push accepted by logging gateway"
        );

        GatewayResponse::Delivered { message_id }
    }
}
