//! Push gateway abstraction.
//!
//! The remote push provider is modeled as a capability trait so the
//! dispatcher can be exercised with deterministic test doubles. Integrating
//! a real provider SDK is out of scope; the shipped provider acknowledges
//! every send and logs it, which keeps local environments working without
//! gateway credentials.

mod log_gateway;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::GatewayConfig;
use crate::notification::Notification;

pub use log_gateway::LogGateway;

/// Classified response of one gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResponse {
    /// The gateway accepted the payload for delivery
    Delivered { message_id: String },
    /// The gateway reported the token as unregistered, expired or malformed
    InvalidToken { reason: String },
    /// Network failure, timeout, rate limit or gateway-side 5xx
    Transient { reason: String },
}

impl GatewayResponse {
    pub fn delivered(message_id: impl Into<String>) -> Self {
        GatewayResponse::Delivered {
            message_id: message_id.into(),
        }
    }

    pub fn invalid_token(reason: impl Into<String>) -> Self {
        GatewayResponse::InvalidToken {
            reason: reason.into(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        GatewayResponse::Transient {
            reason: reason.into(),
        }
    }
}

/// Capability interface to the remote push provider.
///
/// One call pushes one payload to one token. Implementations must not retry
/// internally; retry policy belongs to the campaign orchestrator. Timeouts
/// are applied by the caller.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn push(&self, token: &str, notification: &Notification) -> GatewayResponse;
}

/// Create a push gateway from configuration.
///
/// Unknown providers fall back to the logging gateway so a misconfigured
/// environment stays observable instead of failing at startup.
pub fn create_gateway(settings: &GatewayConfig) -> Arc<dyn PushGateway> {
    match settings.provider.as_str() {
        "log" => {
            tracing::info!(provider = "log", "Creating logging push gateway");
            Arc::new(LogGateway::new())
        }
        other => {
            tracing::warn!(
                provider = %other,
                "Unknown push gateway provider, falling back to logging gateway"
            );
            Arc::new(LogGateway::new())
        }
    }
}
