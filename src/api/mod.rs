//! API layer - HTTP endpoint handlers organized by domain.
//!
//! Handlers are thin adapters over the registry, orchestrator and reporting
//! services; no business logic lives here.

mod campaigns;
mod health;
mod metrics;
mod models;
mod notifications;
mod reports;
mod routes;
mod tokens;

pub use campaigns::{
    campaign_stats, create_campaign, failed_notifications, get_campaign, list_campaigns,
    send_campaign,
};
pub use health::health;
pub use metrics::prometheus_metrics;
pub use models::{
    ActiveTokensQuery, CreateCampaignRequest, DirectSendRequest, NotificationRequest,
    OutcomeBreakdownQuery, RegisterTokenRequest, UnregisterTokenRequest, UnregisterTokenResponse,
};
pub use notifications::send_notification;
pub use reports::outcome_breakdown;
pub use routes::api_routes;
pub use tokens::{list_active_tokens, register_token, unregister_token};
