use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::campaigns::{
    campaign_stats, create_campaign, failed_notifications, get_campaign, list_campaigns,
    send_campaign,
};
use super::health::health;
use super::metrics::prometheus_metrics;
use super::notifications::send_notification;
use super::reports::outcome_breakdown;
use super::tokens::{list_active_tokens, register_token, unregister_token};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        // Delivery endpoints
        .nest(
            "/api/v1",
            Router::new()
                // Token registry
                .route("/tokens", post(register_token).get(list_active_tokens))
                .route("/tokens/unregister", post(unregister_token))
                // Campaigns
                .route("/campaigns", post(create_campaign).get(list_campaigns))
                .route("/campaigns/{id}", get(get_campaign))
                .route("/campaigns/{id}/send", post(send_campaign))
                .route("/campaigns/{id}/failed", get(failed_notifications))
                .route("/campaigns/{id}/stats", get(campaign_stats))
                // Direct sends
                .route("/notifications/send", post(send_notification))
                // Reporting
                .route("/reports/outcomes", get(outcome_breakdown)),
        )
}
