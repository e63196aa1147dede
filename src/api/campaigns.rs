//! Campaign endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::campaign::{Campaign, CampaignRunSummary, DispatchRecord};
use crate::error::Result;
use crate::reporting::CampaignStats;
use crate::server::AppState;

use super::models::CreateCampaignRequest;

/// Create a campaign in DRAFT state
#[tracing::instrument(name = "http.create_campaign", skip(state, request))]
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> Result<Json<Campaign>> {
    let campaign = state
        .orchestrator
        .create(request.notification.into_notification(), request.target_filter)
        .await?;
    Ok(Json(campaign))
}

/// All campaigns, newest first
pub async fn list_campaigns(State(state): State<AppState>) -> Result<Json<Vec<Campaign>>> {
    Ok(Json(state.orchestrator.list().await?))
}

/// One campaign by id
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>> {
    Ok(Json(state.orchestrator.campaign(id).await?))
}

/// Fan the campaign out to its resolved target set
#[tracing::instrument(name = "http.send_campaign", skip(state), fields(campaign_id = %id))]
pub async fn send_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignRunSummary>> {
    let summary = state.orchestrator.send(id).await?;
    Ok(Json(summary))
}

/// Failed dispatches: rejected tokens and exhausted transient errors
pub async fn failed_notifications(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DispatchRecord>>> {
    Ok(Json(state.orchestrator.failed_notifications(id).await?))
}

/// Outcome counts recomputed from the campaign's ledger
pub async fn campaign_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignStats>> {
    Ok(Json(state.orchestrator.stats(id).await?))
}
