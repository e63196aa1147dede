//! Direct (non-campaign) notification endpoints

use axum::{extract::State, Json};

use crate::campaign::DirectSendSummary;
use crate::error::Result;
use crate::server::AppState;

use super::models::DirectSendRequest;

/// Send one notification to every active token of one owner
#[tracing::instrument(
    name = "http.send_notification",
    skip(state, request),
    fields(owner_id = %request.owner_id)
)]
pub async fn send_notification(
    State(state): State<AppState>,
    Json(request): Json<DirectSendRequest>,
) -> Result<Json<DirectSendSummary>> {
    let summary = state
        .orchestrator
        .send_direct(&request.owner_id, request.notification.into_notification())
        .await?;
    Ok(Json(summary))
}
