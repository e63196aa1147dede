//! Device token endpoints

use axum::{
    extract::{Query, State},
    Json,
};

use crate::error::Result;
use crate::server::AppState;
use crate::token::DeviceToken;

use super::models::{
    ActiveTokensQuery, RegisterTokenRequest, UnregisterTokenRequest, UnregisterTokenResponse,
};

/// Register and validate a device token
#[tracing::instrument(
    name = "http.register_token",
    skip(state, request),
    fields(owner_id = %request.owner_id, platform = %request.platform)
)]
pub async fn register_token(
    State(state): State<AppState>,
    Json(request): Json<RegisterTokenRequest>,
) -> Result<Json<DeviceToken>> {
    let device = state
        .registry
        .register(&request.owner_id, request.platform, request.token)
        .await?;
    Ok(Json(device))
}

/// Retire a device token, e.g. on logout
#[tracing::instrument(name = "http.unregister_token", skip(state, request))]
pub async fn unregister_token(
    State(state): State<AppState>,
    Json(request): Json<UnregisterTokenRequest>,
) -> Result<Json<UnregisterTokenResponse>> {
    let invalidated = state.registry.invalidate(&request.token).await?;
    Ok(Json(UnregisterTokenResponse { invalidated }))
}

/// Admin recipients view: all valid tokens matching the filter
#[tracing::instrument(name = "http.list_active_tokens", skip(state, query))]
pub async fn list_active_tokens(
    State(state): State<AppState>,
    Query(query): Query<ActiveTokensQuery>,
) -> Result<Json<Vec<DeviceToken>>> {
    let tokens = state.registry.active_tokens(&query.into_filter()).await?;
    Ok(Json(tokens))
}
