//! Cross-campaign reporting endpoints

use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    Json,
};

use crate::error::Result;
use crate::reporting::CampaignStats;
use crate::server::AppState;

use super::models::OutcomeBreakdownQuery;

/// Outcome counts grouped by token platform, optionally for one owner
#[tracing::instrument(name = "http.outcome_breakdown", skip(state, query))]
pub async fn outcome_breakdown(
    State(state): State<AppState>,
    Query(query): Query<OutcomeBreakdownQuery>,
) -> Result<Json<BTreeMap<String, CampaignStats>>> {
    let breakdown = state
        .reporting
        .outcome_breakdown(query.owner_id.as_deref())
        .await?;
    Ok(Json(breakdown))
}
