use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::DispatchOutcome;
use crate::notification::Notification;
use crate::token::TokenFilter;

/// Campaign lifecycle state.
///
/// DRAFT → SENDING → {COMPLETED, FAILED}; a campaign never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CampaignStatus {
    Draft,
    Sending,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "DRAFT",
            CampaignStatus::Sending => "SENDING",
            CampaignStatus::Completed => "COMPLETED",
            CampaignStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DRAFT" => Some(CampaignStatus::Draft),
            "SENDING" => Some(CampaignStatus::Sending),
            "COMPLETED" => Some(CampaignStatus::Completed),
            "FAILED" => Some(CampaignStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Failed)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification fanned out to many tokens.
///
/// The campaign owns its notification outright; no other entity references
/// the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub notification: Notification,
    pub target_filter: TokenFilter,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Create a new campaign in DRAFT state.
    pub fn draft(notification: Notification, target_filter: TokenFilter) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification,
            target_filter,
            status: CampaignStatus::Draft,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// One terminal delivery outcome for one (campaign, token) pair.
///
/// Append-only: records are written once after the attempt reaches a
/// terminal outcome and never updated. The token field is a weak reference
/// into the token store, not an owned value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    /// Owning campaign; `None` for direct (non-campaign) sends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<Uuid>,
    pub token: String,
    pub outcome: DispatchOutcome,
    pub attempted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl DispatchRecord {
    pub fn new(
        campaign_id: Option<Uuid>,
        token: impl Into<String>,
        outcome: DispatchOutcome,
        error_detail: Option<String>,
    ) -> Self {
        Self {
            campaign_id,
            token: token.into(),
            outcome,
            attempted_at: Utc::now(),
            error_detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_campaign() {
        let campaign = Campaign::draft(
            Notification::builder("title", "body").build(),
            TokenFilter::default(),
        );
        assert_eq!(campaign.status, CampaignStatus::Draft);
        assert!(campaign.completed_at.is_none());
        assert!(!campaign.status.is_terminal());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Sending,
            CampaignStatus::Completed,
            CampaignStatus::Failed,
        ] {
            assert_eq!(CampaignStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CampaignStatus::parse("ARCHIVED"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(CampaignStatus::Completed.is_terminal());
        assert!(CampaignStatus::Failed.is_terminal());
        assert!(!CampaignStatus::Sending.is_terminal());
    }
}
