//! Request and response payloads for the HTTP surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::notification::{Notification, NotificationKind};
use crate::token::{Platform, TokenFilter};

#[derive(Debug, Deserialize)]
pub struct RegisterTokenRequest {
    pub owner_id: String,
    pub platform: Platform,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct UnregisterTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct UnregisterTokenResponse {
    pub invalidated: bool,
}

#[derive(Debug, Deserialize)]
pub struct ActiveTokensQuery {
    pub owner_id: Option<String>,
    pub platform: Option<Platform>,
}

impl ActiveTokensQuery {
    pub fn into_filter(self) -> TokenFilter {
        TokenFilter {
            owner_id: self.owner_id,
            platform: self.platform,
        }
    }
}

/// Notification content as submitted by a client.
#[derive(Debug, Deserialize)]
pub struct NotificationRequest {
    #[serde(default)]
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl NotificationRequest {
    pub fn into_notification(self) -> Notification {
        let mut builder = Notification::builder(self.title, self.body).kind(self.kind);
        for (key, value) in self.data {
            builder = builder.data(key, value);
        }
        builder.build()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub notification: NotificationRequest,
    #[serde(default)]
    pub target_filter: TokenFilter,
}

#[derive(Debug, Deserialize)]
pub struct DirectSendRequest {
    pub owner_id: String,
    pub notification: NotificationRequest,
}

#[derive(Debug, Deserialize)]
pub struct OutcomeBreakdownQuery {
    pub owner_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_request_builds_payload() {
        let request: NotificationRequest = serde_json::from_str(
            r#"{"kind": "PROMOTIONAL", "title": "Sale", "body": "20% off", "data": {"sku": "42"}}"#,
        )
        .unwrap();

        let notification = request.into_notification();
        assert_eq!(notification.kind, NotificationKind::Promotional);
        assert_eq!(notification.data.get("sku").unwrap(), "42");
    }

    #[test]
    fn test_kind_defaults_to_custom() {
        let request: NotificationRequest =
            serde_json::from_str(r#"{"title": "Hi", "body": "There"}"#).unwrap();
        assert_eq!(request.kind, NotificationKind::Custom);
    }
}
