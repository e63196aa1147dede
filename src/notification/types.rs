use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a notification payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// Free-form message authored by an operator (default)
    #[default]
    Custom,
    /// Promotional content
    Promotional,
    /// Time-sensitive message
    Urgent,
    /// Bulk marketing campaign payload
    MarketingCampaign,
    /// System/maintenance announcement
    SystemUpdate,
    /// Informational message
    Informational,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Custom => "CUSTOM",
            NotificationKind::Promotional => "PROMOTIONAL",
            NotificationKind::Urgent => "URGENT",
            NotificationKind::MarketingCampaign => "MARKETING_CAMPAIGN",
            NotificationKind::SystemUpdate => "SYSTEM_UPDATE",
            NotificationKind::Informational => "INFORMATIONAL",
        }
    }
}

/// A push payload. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique identifier for this notification
    pub id: Uuid,
    /// Payload classification
    pub kind: NotificationKind,
    /// Display title (empty for silent data-only payloads)
    pub title: String,
    /// Display body
    pub body: String,
    /// Additional key/value data delivered alongside the display content
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    /// When the payload was created
    pub created_at: DateTime<Utc>,
}

/// Builder for notifications
#[derive(Debug, Clone)]
pub struct NotificationBuilder {
    kind: NotificationKind,
    title: String,
    body: String,
    data: BTreeMap<String, String>,
}

impl NotificationBuilder {
    /// Create a new notification builder
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::default(),
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    /// Set the payload classification
    pub fn kind(mut self, kind: NotificationKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attach a data entry
    pub fn data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Build the notification
    pub fn build(self) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            kind: self.kind,
            title: self.title,
            body: self.body,
            data: self.data,
            created_at: Utc::now(),
        }
    }
}

impl Notification {
    /// Create a builder for a notification
    pub fn builder(title: impl Into<String>, body: impl Into<String>) -> NotificationBuilder {
        NotificationBuilder::new(title, body)
    }

    /// The silent data-only payload used to validate a freshly registered
    /// token against the gateway. Never recorded in the dispatch ledger.
    pub fn validation_probe() -> Self {
        NotificationBuilder::new("", "")
            .kind(NotificationKind::SystemUpdate)
            .data("type", "token_validation")
            .data("silent", "true")
            .build()
    }

    /// A payload with no display content is delivered silently.
    pub fn is_silent(&self) -> bool {
        self.title.is_empty() && self.body.is_empty()
    }
}
