use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform the device token was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Platform {
    Web,
    Android,
    Ios,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Web => "WEB",
            Platform::Android => "ANDROID",
            Platform::Ios => "IOS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "WEB" => Some(Platform::Web),
            "ANDROID" => Some(Platform::Android),
            "IOS" => Some(Platform::Ios),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation state of a device token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenStatus {
    /// Registered but not yet confirmed by the gateway
    Pending,
    /// Confirmed deliverable
    Valid,
    /// Rejected by the gateway or superseded by a newer registration
    Invalid,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Pending => "PENDING",
            TokenStatus::Valid => "VALID",
            TokenStatus::Invalid => "INVALID",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(TokenStatus::Pending),
            "VALID" => Some(TokenStatus::Valid),
            "INVALID" => Some(TokenStatus::Invalid),
            _ => None,
        }
    }
}

/// A device push token owned by one user on one platform.
///
/// The opaque token string is the primary key. Records are superseded, never
/// deleted, so a dispatch record written years ago still resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceToken {
    /// Opaque gateway-issued token string
    pub token: String,
    /// Owning user
    pub owner_id: String,
    /// Issuing platform
    pub platform: Platform,
    /// Validation state
    pub status: TokenStatus,
    /// When the registration request was first seen
    pub created_at: DateTime<Utc>,
    /// When the gateway last confirmed the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl DeviceToken {
    /// Create a fresh registration in PENDING state.
    pub fn pending(owner_id: impl Into<String>, platform: Platform, token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            owner_id: owner_id.into(),
            platform,
            status: TokenStatus::Pending,
            created_at: Utc::now(),
            last_validated_at: None,
        }
    }
}

/// Declarative selection criterion resolved to a concrete token set at send
/// time. An empty filter matches every valid token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl TokenFilter {
    /// Filter matching every token of one owner.
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            platform: None,
        }
    }

    /// Filter matching one platform across all owners.
    pub fn platform(platform: Platform) -> Self {
        Self {
            owner_id: None,
            platform: Some(platform),
        }
    }

    pub fn matches(&self, token: &DeviceToken) -> bool {
        if let Some(ref owner_id) = self.owner_id {
            if token.owner_id != *owner_id {
                return false;
            }
        }
        if let Some(platform) = self.platform {
            if token.platform != platform {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_token() {
        let token = DeviceToken::pending("user-1", Platform::Web, "tok-abc");
        assert_eq!(token.status, TokenStatus::Pending);
        assert!(token.last_validated_at.is_none());
    }

    #[test]
    fn test_filter_matching() {
        let token = DeviceToken::pending("user-1", Platform::Android, "tok-abc");

        assert!(TokenFilter::default().matches(&token));
        assert!(TokenFilter::owner("user-1").matches(&token));
        assert!(!TokenFilter::owner("user-2").matches(&token));
        assert!(TokenFilter::platform(Platform::Android).matches(&token));
        assert!(!TokenFilter::platform(Platform::Ios).matches(&token));

        let combined = TokenFilter {
            owner_id: Some("user-1".to_string()),
            platform: Some(Platform::Android),
        };
        assert!(combined.matches(&token));
    }

    #[test]
    fn test_platform_roundtrip() {
        for platform in [Platform::Web, Platform::Android, Platform::Ios] {
            assert_eq!(Platform::parse(platform.as_str()), Some(platform));
        }
        assert_eq!(Platform::parse("DESKTOP"), None);
    }
}
