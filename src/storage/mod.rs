//! Storage layer for tokens, campaigns and the dispatch ledger.
//!
//! Each entity gets its own backend trait so implementations (memory,
//! PostgreSQL) can be used interchangeably. The ledger is append-only and
//! must tolerate concurrent writers without lost updates.

pub mod memory;
pub mod postgres;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::campaign::{Campaign, CampaignStatus, DispatchRecord};
use crate::config::StorageConfig;
use crate::token::{DeviceToken, Platform, TokenFilter, TokenStatus};

use memory::{MemoryCampaignStore, MemoryDispatchLedger, MemoryTokenStore};
use postgres::PostgresStorage;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Compare-and-swap transition lost against the stored state
    #[error("campaign {id} is {actual}, expected {expected}")]
    StateConflict {
        id: Uuid,
        expected: CampaignStatus,
        actual: CampaignStatus,
    },

    /// PostgreSQL operation failed
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be decoded into its domain type
    #[error("invalid stored value: {0}")]
    Decode(String),
}

/// Backend for device-token records.
///
/// Implementations must be thread-safe (`Send + Sync`); the registry and the
/// dispatcher write through the same store concurrently.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert or replace the record keyed by its token string.
    async fn upsert(&self, token: DeviceToken) -> Result<(), StorageError>;

    /// Look up one record by token string.
    async fn get(&self, token: &str) -> Result<Option<DeviceToken>, StorageError>;

    /// Snapshot of all VALID tokens matching the filter.
    async fn find_valid(&self, filter: &TokenFilter) -> Result<Vec<DeviceToken>, StorageError>;

    /// Set the status of one record. Returns whether a record existed.
    ///
    /// `validated_at` is only written when provided, so invalidation keeps
    /// the historical validation timestamp.
    async fn set_status(
        &self,
        token: &str,
        status: TokenStatus,
        validated_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError>;

    /// Mark every non-INVALID token for (owner, platform) other than `keep`
    /// as INVALID. Returns the number of superseded records.
    async fn supersede(
        &self,
        owner_id: &str,
        platform: Platform,
        keep: &str,
    ) -> Result<usize, StorageError>;
}

/// Backend for campaign records.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert(&self, campaign: Campaign) -> Result<(), StorageError>;

    async fn get(&self, id: Uuid) -> Result<Option<Campaign>, StorageError>;

    /// All campaigns, newest first.
    async fn list(&self) -> Result<Vec<Campaign>, StorageError>;

    async fn find_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>, StorageError>;

    /// Atomic compare-and-swap of the campaign status.
    ///
    /// Fails with `StateConflict` when the stored status differs from
    /// `from`, which is what makes double-send impossible.
    async fn transition(
        &self,
        id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Campaign, StorageError>;
}

/// Append-only ledger of terminal dispatch outcomes.
#[async_trait]
pub trait DispatchLedger: Send + Sync {
    /// Append one terminal outcome. Must be safe under concurrent writers.
    async fn append(&self, record: DispatchRecord) -> Result<(), StorageError>;

    /// All records for one campaign.
    async fn for_campaign(&self, campaign_id: Uuid) -> Result<Vec<DispatchRecord>, StorageError>;

    /// Token strings that already have a record for this campaign. Used to
    /// resume interrupted campaigns by set difference.
    async fn attempted_tokens(&self, campaign_id: Uuid) -> Result<HashSet<String>, StorageError>;

    /// Every record, campaign or direct. Used for cross-campaign reporting.
    async fn all(&self) -> Result<Vec<DispatchRecord>, StorageError>;
}

/// Bundle of the three entity stores backing the service.
#[derive(Clone)]
pub struct Storage {
    pub tokens: Arc<dyn TokenStore>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub ledger: Arc<dyn DispatchLedger>,
}

impl Storage {
    /// All-in-memory storage, used for tests and local development.
    pub fn in_memory() -> Self {
        Self {
            tokens: Arc::new(MemoryTokenStore::new()),
            campaigns: Arc::new(MemoryCampaignStore::new()),
            ledger: Arc::new(MemoryDispatchLedger::new()),
        }
    }
}

/// Create storage backends based on configuration.
///
/// Returns the backend selected by `storage.backend`:
/// - `"postgres"`: connects a pool, runs migrations and returns
///   PostgreSQL-backed stores (requires `storage.postgres_url`)
/// - `"memory"` (default): in-process stores
pub async fn create_storage(settings: &StorageConfig) -> Result<Storage, StorageError> {
    match settings.backend.as_str() {
        "postgres" => {
            if let Some(ref url) = settings.postgres_url {
                tracing::info!(backend = "postgres", "Creating PostgreSQL storage");
                let pg = PostgresStorage::connect(url, settings.max_connections).await?;
                pg.migrate().await?;
                let pg = Arc::new(pg);
                Ok(Storage {
                    tokens: pg.clone(),
                    campaigns: pg.clone(),
                    ledger: pg,
                })
            } else {
                tracing::warn!(
                    "PostgreSQL backend requested but no postgres_url configured, falling back to memory"
                );
                Ok(Storage::in_memory())
            }
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory storage");
            Ok(Storage::in_memory())
        }
    }
}
