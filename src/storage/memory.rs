//! In-memory storage backends using DashMap.
//!
//! State is lost on restart; intended for tests and local development.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::campaign::{Campaign, CampaignStatus, DispatchRecord};
use crate::token::{DeviceToken, Platform, TokenFilter, TokenStatus};

use super::{CampaignStore, DispatchLedger, StorageError, TokenStore};

/// In-memory token store keyed by the opaque token string.
pub struct MemoryTokenStore {
    tokens: DashMap<String, DeviceToken>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
        }
    }
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn upsert(&self, token: DeviceToken) -> Result<(), StorageError> {
        self.tokens.insert(token.token.clone(), token);
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<DeviceToken>, StorageError> {
        Ok(self.tokens.get(token).map(|entry| entry.clone()))
    }

    async fn find_valid(&self, filter: &TokenFilter) -> Result<Vec<DeviceToken>, StorageError> {
        let mut matches: Vec<DeviceToken> = self
            .tokens
            .iter()
            .filter(|entry| entry.status == TokenStatus::Valid && filter.matches(entry))
            .map(|entry| entry.clone())
            .collect();

        // Deterministic order for stable pagination and tests
        matches.sort_by(|a, b| a.token.cmp(&b.token));
        Ok(matches)
    }

    async fn set_status(
        &self,
        token: &str,
        status: TokenStatus,
        validated_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        match self.tokens.get_mut(token) {
            Some(mut entry) => {
                entry.status = status;
                if validated_at.is_some() {
                    entry.last_validated_at = validated_at;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn supersede(
        &self,
        owner_id: &str,
        platform: Platform,
        keep: &str,
    ) -> Result<usize, StorageError> {
        let mut superseded = 0;
        for mut entry in self.tokens.iter_mut() {
            if entry.owner_id == owner_id
                && entry.platform == platform
                && entry.token != keep
                && entry.status != TokenStatus::Invalid
            {
                entry.status = TokenStatus::Invalid;
                superseded += 1;
            }
        }
        Ok(superseded)
    }
}

/// In-memory campaign store.
pub struct MemoryCampaignStore {
    campaigns: DashMap<Uuid, Campaign>,
}

impl MemoryCampaignStore {
    pub fn new() -> Self {
        Self {
            campaigns: DashMap::new(),
        }
    }
}

impl Default for MemoryCampaignStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn insert(&self, campaign: Campaign) -> Result<(), StorageError> {
        self.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Campaign>, StorageError> {
        Ok(self.campaigns.get(&id).map(|entry| entry.clone()))
    }

    async fn list(&self) -> Result<Vec<Campaign>, StorageError> {
        let mut campaigns: Vec<Campaign> =
            self.campaigns.iter().map(|entry| entry.clone()).collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }

    async fn find_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>, StorageError> {
        Ok(self
            .campaigns
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Campaign, StorageError> {
        // The DashMap entry guard serializes concurrent transitions,
        // making the compare-and-swap atomic.
        match self.campaigns.get_mut(&id) {
            Some(mut entry) => {
                if entry.status != from {
                    return Err(StorageError::StateConflict {
                        id,
                        expected: from,
                        actual: entry.status,
                    });
                }
                entry.status = to;
                if completed_at.is_some() {
                    entry.completed_at = completed_at;
                }
                Ok(entry.clone())
            }
            None => Err(StorageError::NotFound(format!("campaign {id}"))),
        }
    }
}

/// In-memory append-only dispatch ledger.
///
/// A plain mutex-guarded vector: appends are short critical sections and the
/// serialization is exactly the lost-update protection the ledger needs.
pub struct MemoryDispatchLedger {
    records: Mutex<Vec<DispatchRecord>>,
}

impl MemoryDispatchLedger {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DispatchRecord>> {
        // A poisoned ledger still holds every append that completed
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryDispatchLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchLedger for MemoryDispatchLedger {
    async fn append(&self, record: DispatchRecord) -> Result<(), StorageError> {
        let mut records = self.lock();
        records.push(record);
        Ok(())
    }

    async fn for_campaign(&self, campaign_id: Uuid) -> Result<Vec<DispatchRecord>, StorageError> {
        let records = self.lock();
        Ok(records
            .iter()
            .filter(|r| r.campaign_id == Some(campaign_id))
            .cloned()
            .collect())
    }

    async fn attempted_tokens(&self, campaign_id: Uuid) -> Result<HashSet<String>, StorageError> {
        let records = self.lock();
        Ok(records
            .iter()
            .filter(|r| r.campaign_id == Some(campaign_id))
            .map(|r| r.token.clone())
            .collect())
    }

    async fn all(&self) -> Result<Vec<DispatchRecord>, StorageError> {
        let records = self.lock();
        Ok(records.clone())
    }
}
