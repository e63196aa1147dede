//! PostgreSQL storage backends.
//!
//! One pool-holding struct implements all three store traits. Enum fields
//! are stored as TEXT in their wire spelling; campaign payloads and target
//! filters live in JSONB columns since the campaign owns them outright.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::campaign::{Campaign, CampaignStatus, DispatchRecord};
use crate::dispatch::DispatchOutcome;
use crate::token::{DeviceToken, Platform, TokenFilter, TokenStatus};

use super::{CampaignStore, DispatchLedger, StorageError, TokenStore};

/// PostgreSQL-backed storage for tokens, campaigns and the dispatch ledger.
pub struct PostgresStorage {
    pool: PgPool,
}

type TokenRow = (
    String,
    String,
    String,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

type CampaignRow = (
    Uuid,
    serde_json::Value,
    serde_json::Value,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

type RecordRow = (
    Option<Uuid>,
    String,
    String,
    DateTime<Utc>,
    Option<String>,
);

impl PostgresStorage {
    /// Connect a pool to the given URL.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS device_tokens (
                token TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                last_validated_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_device_tokens_owner
             ON device_tokens (owner_id, platform)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id UUID PRIMARY KEY,
                notification JSONB NOT NULL,
                target_filter JSONB NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dispatch_results (
                id BIGSERIAL PRIMARY KEY,
                campaign_id UUID,
                token TEXT NOT NULL,
                outcome TEXT NOT NULL,
                attempted_at TIMESTAMPTZ NOT NULL,
                error_detail TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_dispatch_results_campaign
             ON dispatch_results (campaign_id)",
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("PostgreSQL migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode_token_row(row: TokenRow) -> Result<DeviceToken, StorageError> {
    let (token, owner_id, platform, status, created_at, last_validated_at) = row;
    let platform = Platform::parse(&platform)
        .ok_or_else(|| StorageError::Decode(format!("platform {platform}")))?;
    let status = TokenStatus::parse(&status)
        .ok_or_else(|| StorageError::Decode(format!("token status {status}")))?;
    Ok(DeviceToken {
        token,
        owner_id,
        platform,
        status,
        created_at,
        last_validated_at,
    })
}

fn decode_campaign_row(row: CampaignRow) -> Result<Campaign, StorageError> {
    let (id, notification, target_filter, status, created_at, completed_at) = row;
    let status = CampaignStatus::parse(&status)
        .ok_or_else(|| StorageError::Decode(format!("campaign status {status}")))?;
    Ok(Campaign {
        id,
        notification: serde_json::from_value(notification)?,
        target_filter: serde_json::from_value(target_filter)?,
        status,
        created_at,
        completed_at,
    })
}

fn decode_record_row(row: RecordRow) -> Result<DispatchRecord, StorageError> {
    let (campaign_id, token, outcome, attempted_at, error_detail) = row;
    let outcome = DispatchOutcome::parse(&outcome)
        .ok_or_else(|| StorageError::Decode(format!("dispatch outcome {outcome}")))?;
    Ok(DispatchRecord {
        campaign_id,
        token,
        outcome,
        attempted_at,
        error_detail,
    })
}

#[async_trait]
impl TokenStore for PostgresStorage {
    async fn upsert(&self, token: DeviceToken) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO device_tokens (token, owner_id, platform, status, created_at, last_validated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (token) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                platform = EXCLUDED.platform,
                status = EXCLUDED.status,
                last_validated_at = EXCLUDED.last_validated_at
            "#,
        )
        .bind(&token.token)
        .bind(&token.owner_id)
        .bind(token.platform.as_str())
        .bind(token.status.as_str())
        .bind(token.created_at)
        .bind(token.last_validated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Option<DeviceToken>, StorageError> {
        let row: Option<TokenRow> = sqlx::query_as(
            "SELECT token, owner_id, platform, status, created_at, last_validated_at
             FROM device_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_token_row).transpose()
    }

    async fn find_valid(&self, filter: &TokenFilter) -> Result<Vec<DeviceToken>, StorageError> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            r#"
            SELECT token, owner_id, platform, status, created_at, last_validated_at
            FROM device_tokens
            WHERE status = 'VALID'
              AND ($1::TEXT IS NULL OR owner_id = $1)
              AND ($2::TEXT IS NULL OR platform = $2)
            ORDER BY token
            "#,
        )
        .bind(filter.owner_id.as_deref())
        .bind(filter.platform.map(|p| p.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_token_row).collect()
    }

    async fn set_status(
        &self,
        token: &str,
        status: TokenStatus,
        validated_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE device_tokens
             SET status = $2, last_validated_at = COALESCE($3, last_validated_at)
             WHERE token = $1",
        )
        .bind(token)
        .bind(status.as_str())
        .bind(validated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn supersede(
        &self,
        owner_id: &str,
        platform: Platform,
        keep: &str,
    ) -> Result<usize, StorageError> {
        let result = sqlx::query(
            "UPDATE device_tokens SET status = 'INVALID'
             WHERE owner_id = $1 AND platform = $2 AND token <> $3 AND status <> 'INVALID'",
        )
        .bind(owner_id)
        .bind(platform.as_str())
        .bind(keep)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl CampaignStore for PostgresStorage {
    async fn insert(&self, campaign: Campaign) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (id, notification, target_filter, status, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(campaign.id)
        .bind(serde_json::to_value(&campaign.notification)?)
        .bind(serde_json::to_value(&campaign.target_filter)?)
        .bind(campaign.status.as_str())
        .bind(campaign.created_at)
        .bind(campaign.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Campaign>, StorageError> {
        let row: Option<CampaignRow> = sqlx::query_as(
            "SELECT id, notification, target_filter, status, created_at, completed_at
             FROM campaigns WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_campaign_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Campaign>, StorageError> {
        let rows: Vec<CampaignRow> = sqlx::query_as(
            "SELECT id, notification, target_filter, status, created_at, completed_at
             FROM campaigns ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_campaign_row).collect()
    }

    async fn find_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>, StorageError> {
        let rows: Vec<CampaignRow> = sqlx::query_as(
            "SELECT id, notification, target_filter, status, created_at, completed_at
             FROM campaigns WHERE status = $1 ORDER BY created_at",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_campaign_row).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Campaign, StorageError> {
        // Single UPDATE guarded on the expected status keeps the swap atomic
        let row: Option<CampaignRow> = sqlx::query_as(
            r#"
            UPDATE campaigns
            SET status = $3, completed_at = COALESCE($4, completed_at)
            WHERE id = $1 AND status = $2
            RETURNING id, notification, target_filter, status, created_at, completed_at
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(completed_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return decode_campaign_row(row);
        }

        // Lost the swap: report the actual state for the error
        let actual: Option<(String,)> =
            sqlx::query_as("SELECT status FROM campaigns WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match actual {
            Some((status,)) => {
                let actual = CampaignStatus::parse(&status)
                    .ok_or_else(|| StorageError::Decode(format!("campaign status {status}")))?;
                Err(StorageError::StateConflict {
                    id,
                    expected: from,
                    actual,
                })
            }
            None => Err(StorageError::NotFound(format!("campaign {id}"))),
        }
    }
}

#[async_trait]
impl DispatchLedger for PostgresStorage {
    async fn append(&self, record: DispatchRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO dispatch_results (campaign_id, token, outcome, attempted_at, error_detail)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.campaign_id)
        .bind(&record.token)
        .bind(record.outcome.as_str())
        .bind(record.attempted_at)
        .bind(&record.error_detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn for_campaign(&self, campaign_id: Uuid) -> Result<Vec<DispatchRecord>, StorageError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT campaign_id, token, outcome, attempted_at, error_detail
             FROM dispatch_results WHERE campaign_id = $1 ORDER BY id",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_record_row).collect()
    }

    async fn attempted_tokens(&self, campaign_id: Uuid) -> Result<HashSet<String>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT token FROM dispatch_results WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(token,)| token).collect())
    }

    async fn all(&self) -> Result<Vec<DispatchRecord>, StorageError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT campaign_id, token, outcome, attempted_at, error_detail
             FROM dispatch_results ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_record_row).collect()
    }
}
