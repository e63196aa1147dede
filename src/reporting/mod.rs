//! Read-only reporting over the dispatch ledger.
//!
//! Stats are recomputed from the append-only record set on every query so
//! they can never drift from what was actually dispatched. There are no
//! cached counters anywhere in the service.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::campaign::DispatchRecord;
use crate::dispatch::DispatchOutcome;
use crate::error::Result;
use crate::storage::{DispatchLedger, TokenStore};

/// Outcome counts for one campaign (or any record subset).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CampaignStats {
    /// Confirmed deliveries
    pub delivered: usize,
    /// Gateway-rejected tokens
    pub invalid: usize,
    /// Transient failures after retry exhaustion
    pub failed: usize,
    /// Tokens invalidated between resolution and dispatch
    pub skipped: usize,
    /// All records
    pub total: usize,
}

/// Count records grouped by outcome.
pub fn summarize(records: &[DispatchRecord]) -> CampaignStats {
    let mut stats = CampaignStats::default();
    for record in records {
        match record.outcome {
            DispatchOutcome::Delivered => stats.delivered += 1,
            DispatchOutcome::InvalidToken => stats.invalid += 1,
            DispatchOutcome::TransientError => stats.failed += 1,
            DispatchOutcome::Skipped => stats.skipped += 1,
        }
        stats.total += 1;
    }
    stats
}

/// Cross-campaign reporting views.
pub struct ReportingService {
    ledger: Arc<dyn DispatchLedger>,
    tokens: Arc<dyn TokenStore>,
}

impl ReportingService {
    pub fn new(ledger: Arc<dyn DispatchLedger>, tokens: Arc<dyn TokenStore>) -> Self {
        Self { ledger, tokens }
    }

    /// Outcome counts across all campaigns and direct sends, grouped by the
    /// platform of the dispatched token, optionally restricted to one owner.
    ///
    /// Records whose token no longer resolves are grouped under "UNKNOWN";
    /// the ledger outlives nothing, but defensive joins beat silent drops.
    pub async fn outcome_breakdown(
        &self,
        owner_id: Option<&str>,
    ) -> Result<BTreeMap<String, CampaignStats>> {
        let records = self.ledger.all().await?;
        let mut breakdown: BTreeMap<String, CampaignStats> = BTreeMap::new();

        for record in records {
            let token = self.tokens.get(&record.token).await?;

            if let Some(owner_id) = owner_id {
                match token {
                    Some(ref t) if t.owner_id == owner_id => {}
                    _ => continue,
                }
            }

            let platform = token
                .map(|t| t.platform.as_str().to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string());

            let stats = breakdown.entry(platform).or_default();
            match record.outcome {
                DispatchOutcome::Delivered => stats.delivered += 1,
                DispatchOutcome::InvalidToken => stats.invalid += 1,
                DispatchOutcome::TransientError => stats.failed += 1,
                DispatchOutcome::Skipped => stats.skipped += 1,
            }
            stats.total += 1;
        }

        Ok(breakdown)
    }
}
