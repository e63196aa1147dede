use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::dispatch::{BackoffConfig, DispatchOutcome, Dispatcher, ExponentialBackoff};
use crate::error::{AppError, Result};
use crate::metrics::{
    CAMPAIGNS_CREATED_TOTAL, CAMPAIGNS_FINISHED_TOTAL, DISPATCH_OUTCOMES_TOTAL,
    DISPATCH_RETRIES_TOTAL,
};
use crate::notification::Notification;
use crate::reporting::{self, CampaignStats};
use crate::storage::{CampaignStore, DispatchLedger, StorageError};
use crate::token::{DeviceToken, TokenFilter, TokenRegistry, TokenStatus};

use super::{Campaign, CampaignStatus, DispatchRecord};

/// Tuning for the campaign fan-out.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bounded worker-pool size
    pub concurrency: usize,
    /// Gateway attempts per token, counting the first send
    pub max_attempts: u32,
    /// Backoff between attempts on transient failures
    pub backoff: BackoffConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            max_attempts: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Outcome counts of one `send`/`resume` run.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignRunSummary {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    /// Targets dispatched by this run (excludes targets attempted before a resume)
    pub targets: usize,
    pub delivered: usize,
    pub invalid: usize,
    pub transient_failed: usize,
    pub skipped: usize,
}

/// Outcome counts of a direct (non-campaign) send.
#[derive(Debug, Clone, Serialize)]
pub struct DirectSendSummary {
    pub owner_id: String,
    pub targets: usize,
    pub delivered: usize,
    pub invalid: usize,
    pub transient_failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
struct OutcomeTally {
    delivered: usize,
    invalid: usize,
    transient: usize,
    skipped: usize,
    infra_errors: usize,
    first_error: Option<AppError>,
}

impl OutcomeTally {
    fn absorb(&mut self, result: Result<DispatchOutcome>) {
        match result {
            Ok(DispatchOutcome::Delivered) => self.delivered += 1,
            Ok(DispatchOutcome::InvalidToken) => self.invalid += 1,
            Ok(DispatchOutcome::TransientError) => self.transient += 1,
            Ok(DispatchOutcome::Skipped) => self.skipped += 1,
            Err(e) => {
                self.infra_errors += 1;
                if self.first_error.is_none() {
                    self.first_error = Some(e);
                }
            }
        }
    }

    /// Targets that reached a persisted terminal outcome in this run.
    fn attempted(&self) -> usize {
        self.delivered + self.invalid + self.transient + self.skipped
    }
}

/// Drives campaigns through DRAFT → SENDING → {COMPLETED, FAILED}.
///
/// Owns the retry policy and the dispatch ledger: every resolved target ends
/// with exactly one persisted record, so a campaign never silently loses
/// recipients. Target resolution is re-derivable from the filter and
/// completed work from the ledger, which is what makes interrupted SENDING
/// campaigns resumable by set difference.
pub struct CampaignOrchestrator {
    campaigns: Arc<dyn CampaignStore>,
    ledger: Arc<dyn DispatchLedger>,
    registry: Arc<TokenRegistry>,
    dispatcher: Arc<Dispatcher>,
    config: OrchestratorConfig,
}

impl CampaignOrchestrator {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        ledger: Arc<dyn DispatchLedger>,
        registry: Arc<TokenRegistry>,
        dispatcher: Arc<Dispatcher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            campaigns,
            ledger,
            registry,
            dispatcher,
            config,
        }
    }

    /// Create a campaign in DRAFT state.
    pub async fn create(
        &self,
        notification: Notification,
        target_filter: TokenFilter,
    ) -> Result<Campaign> {
        let campaign = Campaign::draft(notification, target_filter);
        self.campaigns.insert(campaign.clone()).await?;

        CAMPAIGNS_CREATED_TOTAL.inc();
        tracing::info!(
            campaign_id = %campaign.id,
            kind = %campaign.notification.kind.as_str(),
            "Campaign created"
        );
        Ok(campaign)
    }

    /// Send a DRAFT campaign.
    ///
    /// The DRAFT→SENDING swap is atomic, so a second concurrent `send` fails
    /// with an invalid-state error before touching any target.
    #[tracing::instrument(name = "orchestrator.send", skip(self), fields(campaign_id = %campaign_id))]
    pub async fn send(&self, campaign_id: Uuid) -> Result<CampaignRunSummary> {
        let campaign = self
            .campaigns
            .transition(
                campaign_id,
                CampaignStatus::Draft,
                CampaignStatus::Sending,
                None,
            )
            .await
            .map_err(transition_error)?;

        self.run(campaign).await
    }

    /// Resume a campaign left in SENDING by an interrupted run.
    ///
    /// Only targets without a ledger record are dispatched again.
    #[tracing::instrument(name = "orchestrator.resume", skip(self), fields(campaign_id = %campaign_id))]
    pub async fn resume(&self, campaign_id: Uuid) -> Result<CampaignRunSummary> {
        let campaign = self.require_campaign(campaign_id).await?;
        if campaign.status != CampaignStatus::Sending {
            return Err(AppError::InvalidState {
                expected: CampaignStatus::Sending,
                actual: campaign.status,
            });
        }
        self.run(campaign).await
    }

    /// Resume every campaign found in SENDING, typically at startup.
    pub async fn resume_all(&self) -> Result<Vec<CampaignRunSummary>> {
        let stalled = self
            .campaigns
            .find_by_status(CampaignStatus::Sending)
            .await?;

        let mut summaries = Vec::with_capacity(stalled.len());
        for campaign in stalled {
            let campaign_id = campaign.id;
            match self.run(campaign).await {
                Ok(summary) => {
                    tracing::info!(
                        campaign_id = %campaign_id,
                        status = %summary.status,
                        dispatched = summary.targets,
                        "Resumed interrupted campaign"
                    );
                    summaries.push(summary);
                }
                Err(e) => {
                    tracing::error!(
                        campaign_id = %campaign_id,
                        error = %e,
                        "Failed to resume campaign"
                    );
                }
            }
        }
        Ok(summaries)
    }

    /// Dispatch records for targets that failed: gateway-rejected tokens and
    /// transient errors that exhausted their retries.
    pub async fn failed_notifications(&self, campaign_id: Uuid) -> Result<Vec<DispatchRecord>> {
        self.require_campaign(campaign_id).await?;
        let records = self.ledger.for_campaign(campaign_id).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.outcome.is_failure())
            .collect())
    }

    /// Outcome counts recomputed from the campaign's ledger records.
    pub async fn stats(&self, campaign_id: Uuid) -> Result<CampaignStats> {
        self.require_campaign(campaign_id).await?;
        let records = self.ledger.for_campaign(campaign_id).await?;
        Ok(reporting::summarize(&records))
    }

    /// Look up one campaign.
    pub async fn campaign(&self, campaign_id: Uuid) -> Result<Campaign> {
        self.require_campaign(campaign_id).await
    }

    /// All campaigns, newest first.
    pub async fn list(&self) -> Result<Vec<Campaign>> {
        Ok(self.campaigns.list().await?)
    }

    /// Send one notification to every active token of one owner.
    ///
    /// Same retry and ledger treatment as a campaign worker; records carry
    /// no campaign id.
    #[tracing::instrument(
        name = "orchestrator.send_direct",
        skip(self, notification),
        fields(owner_id = %owner_id, notification_id = %notification.id)
    )]
    pub async fn send_direct(
        &self,
        owner_id: &str,
        notification: Notification,
    ) -> Result<DirectSendSummary> {
        let targets = self
            .registry
            .active_tokens(&TokenFilter::owner(owner_id))
            .await?;

        if targets.is_empty() {
            tracing::info!(owner_id = %owner_id, "Direct send matched no active tokens");
            return Ok(DirectSendSummary {
                owner_id: owner_id.to_string(),
                targets: 0,
                delivered: 0,
                invalid: 0,
                transient_failed: 0,
                skipped: 0,
            });
        }

        let target_count = targets.len();
        let notification = &notification;
        let results: Vec<Result<DispatchOutcome>> = stream::iter(targets)
            .map(|device| async move { self.attempt_target(None, &device, notification).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut tally = OutcomeTally::default();
        for result in results {
            tally.absorb(result);
        }
        if let Some(err) = tally.first_error {
            return Err(err);
        }

        Ok(DirectSendSummary {
            owner_id: owner_id.to_string(),
            targets: target_count,
            delivered: tally.delivered,
            invalid: tally.invalid,
            transient_failed: tally.transient,
            skipped: tally.skipped,
        })
    }

    async fn require_campaign(&self, campaign_id: Uuid) -> Result<Campaign> {
        self.campaigns
            .get(campaign_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("campaign {campaign_id}")))
    }

    /// Fan a SENDING campaign out to its unattempted targets and finish it.
    async fn run(&self, campaign: Campaign) -> Result<CampaignRunSummary> {
        let campaign_id = campaign.id;

        let targets = self
            .registry
            .active_tokens(&campaign.target_filter)
            .await?;
        let attempted_before = self.ledger.attempted_tokens(campaign_id).await?;
        let remaining: Vec<DeviceToken> = targets
            .into_iter()
            .filter(|t| !attempted_before.contains(&t.token))
            .collect();

        if remaining.is_empty() && attempted_before.is_empty() {
            tracing::warn!(campaign_id = %campaign_id, "Campaign resolved no targets");
            let finished = self.finish(campaign_id, CampaignStatus::Failed).await?;
            return Ok(CampaignRunSummary {
                campaign_id,
                status: finished.status,
                targets: 0,
                delivered: 0,
                invalid: 0,
                transient_failed: 0,
                skipped: 0,
            });
        }

        tracing::info!(
            campaign_id = %campaign_id,
            targets = remaining.len(),
            already_attempted = attempted_before.len(),
            concurrency = self.config.concurrency,
            "Dispatching campaign"
        );

        let remaining_len = remaining.len();
        let notification = &campaign.notification;
        let results: Vec<Result<DispatchOutcome>> = stream::iter(remaining)
            .map(|device| async move {
                self.attempt_target(Some(campaign_id), &device, notification)
                    .await
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut tally = OutcomeTally::default();
        for result in results {
            tally.absorb(result);
        }

        if tally.infra_errors > 0 {
            if tally.attempted() == 0 && attempted_before.is_empty() {
                // Nothing reached the ledger at all
                tracing::error!(
                    campaign_id = %campaign_id,
                    errors = tally.infra_errors,
                    "Every dispatch failed before reaching the gateway"
                );
                let finished = self.finish(campaign_id, CampaignStatus::Failed).await?;
                return Ok(CampaignRunSummary {
                    campaign_id,
                    status: finished.status,
                    targets: remaining_len,
                    delivered: 0,
                    invalid: 0,
                    transient_failed: 0,
                    skipped: 0,
                });
            }

            // Some records were persisted; stay SENDING so a resume can
            // dispatch the rest instead of restarting from scratch.
            tracing::error!(
                campaign_id = %campaign_id,
                errors = tally.infra_errors,
                persisted = tally.attempted(),
                "Campaign dispatch incomplete, campaign left in SENDING"
            );
            return Err(tally
                .first_error
                .unwrap_or_else(|| AppError::Transient("campaign dispatch incomplete".to_string())));
        }

        let finished = self.finish(campaign_id, CampaignStatus::Completed).await?;
        tracing::info!(
            campaign_id = %campaign_id,
            delivered = tally.delivered,
            invalid = tally.invalid,
            failed = tally.transient,
            skipped = tally.skipped,
            "Campaign completed"
        );

        Ok(CampaignRunSummary {
            campaign_id,
            status: finished.status,
            targets: remaining_len,
            delivered: tally.delivered,
            invalid: tally.invalid,
            transient_failed: tally.transient,
            skipped: tally.skipped,
        })
    }

    async fn finish(&self, campaign_id: Uuid, status: CampaignStatus) -> Result<Campaign> {
        let campaign = self
            .campaigns
            .transition(campaign_id, CampaignStatus::Sending, status, Some(Utc::now()))
            .await
            .map_err(transition_error)?;

        CAMPAIGNS_FINISHED_TOTAL
            .with_label_values(&[status.as_str()])
            .inc();
        Ok(campaign)
    }

    /// Drive one target to a terminal outcome and persist it exactly once.
    async fn attempt_target(
        &self,
        campaign_id: Option<Uuid>,
        device: &DeviceToken,
        notification: &Notification,
    ) -> Result<DispatchOutcome> {
        // The target set is a snapshot; a token invalidated since resolution
        // is recorded as SKIPPED without burning a gateway call.
        let current = self.registry.token(&device.token).await?;
        let still_valid = matches!(current, Some(ref t) if t.status == TokenStatus::Valid);

        let (outcome, error_detail) = if still_valid {
            self.dispatch_with_retry(device, notification).await
        } else {
            (
                DispatchOutcome::Skipped,
                Some("token invalidated before dispatch".to_string()),
            )
        };

        self.ledger
            .append(DispatchRecord::new(
                campaign_id,
                device.token.clone(),
                outcome,
                error_detail,
            ))
            .await?;

        DISPATCH_OUTCOMES_TOTAL
            .with_label_values(&[outcome.as_str()])
            .inc();
        Ok(outcome)
    }

    /// Retry loop for one target. Only transient failures are retried;
    /// DELIVERED and INVALID_TOKEN are terminal on first sight.
    async fn dispatch_with_retry(
        &self,
        device: &DeviceToken,
        notification: &Notification,
    ) -> (DispatchOutcome, Option<String>) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = ExponentialBackoff::with_config(self.config.backoff.clone());
        let mut last_detail = None;

        for attempt in 1..=max_attempts {
            let result = self.dispatcher.send(device, notification).await;

            if !result.is_transient() {
                return (result.outcome, result.error_detail);
            }

            last_detail = result.error_detail;
            if attempt < max_attempts {
                DISPATCH_RETRIES_TOTAL.inc();
                let delay = backoff.next_delay();
                tracing::debug!(
                    token = %device.token,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient gateway failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }

        (DispatchOutcome::TransientError, last_detail)
    }
}

fn transition_error(err: StorageError) -> AppError {
    match err {
        StorageError::StateConflict {
            expected, actual, ..
        } => AppError::InvalidState { expected, actual },
        StorageError::NotFound(what) => AppError::NotFound(what),
        other => AppError::Storage(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayResponse, PushGateway};
    use crate::storage::Storage;
    use crate::token::Platform;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Gateway returning scripted responses per token; unscripted tokens are
    /// delivered. Exhausted scripts repeat their last response.
    struct ScriptedGateway {
        scripts: DashMap<String, VecDeque<GatewayResponse>>,
        calls: DashMap<String, usize>,
    }

    impl ScriptedGateway {
        fn new() -> Self {
            Self {
                scripts: DashMap::new(),
                calls: DashMap::new(),
            }
        }

        fn script(&self, token: &str, responses: Vec<GatewayResponse>) {
            self.scripts.insert(token.to_string(), responses.into());
        }

        fn calls(&self, token: &str) -> usize {
            self.calls.get(token).map(|c| *c).unwrap_or(0)
        }
    }

    #[async_trait]
    impl PushGateway for ScriptedGateway {
        async fn push(&self, token: &str, _notification: &Notification) -> GatewayResponse {
            *self.calls.entry(token.to_string()).or_insert(0) += 1;

            match self.scripts.get_mut(token) {
                Some(mut queue) => {
                    if queue.len() > 1 {
                        queue.pop_front().unwrap()
                    } else {
                        queue.front().cloned().unwrap_or_else(|| {
                            GatewayResponse::delivered("msg")
                        })
                    }
                }
                None => GatewayResponse::delivered("msg"),
            }
        }
    }

    struct Fixture {
        gateway: Arc<ScriptedGateway>,
        registry: Arc<TokenRegistry>,
        orchestrator: CampaignOrchestrator,
        storage: Storage,
    }

    fn fixture() -> Fixture {
        let storage = Storage::in_memory();
        let gateway = Arc::new(ScriptedGateway::new());
        let dispatcher = Arc::new(Dispatcher::new(
            gateway.clone(),
            storage.tokens.clone(),
            Duration::from_secs(1),
        ));
        let registry = Arc::new(TokenRegistry::new(storage.tokens.clone(), dispatcher.clone()));
        let orchestrator = CampaignOrchestrator::new(
            storage.campaigns.clone(),
            storage.ledger.clone(),
            registry.clone(),
            dispatcher,
            OrchestratorConfig {
                concurrency: 4,
                max_attempts: 3,
                backoff: BackoffConfig {
                    base_delay_ms: 1,
                    max_delay_ms: 2,
                    multiplier: 2.0,
                    jitter_factor: 0.0,
                },
            },
        );
        Fixture {
            gateway,
            registry,
            orchestrator,
            storage,
        }
    }

    async fn register(fixture: &Fixture, owner: &str, token: &str) {
        fixture
            .registry
            .register(owner, Platform::Web, token.to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_completes_and_records_every_target() {
        let fixture = fixture();
        register(&fixture, "user-1", "tok-1").await;
        register(&fixture, "user-2", "tok-2").await;
        register(&fixture, "user-3", "tok-3").await;

        let campaign = fixture
            .orchestrator
            .create(
                Notification::builder("Sale", "20% off").build(),
                TokenFilter::default(),
            )
            .await
            .unwrap();

        let summary = fixture.orchestrator.send(campaign.id).await.unwrap();
        assert_eq!(summary.status, CampaignStatus::Completed);
        assert_eq!(summary.targets, 3);
        assert_eq!(summary.delivered, 3);

        let records = fixture.storage.ledger.for_campaign(campaign.id).await.unwrap();
        assert_eq!(records.len(), 3);

        let stats = fixture.orchestrator.stats(campaign.id).await.unwrap();
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.total, 3);
    }

    #[tokio::test]
    async fn test_empty_target_set_fails_campaign() {
        let fixture = fixture();

        let campaign = fixture
            .orchestrator
            .create(
                Notification::builder("Sale", "20% off").build(),
                TokenFilter::owner("nobody"),
            )
            .await
            .unwrap();

        let summary = fixture.orchestrator.send(campaign.id).await.unwrap();
        assert_eq!(summary.status, CampaignStatus::Failed);
        assert_eq!(summary.targets, 0);

        let stats = fixture.orchestrator.stats(campaign.id).await.unwrap();
        assert_eq!(stats.total, 0);
    }

    #[tokio::test]
    async fn test_send_twice_is_rejected_without_duplicates() {
        let fixture = fixture();
        register(&fixture, "user-1", "tok-1").await;

        let campaign = fixture
            .orchestrator
            .create(
                Notification::builder("Sale", "20% off").build(),
                TokenFilter::default(),
            )
            .await
            .unwrap();

        fixture.orchestrator.send(campaign.id).await.unwrap();
        let second = fixture.orchestrator.send(campaign.id).await;
        assert!(matches!(
            second,
            Err(AppError::InvalidState {
                expected: CampaignStatus::Draft,
                actual: CampaignStatus::Completed,
            })
        ));

        let records = fixture.storage.ledger.for_campaign(campaign.id).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_hits_retry_bound() {
        let fixture = fixture();
        register(&fixture, "user-1", "tok-flaky").await;
        // One registration probe call so far
        assert_eq!(fixture.gateway.calls("tok-flaky"), 1);

        fixture
            .gateway
            .script("tok-flaky", vec![GatewayResponse::transient("503")]);

        let campaign = fixture
            .orchestrator
            .create(
                Notification::builder("Sale", "20% off").build(),
                TokenFilter::default(),
            )
            .await
            .unwrap();
        let summary = fixture.orchestrator.send(campaign.id).await.unwrap();

        assert_eq!(summary.status, CampaignStatus::Completed);
        assert_eq!(summary.transient_failed, 1);
        assert_eq!(summary.delivered, 0);

        // Exactly max_attempts dispatch calls beyond the registration probe
        assert_eq!(fixture.gateway.calls("tok-flaky"), 1 + 3);

        let failed = fixture
            .orchestrator
            .failed_notifications(campaign.id)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].outcome, DispatchOutcome::TransientError);
    }

    #[tokio::test]
    async fn test_invalid_token_short_circuits_and_invalidates() {
        let fixture = fixture();
        register(&fixture, "user-1", "tok-dead").await;
        fixture
            .gateway
            .script("tok-dead", vec![GatewayResponse::invalid_token("unregistered")]);

        let campaign = fixture
            .orchestrator
            .create(
                Notification::builder("Sale", "20% off").build(),
                TokenFilter::default(),
            )
            .await
            .unwrap();
        let summary = fixture.orchestrator.send(campaign.id).await.unwrap();

        assert_eq!(summary.invalid, 1);
        // One probe + one dispatch, never retried
        assert_eq!(fixture.gateway.calls("tok-dead"), 2);

        // Invalidated token is gone from the next resolution
        let active = fixture
            .registry
            .active_tokens(&TokenFilter::default())
            .await
            .unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_resume_dispatches_only_unattempted_targets() {
        let fixture = fixture();
        register(&fixture, "user-1", "tok-1").await;
        register(&fixture, "user-2", "tok-2").await;

        let campaign = fixture
            .orchestrator
            .create(
                Notification::builder("Sale", "20% off").build(),
                TokenFilter::default(),
            )
            .await
            .unwrap();

        // Simulate a crash mid-send: SENDING with one target already recorded
        fixture
            .storage
            .campaigns
            .transition(
                campaign.id,
                CampaignStatus::Draft,
                CampaignStatus::Sending,
                None,
            )
            .await
            .unwrap();
        fixture
            .storage
            .ledger
            .append(DispatchRecord::new(
                Some(campaign.id),
                "tok-1",
                DispatchOutcome::Delivered,
                None,
            ))
            .await
            .unwrap();

        let summary = fixture.orchestrator.resume(campaign.id).await.unwrap();
        assert_eq!(summary.status, CampaignStatus::Completed);
        assert_eq!(summary.targets, 1, "only the unattempted target is dispatched");

        // tok-1 saw only its registration probe
        assert_eq!(fixture.gateway.calls("tok-1"), 1);
        assert_eq!(fixture.gateway.calls("tok-2"), 2);

        let records = fixture.storage.ledger.for_campaign(campaign.id).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_direct_send_writes_unowned_records() {
        let fixture = fixture();
        register(&fixture, "user-1", "tok-1").await;

        let summary = fixture
            .orchestrator
            .send_direct("user-1", Notification::builder("Hi", "Solo").build())
            .await
            .unwrap();
        assert_eq!(summary.targets, 1);
        assert_eq!(summary.delivered, 1);

        let all = fixture.storage.ledger.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].campaign_id.is_none());
    }
}
