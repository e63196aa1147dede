use std::sync::Arc;
use std::time::Duration;

use crate::campaign::{CampaignOrchestrator, OrchestratorConfig};
use crate::config::Settings;
use crate::dispatch::{BackoffConfig, Dispatcher};
use crate::gateway::PushGateway;
use crate::reporting::ReportingService;
use crate::storage::Storage;
use crate::token::TokenRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<TokenRegistry>,
    pub orchestrator: Arc<CampaignOrchestrator>,
    pub reporting: Arc<ReportingService>,
}

impl AppState {
    pub fn new(settings: Settings, storage: Storage, gateway: Arc<dyn PushGateway>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            gateway,
            storage.tokens.clone(),
            Duration::from_secs(settings.gateway.send_timeout_seconds),
        ));
        let registry = Arc::new(TokenRegistry::new(
            storage.tokens.clone(),
            dispatcher.clone(),
        ));
        let orchestrator = Arc::new(CampaignOrchestrator::new(
            storage.campaigns.clone(),
            storage.ledger.clone(),
            registry.clone(),
            dispatcher,
            OrchestratorConfig {
                concurrency: settings.dispatch.concurrency,
                max_attempts: settings.dispatch.max_attempts,
                backoff: BackoffConfig {
                    base_delay_ms: settings.dispatch.retry_base_delay_ms,
                    max_delay_ms: settings.dispatch.retry_max_delay_ms,
                    multiplier: settings.dispatch.retry_multiplier,
                    jitter_factor: settings.dispatch.retry_jitter,
                },
            },
        ));
        let reporting = Arc::new(ReportingService::new(
            storage.ledger.clone(),
            storage.tokens.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            registry,
            orchestrator,
            reporting,
        }
    }
}
