//! Campaign lifecycle and orchestration.
//!
//! A campaign owns exactly one notification and fans it out to every token
//! matching its target filter. The per-recipient ledger written during the
//! fan-out is the sole source of truth for campaign statistics.

mod orchestrator;
mod types;

pub use orchestrator::{
    CampaignOrchestrator, CampaignRunSummary, DirectSendSummary, OrchestratorConfig,
};
pub use types::{Campaign, CampaignStatus, DispatchRecord};
