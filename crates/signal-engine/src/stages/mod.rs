pub mod admission;
pub mod consolidation;
pub mod delivery;
pub mod exit_stage;
pub mod scoring;
pub mod strategy_stage;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::ScanContext;

pub use admission::{AdmissionConfig, AdmissionStage};
pub use consolidation::ConsolidationStage;
pub use delivery::DeliveryStage;
pub use exit_stage::ExitStage;
pub use scoring::{ScoringConfig, ScoringStage};
pub use strategy_stage::StrategyStage;

/// One step of the per-cycle pipeline. Stages run in a fixed order against
/// a shared `ScanContext`; each reads what earlier stages wrote and appends
/// its own output.
#[async_trait]
pub trait ScanStage: Send {
    fn name(&self) -> &'static str;
    async fn process(&mut self, ctx: &mut ScanContext) -> Result<()>;
    /// Called once at session start. Most stages hold no daily state.
    fn reset_daily(&mut self) {}
}
