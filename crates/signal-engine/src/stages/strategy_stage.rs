use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use market_data::MarketDataStore;

use crate::strategies::Strategy;
use crate::types::ScanContext;

use super::ScanStage;

/// Runs every registered evaluator whose phase list includes the current
/// phase. One evaluator failing never hides the others' candidates.
pub struct StrategyStage {
    store: Arc<MarketDataStore>,
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyStage {
    pub fn new(store: Arc<MarketDataStore>, strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { store, strategies }
    }
}

#[async_trait]
impl ScanStage for StrategyStage {
    fn name(&self) -> &'static str {
        "strategies"
    }

    async fn process(&mut self, ctx: &mut ScanContext) -> Result<()> {
        for strategy in &mut self.strategies {
            if !strategy.phases().contains(&ctx.phase) {
                continue;
            }
            match strategy.evaluate(&self.store, ctx) {
                Ok(candidates) => {
                    if !candidates.is_empty() {
                        tracing::debug!(
                            strategy = strategy.id(),
                            count = candidates.len(),
                            "evaluator produced candidates"
                        );
                    }
                    ctx.candidates.extend(candidates);
                }
                Err(e) => {
                    tracing::warn!(strategy = strategy.id(), error = %e, "evaluator failed, skipping");
                }
            }
        }
        Ok(())
    }

    fn reset_daily(&mut self) {
        for strategy in &mut self.strategies {
            strategy.reset_daily();
        }
    }
}
