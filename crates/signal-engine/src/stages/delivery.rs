use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::ports::{DeliveryChannel, SignalRepository};
use crate::types::ScanContext;

use super::ScanStage;

/// Persists and delivers the admitted batch. Collaborator failures are
/// logged and swallowed: an unpersisted or undelivered signal already
/// consumed its slot and must not re-admit next cycle.
pub struct DeliveryStage {
    repository: Arc<dyn SignalRepository>,
    channel: Arc<dyn DeliveryChannel>,
}

impl DeliveryStage {
    pub fn new(repository: Arc<dyn SignalRepository>, channel: Arc<dyn DeliveryChannel>) -> Self {
        Self {
            repository,
            channel,
        }
    }
}

#[async_trait]
impl ScanStage for DeliveryStage {
    fn name(&self) -> &'static str {
        "delivery"
    }

    async fn process(&mut self, ctx: &mut ScanContext) -> Result<()> {
        for signal in &ctx.finals {
            let symbol = &signal.ranked.candidate.symbol;
            if let Err(e) = self.repository.insert_signal(signal).await {
                tracing::error!(symbol = %symbol, error = %e, "failed to persist signal");
            }
            match self.channel.deliver_signal(signal).await {
                Ok(receipt) => {
                    tracing::info!(
                        symbol = %symbol,
                        stars = signal.ranked.stars,
                        quantity = signal.quantity,
                        receipt = %receipt,
                        "signal delivered"
                    );
                }
                Err(e) => {
                    tracing::error!(symbol = %symbol, error = %e, "failed to deliver signal");
                }
            }
        }
        Ok(())
    }
}
