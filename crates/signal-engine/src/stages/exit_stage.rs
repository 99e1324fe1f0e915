use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use market_data::MarketDataStore;
use risk_manager::{EventBus, ExitEvent, ExitMonitor};

use crate::ports::{DeliveryChannel, SignalRepository};
use crate::types::ScanContext;

use super::ScanStage;

/// Exit management. Runs every cycle in every phase, before anything on the
/// admission path, so stops keep trailing while admission is gated or the
/// pipeline is throttled. Close events fan out to the feedback handlers on
/// the event bus before persistence and delivery.
pub struct ExitStage {
    monitor: Arc<Mutex<ExitMonitor>>,
    store: Arc<MarketDataStore>,
    bus: EventBus,
    repository: Arc<dyn SignalRepository>,
    channel: Arc<dyn DeliveryChannel>,
}

impl ExitStage {
    pub fn new(
        monitor: Arc<Mutex<ExitMonitor>>,
        store: Arc<MarketDataStore>,
        bus: EventBus,
        repository: Arc<dyn SignalRepository>,
        channel: Arc<dyn DeliveryChannel>,
    ) -> Self {
        Self {
            monitor,
            store,
            bus,
            repository,
            channel,
        }
    }
}

#[async_trait]
impl ScanStage for ExitStage {
    fn name(&self) -> &'static str {
        "exits"
    }

    async fn process(&mut self, ctx: &mut ScanContext) -> Result<()> {
        // The lock covers only the synchronous sweep; persistence and
        // delivery happen after it is released.
        let events = {
            let mut monitor = self
                .monitor
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            monitor.check_all(&self.store, ctx.now)
        };

        for event in &events {
            match event {
                ExitEvent::Closed(closed) => {
                    tracing::info!(
                        symbol = %closed.symbol,
                        trade_id = closed.trade_id,
                        reason = closed.reason.as_str(),
                        exit = closed.exit_price,
                        pnl = closed.pnl,
                        "trade closed"
                    );
                    self.bus.dispatch(closed);
                    if let Err(e) = self.repository.record_trade_close(closed).await {
                        tracing::error!(trade_id = closed.trade_id, error = %e, "failed to persist close");
                    }
                    if let Err(e) = self
                        .channel
                        .deliver_alert(&format!(
                            "EXIT {} {} @ {:.2} ({}) pnl {:.2}",
                            closed.symbol,
                            closed.quantity,
                            closed.exit_price,
                            closed.reason.as_str(),
                            closed.pnl
                        ))
                        .await
                    {
                        tracing::error!(trade_id = closed.trade_id, error = %e, "failed to deliver close alert");
                    }
                }
                ExitEvent::Advisory(advisory) => {
                    if let Err(e) = self.channel.deliver_advisory(advisory).await {
                        tracing::error!(
                            trade_id = advisory.trade_id,
                            error = %e,
                            "failed to deliver advisory"
                        );
                    }
                }
            }
        }

        ctx.exit_events = events;
        Ok(())
    }
}
