use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ExitReason;

/// Payload handed to feedback controllers when the exit monitor closes a trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeClosedEvent {
    pub trade_id: i64,
    pub symbol: String,
    pub strategy_id: String,
    pub reason: ExitReason,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: i64,
    pub pnl: f64,
    pub closed_at: DateTime<Utc>,
}

impl TradeClosedEvent {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

pub trait TradeEventHandler: Send {
    fn name(&self) -> &'static str;
    fn on_trade_closed(&mut self, event: &TradeClosedEvent) -> Result<()>;
}

/// Sequential observer dispatch with per-handler error isolation: one
/// handler failing never blocks the rest.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Vec<Arc<Mutex<dyn TradeEventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<Mutex<dyn TradeEventHandler>>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: &TradeClosedEvent) {
        for handler in &self.handlers {
            let mut guard = match handler.lock() {
                Ok(g) => g,
                Err(poisoned) => {
                    tracing::error!("Trade event handler lock poisoned, recovering");
                    poisoned.into_inner()
                }
            };
            if let Err(e) = guard.on_trade_closed(event) {
                tracing::error!(
                    "Trade event handler '{}' failed for {} close: {}",
                    guard.name(),
                    event.symbol,
                    e
                );
            }
        }
    }
}
