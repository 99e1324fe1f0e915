use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::events::{TradeClosedEvent, TradeEventHandler};

/// Day-scoped snapshot exposed to the administrative surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub stop_loss_count: u32,
    pub stop_loss_limit: u32,
    pub active: bool,
    pub manual_override: bool,
}

/// Global admission gate driven by cumulative daily stop-outs. Trailing-stop
/// closes count as stop-loss closes for this counter. The pipeline executor
/// consults `admission_allowed()` first thing each cycle; the exit monitor is
/// never gated by it.
pub struct CircuitBreaker {
    stop_loss_limit: u32,
    stop_loss_count: u32,
    active: bool,
    manual_override: bool,
}

impl CircuitBreaker {
    pub fn new(stop_loss_limit: u32) -> Self {
        Self {
            stop_loss_limit,
            stop_loss_count: 0,
            active: false,
            manual_override: false,
        }
    }

    pub fn admission_allowed(&self) -> bool {
        !self.active || self.manual_override
    }

    pub fn state(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            stop_loss_count: self.stop_loss_count,
            stop_loss_limit: self.stop_loss_limit,
            active: self.active,
            manual_override: self.manual_override,
        }
    }

    /// Operator override: resume admission before the next session reset.
    pub fn set_override(&mut self, enabled: bool) {
        self.manual_override = enabled;
        tracing::warn!(
            "Circuit breaker manual override {} (count={}/{})",
            if enabled { "ENABLED" } else { "disabled" },
            self.stop_loss_count,
            self.stop_loss_limit
        );
    }

    /// Cleared at session start; counts do not carry across days.
    pub fn session_reset(&mut self) {
        self.stop_loss_count = 0;
        self.active = false;
        self.manual_override = false;
        tracing::info!("Circuit breaker reset for new session");
    }
}

impl TradeEventHandler for CircuitBreaker {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    fn on_trade_closed(&mut self, event: &TradeClosedEvent) -> Result<()> {
        if !event.reason.is_stop() {
            return Ok(());
        }

        self.stop_loss_count += 1;
        tracing::info!(
            "Stop-out on {} ({}): daily count {}/{}",
            event.symbol,
            event.reason.as_str(),
            self.stop_loss_count,
            self.stop_loss_limit
        );

        // Trips on the exact close that reaches the limit.
        if !self.active && self.stop_loss_count >= self.stop_loss_limit {
            self.active = true;
            tracing::warn!(
                "CIRCUIT BREAKER ACTIVE: {} stop-outs today, new signal admission suspended",
                self.stop_loss_count
            );
        }
        Ok(())
    }
}
