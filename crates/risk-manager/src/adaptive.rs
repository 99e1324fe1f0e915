use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::events::{TradeClosedEvent, TradeEventHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdaptiveLevel {
    Normal,
    Reduced,
    Paused,
}

impl AdaptiveLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdaptiveLevel::Normal => "NORMAL",
            AdaptiveLevel::Reduced => "REDUCED",
            AdaptiveLevel::Paused => "PAUSED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveState {
    pub level: AdaptiveLevel,
    pub consecutive_losses: u32,
    pub consecutive_wins: u32,
}

impl Default for AdaptiveState {
    fn default() -> Self {
        Self {
            level: AdaptiveLevel::Normal,
            consecutive_losses: 0,
            consecutive_wins: 0,
        }
    }
}

/// Per-strategy performance throttle. Consecutive losses demote
/// NORMAL -> REDUCED -> PAUSED; a win resets the loss streak and promotes one
/// level back toward NORMAL. Counters deliberately survive the session reset.
pub struct AdaptiveManager {
    throttle_threshold: u32,
    pause_threshold: u32,
    states: HashMap<String, AdaptiveState>,
}

impl AdaptiveManager {
    pub fn new(throttle_threshold: u32, pause_threshold: u32) -> Self {
        Self {
            throttle_threshold,
            pause_threshold,
            states: HashMap::new(),
        }
    }

    pub fn level(&self, strategy_id: &str) -> AdaptiveLevel {
        self.states
            .get(strategy_id)
            .map(|s| s.level)
            .unwrap_or(AdaptiveLevel::Normal)
    }

    pub fn levels(&self) -> HashMap<String, AdaptiveLevel> {
        self.states
            .iter()
            .map(|(k, v)| (k.clone(), v.level))
            .collect()
    }

    pub fn state(&self, strategy_id: &str) -> AdaptiveState {
        self.states.get(strategy_id).cloned().unwrap_or_default()
    }

    /// Administrative override: hard-pause a strategy.
    pub fn force_pause(&mut self, strategy_id: &str) {
        let state = self.states.entry(strategy_id.to_string()).or_default();
        let old = state.level;
        state.level = AdaptiveLevel::Paused;
        tracing::warn!(
            "Strategy '{}' force-paused ({} -> PAUSED)",
            strategy_id,
            old.as_str()
        );
    }

    /// Administrative override: resume a strategy at NORMAL with clear counters.
    pub fn force_resume(&mut self, strategy_id: &str) {
        let state = self.states.entry(strategy_id.to_string()).or_default();
        let old = state.level;
        *state = AdaptiveState::default();
        tracing::warn!(
            "Strategy '{}' force-resumed ({} -> NORMAL)",
            strategy_id,
            old.as_str()
        );
    }

    fn record_loss(&mut self, strategy_id: &str) {
        let throttle = self.throttle_threshold;
        let pause = self.pause_threshold;
        let state = self.states.entry(strategy_id.to_string()).or_default();
        state.consecutive_losses += 1;
        state.consecutive_wins = 0;

        let old = state.level;
        if state.consecutive_losses >= pause {
            state.level = AdaptiveLevel::Paused;
        } else if state.consecutive_losses >= throttle && state.level == AdaptiveLevel::Normal {
            state.level = AdaptiveLevel::Reduced;
        }

        if state.level != old {
            tracing::warn!(
                "Strategy '{}' demoted {} -> {} ({} consecutive losses)",
                strategy_id,
                old.as_str(),
                state.level.as_str(),
                state.consecutive_losses
            );
        }
    }

    fn record_win(&mut self, strategy_id: &str) {
        let state = self.states.entry(strategy_id.to_string()).or_default();
        state.consecutive_losses = 0;
        state.consecutive_wins += 1;

        let old = state.level;
        state.level = match state.level {
            AdaptiveLevel::Paused => AdaptiveLevel::Reduced,
            AdaptiveLevel::Reduced => AdaptiveLevel::Normal,
            AdaptiveLevel::Normal => AdaptiveLevel::Normal,
        };

        if state.level != old {
            tracing::info!(
                "Strategy '{}' promoted {} -> {} ({} consecutive wins)",
                strategy_id,
                old.as_str(),
                state.level.as_str(),
                state.consecutive_wins
            );
        }
    }
}

impl TradeEventHandler for AdaptiveManager {
    fn name(&self) -> &'static str {
        "adaptive_manager"
    }

    fn on_trade_closed(&mut self, event: &TradeClosedEvent) -> Result<()> {
        if event.is_win() {
            self.record_win(&event.strategy_id);
        } else {
            self.record_loss(&event.strategy_id);
        }
        Ok(())
    }
}
