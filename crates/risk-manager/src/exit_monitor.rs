use std::collections::HashMap;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use market_data::MarketDataStore;

use crate::events::TradeClosedEvent;
use crate::models::{
    favorable_move_pct, round_to_tick, AdvisoryKind, Direction, ExitAdvisory, ExitEvent,
    ExitReason, TradeRecord, TradeStatus, TrailingConfig, TrailingStopState,
};

struct MonitoredTrade {
    trade: TradeRecord,
    state: TrailingStopState,
    config: TrailingConfig,
}

/// Per-trade trailing-stop state machine. Runs every cycle against every open
/// trade, independent of whether the admission path ran. Exclusive owner of
/// OPEN trade records; closed records pass to the persistence collaborator.
pub struct ExitMonitor {
    trades: HashMap<i64, MonitoredTrade>,
    /// Ticks older than this mean a data gap; the trade is skipped this cycle.
    stale_after: Duration,
}

impl ExitMonitor {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            trades: HashMap::new(),
            stale_after,
        }
    }

    pub fn open_trade(&mut self, trade: TradeRecord, config: TrailingConfig) {
        tracing::info!(
            "Monitoring {} {} x{} @ {:.2} (stop {:.2}, T1 {:.2}, T2 {:.2})",
            trade.direction.as_str(),
            trade.symbol,
            trade.quantity,
            trade.entry_price,
            trade.stop_price,
            trade.target_1,
            trade.target_2
        );
        let state = TrailingStopState::new(&trade);
        self.trades.insert(
            trade.id,
            MonitoredTrade {
                trade,
                state,
                config,
            },
        );
    }

    pub fn open_count(&self) -> usize {
        self.trades.len()
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.trades.values().map(|m| m.trade.symbol.clone()).collect()
    }

    pub fn has_open(&self, symbol: &str) -> bool {
        self.trades.values().any(|m| m.trade.symbol == symbol)
    }

    pub fn open_trades(&self) -> Vec<TradeRecord> {
        self.trades.values().map(|m| m.trade.clone()).collect()
    }

    /// Current stop for an open trade (admin/introspection).
    pub fn current_stop(&self, trade_id: i64) -> Option<f64> {
        self.trades.get(&trade_id).map(|m| m.trade.stop_price)
    }

    /// Evaluate every open trade once. One trade failing never prevents the
    /// rest from being checked; a failed check leaves that trade's stop
    /// untouched (fail-closed).
    pub fn check_all(&mut self, store: &MarketDataStore, now: DateTime<Utc>) -> Vec<ExitEvent> {
        let mut events = Vec::new();
        let ids: Vec<i64> = self.trades.keys().copied().collect();

        for id in ids {
            match self.check_trade(id, store, now) {
                Ok(mut trade_events) => events.append(&mut trade_events),
                Err(e) => {
                    let symbol = self
                        .trades
                        .get(&id)
                        .map(|m| m.trade.symbol.clone())
                        .unwrap_or_default();
                    tracing::error!("Exit check failed for trade {} ({}): {}", id, symbol, e);
                }
            }
        }
        events
    }

    /// Priority order per trade: stop breach, target-2, one-shot target-1
    /// advisory, trailing recalculation.
    fn check_trade(
        &mut self,
        id: i64,
        store: &MarketDataStore,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExitEvent>> {
        let (symbol, direction, stop_price, original_stop, target_1, target_2) =
            match self.trades.get(&id) {
                Some(m) => (
                    m.trade.symbol.clone(),
                    m.trade.direction,
                    m.trade.stop_price,
                    m.state.original_stop,
                    m.trade.target_1,
                    m.trade.target_2,
                ),
                None => return Ok(Vec::new()),
            };

        if store.is_stale(&symbol, now, self.stale_after) {
            tracing::debug!("No fresh tick for {}, skipping exit check", symbol);
            return Ok(Vec::new());
        }
        let snap = match store.snapshot(&symbol) {
            Some(s) => s,
            None => {
                tracing::debug!("No snapshot for {}, skipping exit check", symbol);
                return Ok(Vec::new());
            }
        };
        let price = snap.last_price;
        if price <= 0.0 {
            bail!("non-positive price {} for {}", price, symbol);
        }

        // 1. Stop-loss / trailing-stop breach
        let stop_breached = match direction {
            Direction::Long => price <= stop_price,
            Direction::Short => price >= stop_price,
        };
        if stop_breached {
            let reason = if stop_price == original_stop {
                ExitReason::StopLoss
            } else {
                ExitReason::TrailingStop
            };
            return Ok(self
                .close_trade(id, price, reason, now)
                .map(ExitEvent::Closed)
                .into_iter()
                .collect());
        }

        // 2. Target-2 reached
        let t2_hit = match direction {
            Direction::Long => price >= target_2,
            Direction::Short => price <= target_2,
        };
        if t2_hit {
            return Ok(self
                .close_trade(id, price, ExitReason::TargetTwo, now)
                .map(ExitEvent::Closed)
                .into_iter()
                .collect());
        }

        let mut events = Vec::new();
        if let Some(monitored) = self.trades.get_mut(&id) {
            // 3. Target-1 one-time advisory
            let t1_hit = match direction {
                Direction::Long => price >= target_1,
                Direction::Short => price <= target_1,
            };
            if t1_hit && !monitored.state.target1_advised {
                monitored.state.target1_advised = true;
                events.push(ExitEvent::Advisory(ExitAdvisory {
                    trade_id: id,
                    symbol: symbol.clone(),
                    kind: AdvisoryKind::TargetOneHit,
                    price,
                    message: format!(
                        "{} hit target 1 at {:.2} — consider booking partial profit",
                        symbol, price
                    ),
                }));
            }

            // 4. Trailing recalculation
            if let Some(advisory) = Self::recalculate_stop(monitored, price) {
                events.push(ExitEvent::Advisory(advisory));
            }
        }

        Ok(events)
    }

    /// Breakeven once past the breakeven trigger, then trail off the best
    /// price once past the trail trigger (when the strategy has one). The
    /// stop only ever tightens.
    fn recalculate_stop(monitored: &mut MonitoredTrade, price: f64) -> Option<ExitAdvisory> {
        let trade = &mut monitored.trade;
        let state = &mut monitored.state;
        let config = &monitored.config;
        let direction = trade.direction;

        state.best_price = match direction {
            Direction::Long => state.best_price.max(price),
            Direction::Short => state.best_price.min(price),
        };

        let gain = favorable_move_pct(trade.entry_price, price, direction);
        let old_stop = trade.stop_price;

        if !state.breakeven_applied && gain >= config.breakeven_trigger_pct {
            let tightens = match direction {
                Direction::Long => trade.entry_price > trade.stop_price,
                Direction::Short => trade.entry_price < trade.stop_price,
            };
            if tightens {
                trade.stop_price = trade.entry_price;
            }
            state.breakeven_applied = true;
        }

        if let Some(trail_trigger) = config.trail_trigger_pct {
            if gain >= trail_trigger {
                let factor = 1.0 - config.trail_distance_pct / 100.0 * direction.sign();
                let candidate = round_to_tick(state.best_price * factor, config.tick_size);
                let tightens = match direction {
                    Direction::Long => candidate > trade.stop_price,
                    Direction::Short => candidate < trade.stop_price,
                };
                if tightens {
                    trade.stop_price = candidate;
                }
            }
        }

        if trade.stop_price != old_stop {
            tracing::info!(
                "Trailing stop for {} moved {:.2} -> {:.2} (best {:.2})",
                trade.symbol,
                old_stop,
                trade.stop_price,
                state.best_price
            );
            Some(ExitAdvisory {
                trade_id: trade.id,
                symbol: trade.symbol.clone(),
                kind: AdvisoryKind::StopRaised,
                price,
                message: format!(
                    "{} stop moved to {:.2} (was {:.2})",
                    trade.symbol, trade.stop_price, old_stop
                ),
            })
        } else {
            None
        }
    }

    fn close_trade(
        &mut self,
        id: i64,
        exit_price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Option<TradeClosedEvent> {
        let mut monitored = self.trades.remove(&id)?;
        let trade = &mut monitored.trade;
        trade.status = TradeStatus::Closed;
        trade.exit_price = Some(exit_price);
        trade.exit_reason = Some(reason);
        trade.closed_at = Some(now);

        let pnl = trade.pnl_at(exit_price);
        tracing::info!(
            "Closed {} {} @ {:.2} ({}, P/L {:.2})",
            trade.direction.as_str(),
            trade.symbol,
            exit_price,
            reason.as_str(),
            pnl
        );

        Some(TradeClosedEvent {
            trade_id: trade.id,
            symbol: trade.symbol.clone(),
            strategy_id: trade.strategy_id.clone(),
            reason,
            entry_price: trade.entry_price,
            exit_price,
            quantity: trade.quantity,
            pnl,
            closed_at: now,
        })
    }

    /// Advisory-only reminder shortly before the mandatory close.
    pub fn session_end_advisories(&self) -> Vec<ExitAdvisory> {
        self.trades
            .values()
            .map(|m| ExitAdvisory {
                trade_id: m.trade.id,
                symbol: m.trade.symbol.clone(),
                kind: AdvisoryKind::SessionEndReminder,
                price: m.trade.entry_price,
                message: format!(
                    "{} still open near session end — mandatory close approaching",
                    m.trade.symbol
                ),
            })
            .collect()
    }

    /// Mandatory time exit: unconditionally close every remaining open trade
    /// at the latest known price (entry if no tick was ever seen).
    pub fn force_close_all(
        &mut self,
        store: &MarketDataStore,
        now: DateTime<Utc>,
    ) -> Vec<ExitEvent> {
        let ids: Vec<i64> = self.trades.keys().copied().collect();
        let mut events = Vec::new();
        for id in ids {
            let exit_price = match self.trades.get(&id) {
                Some(m) => store
                    .snapshot(&m.trade.symbol)
                    .map(|s| s.last_price)
                    .unwrap_or(m.trade.entry_price),
                None => continue,
            };
            if let Some(event) = self.close_trade(id, exit_price, ExitReason::TimeExit, now) {
                events.push(ExitEvent::Closed(event));
            }
        }
        if !events.is_empty() {
            tracing::warn!("Mandatory time exit closed {} trades", events.len());
        }
        events
    }
}
