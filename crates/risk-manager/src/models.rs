use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

/// Why a trade was closed. Reasons are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    TargetTwo,
    TimeExit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::TargetTwo => "TARGET_2",
            ExitReason::TimeExit => "TIME_EXIT",
        }
    }

    /// Both stop kinds feed the daily circuit breaker counter.
    pub fn is_stop(&self) -> bool {
        matches!(self, ExitReason::StopLoss | ExitReason::TrailingStop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub strategy_id: String,
    pub entry_price: f64,
    pub quantity: i64,
    /// Current stop. Only ever tightens over the life of the trade.
    pub stop_price: f64,
    pub target_1: f64,
    pub target_2: f64,
    pub opened_at: DateTime<Utc>,
    pub status: TradeStatus,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TradeRecord {
    pub fn pnl_at(&self, exit_price: f64) -> f64 {
        (exit_price - self.entry_price) * self.quantity as f64 * self.direction.sign()
    }
}

/// Per-strategy trailing/exit tuning. Some strategies are breakeven-only
/// (no `trail_trigger_pct`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingConfig {
    /// Favorable move (%) after which the stop jumps to entry, once.
    pub breakeven_trigger_pct: f64,
    /// Favorable move (%) after which trailing starts. `None` = breakeven only.
    pub trail_trigger_pct: Option<f64>,
    /// Trail distance (%) off the best price seen since entry.
    pub trail_distance_pct: f64,
    /// Stops are rounded to this tick before being applied.
    pub tick_size: f64,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            breakeven_trigger_pct: 1.5,
            trail_trigger_pct: Some(2.0),
            trail_distance_pct: 1.0,
            tick_size: 0.05,
        }
    }
}

/// Mutable companion to an open trade; dropped when the trade closes.
#[derive(Debug, Clone)]
pub struct TrailingStopState {
    pub original_stop: f64,
    /// Highest price since entry for longs, lowest for shorts.
    pub best_price: f64,
    pub breakeven_applied: bool,
    pub target1_advised: bool,
}

impl TrailingStopState {
    pub fn new(trade: &TradeRecord) -> Self {
        Self {
            original_stop: trade.stop_price,
            best_price: trade.entry_price,
            breakeven_applied: false,
            target1_advised: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvisoryKind {
    TargetOneHit,
    StopRaised,
    SessionEndReminder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitAdvisory {
    pub trade_id: i64,
    pub symbol: String,
    pub kind: AdvisoryKind,
    pub price: f64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum ExitEvent {
    Closed(crate::events::TradeClosedEvent),
    Advisory(ExitAdvisory),
}

/// Round to the nearest multiple of `tick` (half away from zero).
pub fn round_to_tick(price: f64, tick: f64) -> f64 {
    if tick <= 0.0 {
        return price;
    }
    (price / tick).round() * tick
}

/// Favorable move in percent, compared at 0.1% resolution so threshold
/// checks behave the same as the reference sequences.
pub fn favorable_move_pct(entry: f64, price: f64, direction: Direction) -> f64 {
    if entry <= 0.0 {
        return 0.0;
    }
    let raw = (price - entry) / entry * 100.0 * direction.sign();
    (raw * 10.0).round() / 10.0
}
