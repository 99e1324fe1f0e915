use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use risk_manager::{ExitAdvisory, TradeClosedEvent, TradeRecord};

use crate::types::{AdvisoryHints, FinalSignal, RecentSignal};

/// Persistence collaborator (out of scope — interface only). Failures are
/// logged by callers; an unpersisted signal still counts for slot accounting.
#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn insert_signal(&self, signal: &FinalSignal) -> Result<i64>;
    async fn insert_trade(&self, trade: &TradeRecord) -> Result<i64>;
    async fn record_trade_close(&self, event: &TradeClosedEvent) -> Result<()>;
    async fn insert_log(&self, level: &str, message: &str) -> Result<()>;
    async fn active_trades(&self) -> Result<Vec<TradeRecord>>;
    /// Accepted signals since `since`, for confirmation scoring.
    async fn recent_signals(&self, since: DateTime<Utc>) -> Result<Vec<RecentSignal>>;
    /// Rolling win rate (0.0..=1.0); `None` when no closed trades in range.
    async fn strategy_win_rate(&self, strategy_id: &str, days: i64) -> Result<Option<f64>>;
}

/// Notification/delivery collaborator (out of scope — interface only).
/// Never retried synchronously inside a cycle.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn deliver_signal(&self, signal: &FinalSignal) -> Result<String>;
    async fn deliver_advisory(&self, advisory: &ExitAdvisory) -> Result<()>;
    async fn deliver_alert(&self, message: &str) -> Result<()>;
}

/// Market-regime/capital advisor collaborator. Read-only per-cycle snapshot.
pub trait AdvisoryProvider: Send + Sync {
    fn hints(&self) -> AdvisoryHints;
}

/// Default provider: no hints, which must reproduce pre-advisory behavior
/// exactly.
pub struct NoopAdvisory;

impl AdvisoryProvider for NoopAdvisory {
    fn hints(&self) -> AdvisoryHints {
        AdvisoryHints::default()
    }
}
