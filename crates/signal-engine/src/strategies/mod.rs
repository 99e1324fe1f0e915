pub mod opening_gap;
pub mod orb_breakout;
pub mod volume_surge;
pub mod vwap_reclaim;

use anyhow::Result;
use chrono::Duration;
use market_data::MarketDataStore;

use crate::types::{CandidateSignal, ScanContext, TradingPhase};

pub use opening_gap::{OpeningGapConfig, OpeningGapStrategy};
pub use orb_breakout::{OrbBreakoutConfig, OrbBreakoutStrategy};
pub use volume_surge::{VolumeSurgeConfig, VolumeSurgeStrategy};
pub use vwap_reclaim::{VwapReclaimConfig, VwapReclaimStrategy};

/// A tick older than this is a data gap; the symbol is skipped this cycle.
pub(crate) fn stale_cutoff() -> Duration {
    Duration::minutes(5)
}

/// One pluggable signal detector. Implementations hold per-day mutable state
/// (symbols already signaled, symbols disqualified) and never mutate the
/// market data store. A symbol that produced a signal for an evaluator today
/// is not re-evaluated by it until the daily reset.
pub trait Strategy: Send {
    fn id(&self) -> &'static str;
    fn phases(&self) -> &'static [TradingPhase];
    /// Whether accepted signals from this evaluator claim the symbol for the
    /// day, dropping later-phase candidates from other evaluators.
    fn claims_exclusivity(&self) -> bool {
        false
    }
    fn evaluate(&mut self, store: &MarketDataStore, ctx: &ScanContext)
        -> Result<Vec<CandidateSignal>>;
    fn reset_daily(&mut self);
}

/// Map a raw value into 0..=100 against empirical bounds, clamped.
pub(crate) fn normalize(value: f64, lo: f64, hi: f64) -> f64 {
    if hi <= lo {
        return 0.0;
    }
    ((value - lo) / (hi - lo) * 100.0).clamp(0.0, 100.0)
}
