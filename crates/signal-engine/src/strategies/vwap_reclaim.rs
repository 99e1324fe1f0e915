use std::collections::HashSet;

use anyhow::Result;
use market_data::MarketDataStore;
use risk_manager::Direction;

use crate::types::{CandidateSignal, ScanContext, StrategyMetrics, TradingPhase};

use super::{stale_cutoff, Strategy};

#[derive(Debug, Clone)]
pub struct VwapReclaimConfig {
    /// Entry must sit within this percent above VWAP; further means chasing.
    pub max_distance_pct: f64,
    /// The day low must be at least this far below VWAP for the reclaim to
    /// mean anything.
    pub min_flush_pct: f64,
    pub min_volume_ratio: f64,
    /// Stop goes this far below VWAP.
    pub stop_buffer_pct: f64,
    pub target_1_pct: f64,
    pub target_2_pct: f64,
}

impl Default for VwapReclaimConfig {
    fn default() -> Self {
        Self {
            max_distance_pct: 0.4,
            min_flush_pct: 0.5,
            min_volume_ratio: 1.3,
            stop_buffer_pct: 0.3,
            target_1_pct: 1.0,
            target_2_pct: 2.0,
        }
    }
}

/// Midday VWAP reclaim: a symbol that flushed below VWAP and climbed back
/// above it with volume goes long. Long-only; the short mirror of this
/// setup has no edge midday.
pub struct VwapReclaimStrategy {
    config: VwapReclaimConfig,
    signaled: HashSet<String>,
}

impl VwapReclaimStrategy {
    pub fn new(config: VwapReclaimConfig) -> Self {
        Self {
            config,
            signaled: HashSet::new(),
        }
    }
}

impl Strategy for VwapReclaimStrategy {
    fn id(&self) -> &'static str {
        "vwap_reclaim"
    }

    fn phases(&self) -> &'static [TradingPhase] {
        &[TradingPhase::Midday]
    }

    fn evaluate(
        &mut self,
        store: &MarketDataStore,
        ctx: &ScanContext,
    ) -> Result<Vec<CandidateSignal>> {
        let mut out = Vec::new();
        for symbol in store.symbols() {
            if self.signaled.contains(&symbol) {
                continue;
            }
            if store.is_stale(&symbol, ctx.now, stale_cutoff()) {
                continue;
            }
            let Some(snap) = store.snapshot(&symbol) else {
                continue;
            };
            if snap.vwap <= 0.0 || snap.last_price <= snap.vwap {
                continue;
            }
            let distance_pct = (snap.last_price - snap.vwap) / snap.vwap * 100.0;
            if distance_pct > self.config.max_distance_pct {
                continue;
            }
            let flush_pct = (snap.vwap - snap.day_low) / snap.vwap * 100.0;
            if flush_pct < self.config.min_flush_pct {
                continue;
            }
            let candle_volume = snap.candles.last().map(|c| c.volume).unwrap_or(0);
            if snap.avg_candle_volume <= 0.0 {
                continue;
            }
            let volume_ratio = candle_volume as f64 / snap.avg_candle_volume;
            if volume_ratio < self.config.min_volume_ratio {
                continue;
            }

            let entry = snap.last_price;
            let stop = snap.vwap * (1.0 - self.config.stop_buffer_pct / 100.0);
            let target_1 = entry * (1.0 + self.config.target_1_pct / 100.0);
            let target_2 = entry * (1.0 + self.config.target_2_pct / 100.0);

            self.signaled.insert(symbol.clone());
            out.push(CandidateSignal {
                symbol,
                direction: Direction::Long,
                strategy_id: self.id().to_string(),
                entry_price: entry,
                stop_price: stop,
                target_1,
                target_2,
                metrics: StrategyMetrics {
                    gap_pct: distance_pct,
                    volume_ratio,
                    range_pct: flush_pct,
                },
                rationale: format!(
                    "reclaimed VWAP {:.2} after a {:.1}% flush on {:.1}x candle volume",
                    snap.vwap, flush_pct, volume_ratio
                ),
                generated_at: ctx.now,
            });
        }
        Ok(out)
    }

    fn reset_daily(&mut self) {
        self.signaled.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use market_data::{StoreConfig, TickUpdate};

    fn tick(price: f64, volume: i64, ts: chrono::DateTime<Utc>) -> TickUpdate {
        TickUpdate {
            symbol: "INFY".into(),
            price,
            volume,
            ts,
        }
    }

    #[test]
    fn flush_and_reclaim_goes_long_with_vwap_stop() {
        let open = Utc.with_ymd_and_hms(2025, 6, 2, 3, 45, 0).unwrap();
        let store = MarketDataStore::new(StoreConfig::default());
        store.begin_session(open);
        // prints at 100 anchor VWAP, a flush to 98.5, then a heavy reclaim
        store.apply_tick(tick(100.0, 300_000, open + Duration::minutes(10)));
        store.apply_tick(tick(98.5, 50_000, open + Duration::minutes(90)));
        store.apply_tick(tick(100.1, 600_000, open + Duration::minutes(180)));
        store.apply_tick(tick(100.1, 1, open + Duration::minutes(186)));

        let ctx = ScanContext::new(9, open + Duration::minutes(187), TradingPhase::Midday);
        let mut strat = VwapReclaimStrategy::new(VwapReclaimConfig::default());
        let out = strat.evaluate(&store, &ctx).unwrap();
        assert_eq!(out.len(), 1);
        let sig = &out[0];
        assert_eq!(sig.direction, Direction::Long);
        assert!(sig.stop_price < sig.entry_price);
        assert!(sig.entry_price > 100.0 && sig.entry_price < 100.2);
        // one-shot per day
        assert!(strat.evaluate(&store, &ctx).unwrap().is_empty());
    }

    #[test]
    fn no_signal_without_the_flush() {
        let open = Utc.with_ymd_and_hms(2025, 6, 2, 3, 45, 0).unwrap();
        let store = MarketDataStore::new(StoreConfig::default());
        store.begin_session(open);
        store.apply_tick(tick(100.0, 500_000, open + Duration::minutes(10)));
        store.apply_tick(tick(100.1, 300_000, open + Duration::minutes(180)));
        store.apply_tick(tick(100.1, 1, open + Duration::minutes(186)));

        let ctx = ScanContext::new(9, open + Duration::minutes(187), TradingPhase::Midday);
        let mut strat = VwapReclaimStrategy::new(VwapReclaimConfig::default());
        assert!(strat.evaluate(&store, &ctx).unwrap().is_empty());
    }
}
