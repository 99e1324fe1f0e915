use std::collections::HashSet;

use anyhow::Result;
use market_data::MarketDataStore;
use risk_manager::Direction;

use crate::types::{CandidateSignal, ScanContext, StrategyMetrics, TradingPhase};

use super::{stale_cutoff, Strategy};

#[derive(Debug, Clone)]
pub struct OrbBreakoutConfig {
    /// Opening range narrower than this is noise, percent of range low.
    pub min_range_pct: f64,
    /// Range wider than this already spent the move; disqualify for the day.
    pub max_range_pct: f64,
    /// Last completed candle volume vs the day average.
    pub min_volume_ratio: f64,
    /// Price must clear the range edge by this much, percent.
    pub breakout_buffer_pct: f64,
}

impl Default for OrbBreakoutConfig {
    fn default() -> Self {
        Self {
            min_range_pct: 0.3,
            max_range_pct: 2.5,
            min_volume_ratio: 1.5,
            breakout_buffer_pct: 0.05,
        }
    }
}

/// Opening-range breakout: once the range is finalized, a close beyond
/// either edge with volume behind it signals in the breakout direction.
/// Stop sits at the far edge of the range, targets are measured moves.
pub struct OrbBreakoutStrategy {
    config: OrbBreakoutConfig,
    signaled: HashSet<String>,
    disqualified: HashSet<String>,
}

impl OrbBreakoutStrategy {
    pub fn new(config: OrbBreakoutConfig) -> Self {
        Self {
            config,
            signaled: HashSet::new(),
            disqualified: HashSet::new(),
        }
    }
}

impl Strategy for OrbBreakoutStrategy {
    fn id(&self) -> &'static str {
        "orb_breakout"
    }

    fn phases(&self) -> &'static [TradingPhase] {
        &[TradingPhase::Morning]
    }

    fn evaluate(
        &mut self,
        store: &MarketDataStore,
        ctx: &ScanContext,
    ) -> Result<Vec<CandidateSignal>> {
        let mut out = Vec::new();
        for symbol in store.symbols() {
            if self.signaled.contains(&symbol) || self.disqualified.contains(&symbol) {
                continue;
            }
            if store.is_stale(&symbol, ctx.now, stale_cutoff()) {
                continue;
            }
            let Some(snap) = store.snapshot(&symbol) else {
                continue;
            };
            let or = snap.opening_range;
            if !or.finalized || or.low <= 0.0 {
                continue;
            }
            let range = or.high - or.low;
            let range_pct = range / or.low * 100.0;
            if range_pct < self.config.min_range_pct {
                continue;
            }
            if range_pct > self.config.max_range_pct {
                self.disqualified.insert(symbol);
                continue;
            }

            let buffer = self.config.breakout_buffer_pct / 100.0;
            let direction = if snap.last_price > or.high * (1.0 + buffer) {
                Direction::Long
            } else if snap.last_price < or.low * (1.0 - buffer) {
                Direction::Short
            } else {
                continue;
            };

            let candle_volume = snap.candles.last().map(|c| c.volume).unwrap_or(0);
            if snap.avg_candle_volume <= 0.0 {
                continue;
            }
            let volume_ratio = candle_volume as f64 / snap.avg_candle_volume;
            if volume_ratio < self.config.min_volume_ratio {
                continue;
            }

            let entry = snap.last_price;
            let (stop, target_1, target_2) = match direction {
                Direction::Long => (or.low, entry + range, entry + 2.0 * range),
                Direction::Short => (or.high, entry - range, entry - 2.0 * range),
            };
            let breakout_pct = match direction {
                Direction::Long => (entry - or.high) / or.high * 100.0,
                Direction::Short => (or.low - entry) / or.low * 100.0,
            };

            self.signaled.insert(symbol.clone());
            out.push(CandidateSignal {
                symbol,
                direction,
                strategy_id: self.id().to_string(),
                entry_price: entry,
                stop_price: stop,
                target_1,
                target_2,
                metrics: StrategyMetrics {
                    gap_pct: breakout_pct,
                    volume_ratio,
                    range_pct,
                },
                rationale: format!(
                    "broke {} of {:.2}-{:.2} opening range on {:.1}x candle volume",
                    match direction {
                        Direction::Long => "above high",
                        Direction::Short => "below low",
                    },
                    or.low,
                    or.high,
                    volume_ratio
                ),
                generated_at: ctx.now,
            });
        }
        Ok(out)
    }

    fn reset_daily(&mut self) {
        self.signaled.clear();
        self.disqualified.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use market_data::{StoreConfig, TickUpdate};

    fn tick(symbol: &str, price: f64, volume: i64, ts: chrono::DateTime<Utc>) -> TickUpdate {
        TickUpdate {
            symbol: symbol.into(),
            price,
            volume,
            ts,
        }
    }

    /// Range 100.0-101.0 built in the first 15 minutes, then a high-volume
    /// push through the high.
    #[test]
    fn breakout_above_range_goes_long_with_range_targets() {
        let open = Utc.with_ymd_and_hms(2025, 6, 2, 3, 45, 0).unwrap();
        let store = MarketDataStore::new(StoreConfig::default());
        store.begin_session(open);
        store.apply_tick(tick("TATA", 100.0, 10_000, open + Duration::minutes(1)));
        store.apply_tick(tick("TATA", 101.0, 10_000, open + Duration::minutes(6)));
        store.apply_tick(tick("TATA", 100.5, 10_000, open + Duration::minutes(11)));
        // past the range window, breakout candle with 3x volume
        store.apply_tick(tick("TATA", 101.4, 60_000, open + Duration::minutes(40)));
        store.apply_tick(tick("TATA", 101.4, 1, open + Duration::minutes(46)));

        let ctx = ScanContext::new(3, open + Duration::minutes(46), TradingPhase::Morning);
        let mut strat = OrbBreakoutStrategy::new(OrbBreakoutConfig::default());
        let out = strat.evaluate(&store, &ctx).unwrap();
        assert_eq!(out.len(), 1);
        let sig = &out[0];
        assert_eq!(sig.direction, Direction::Long);
        assert!((sig.stop_price - 100.0).abs() < 1e-9);
        assert!((sig.target_1 - (101.4 + 1.0)).abs() < 1e-9);
        assert!((sig.target_2 - (101.4 + 2.0)).abs() < 1e-9);
    }

    #[test]
    fn no_signal_while_range_unfinalized() {
        let open = Utc.with_ymd_and_hms(2025, 6, 2, 3, 45, 0).unwrap();
        let store = MarketDataStore::new(StoreConfig::default());
        store.begin_session(open);
        store.apply_tick(tick("TATA", 100.0, 50_000, open + Duration::minutes(2)));
        store.apply_tick(tick("TATA", 102.0, 50_000, open + Duration::minutes(4)));

        let ctx = ScanContext::new(1, open + Duration::minutes(5), TradingPhase::Morning);
        let mut strat = OrbBreakoutStrategy::new(OrbBreakoutConfig::default());
        assert!(strat.evaluate(&store, &ctx).unwrap().is_empty());
    }
}
