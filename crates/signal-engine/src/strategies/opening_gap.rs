use std::collections::HashSet;

use anyhow::Result;
use market_data::MarketDataStore;
use risk_manager::Direction;

use crate::types::{CandidateSignal, ScanContext, StrategyMetrics, TradingPhase};

use super::{stale_cutoff, Strategy};

#[derive(Debug, Clone)]
pub struct OpeningGapConfig {
    /// Smallest overnight gap worth trading, percent of prev close.
    pub min_gap_pct: f64,
    /// Gaps beyond this are runaway moves; the symbol is disqualified for
    /// the day rather than rechecked every cycle.
    pub max_gap_pct: f64,
    pub min_day_volume: i64,
    pub stop_pct: f64,
    pub target_1_pct: f64,
    pub target_2_pct: f64,
}

impl Default for OpeningGapConfig {
    fn default() -> Self {
        Self {
            min_gap_pct: 2.0,
            max_gap_pct: 6.0,
            min_day_volume: 200_000,
            stop_pct: 1.2,
            target_1_pct: 1.5,
            target_2_pct: 3.0,
        }
    }
}

/// Gap continuation at the open: a clean gap up rides long, a gap down
/// rides short. This is the only evaluator that claims its symbols for
/// the day, keeping later-phase strategies off names already in play.
pub struct OpeningGapStrategy {
    config: OpeningGapConfig,
    signaled: HashSet<String>,
    disqualified: HashSet<String>,
}

impl OpeningGapStrategy {
    pub fn new(config: OpeningGapConfig) -> Self {
        Self {
            config,
            signaled: HashSet::new(),
            disqualified: HashSet::new(),
        }
    }
}

impl Strategy for OpeningGapStrategy {
    fn id(&self) -> &'static str {
        "opening_gap"
    }

    fn phases(&self) -> &'static [TradingPhase] {
        &[TradingPhase::Opening]
    }

    fn claims_exclusivity(&self) -> bool {
        true
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
            let Some(prev_close) = snap.prev_close else {
                continue;
            };
            if prev_close <= 0.0 {
                continue;
            }
            let gap_pct = (snap.last_price - prev_close) / prev_close * 100.0;
            if gap_pct.abs() < self.config.min_gap_pct {
                continue;
            }
            if gap_pct.abs() > self.config.max_gap_pct {
                self.disqualified.insert(symbol);
                continue;
            }
            if snap.day_volume < self.config.min_day_volume {
                continue;
            }

            let direction = if gap_pct > 0.0 {
                Direction::Long
            } else {
                Direction::Short
            };
            let entry = snap.last_price;
            let sign = direction.sign();
            let stop = entry * (1.0 - sign * self.config.stop_pct / 100.0);
            let target_1 = entry * (1.0 + sign * self.config.target_1_pct / 100.0);
            let target_2 = entry * (1.0 + sign * self.config.target_2_pct / 100.0);
            let volume_ratio = snap.day_volume as f64 / self.config.min_day_volume as f64;
            let range_pct = if entry > 0.0 {
                (snap.day_high - snap.day_low) / entry * 100.0
            } else {
                0.0
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
                    gap_pct,
                    volume_ratio,
                    range_pct,
                },
                rationale: format!(
                    "gapped {:+.1}% vs prev close {:.2} on {:.1}x minimum volume",
                    gap_pct, prev_close, volume_ratio
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
    use chrono::{TimeZone, Utc};
    use market_data::{StoreConfig, TickUpdate};

    fn store_with_gap(last: f64, prev: f64, volume: i64) -> (MarketDataStore, ScanContext) {
        let open = Utc.with_ymd_and_hms(2025, 6, 2, 3, 45, 0).unwrap();
        let store = MarketDataStore::new(StoreConfig::default());
        store.begin_session(open);
        store.set_prev_close("RELI", prev);
        store.apply_tick(TickUpdate {
            symbol: "RELI".into(),
            price: last,
            volume,
            ts: open + chrono::Duration::minutes(5),
        });
        let ctx = ScanContext::new(
            1,
            open + chrono::Duration::minutes(6),
            TradingPhase::Opening,
        );
        (store, ctx)
    }

    #[test]
    fn gap_up_emits_long_once() {
        let (store, ctx) = store_with_gap(103.0, 100.0, 300_000);
        let mut strat = OpeningGapStrategy::new(OpeningGapConfig::default());
        let first = strat.evaluate(&store, &ctx).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].direction, Direction::Long);
        assert!(first[0].stop_price < first[0].entry_price);
        assert!((first[0].metrics.gap_pct - 3.0).abs() < 1e-9);
        // same symbol does not re-signal within the day
        assert!(strat.evaluate(&store, &ctx).unwrap().is_empty());
        strat.reset_daily();
        assert_eq!(strat.evaluate(&store, &ctx).unwrap().len(), 1);
    }

    #[test]
    fn runaway_gap_is_disqualified() {
        let (store, ctx) = store_with_gap(109.0, 100.0, 300_000);
        let mut strat = OpeningGapStrategy::new(OpeningGapConfig::default());
        assert!(strat.evaluate(&store, &ctx).unwrap().is_empty());
        assert!(strat.disqualified.contains("RELI"));
    }

    #[test]
    fn gap_down_emits_short() {
        let (store, ctx) = store_with_gap(97.0, 100.0, 300_000);
        let mut strat = OpeningGapStrategy::new(OpeningGapConfig::default());
        let out = strat.evaluate(&store, &ctx).unwrap();
        assert_eq!(out[0].direction, Direction::Short);
        assert!(out[0].stop_price > out[0].entry_price);
        assert!(out[0].target_2 < out[0].entry_price);
    }
}
