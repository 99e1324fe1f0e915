use std::collections::HashSet;

use anyhow::Result;
use market_data::MarketDataStore;
use risk_manager::Direction;

use crate::types::{CandidateSignal, ScanContext, StrategyMetrics, TradingPhase};

use super::{stale_cutoff, Strategy};

#[derive(Debug, Clone)]
pub struct VolumeSurgeConfig {
    /// Last completed candle volume vs the average of the candles before it.
    pub min_surge_ratio: f64,
    /// The surge candle has to actually move price, percent open to close.
    pub min_candle_move_pct: f64,
    /// At least this many completed candles before a surge is measurable.
    pub min_candles: usize,
    pub stop_pct: f64,
    pub target_1_pct: f64,
    pub target_2_pct: f64,
}

impl Default for VolumeSurgeConfig {
    fn default() -> Self {
        Self {
            min_surge_ratio: 3.0,
            min_candle_move_pct: 0.3,
            min_candles: 4,
            stop_pct: 1.0,
            target_1_pct: 1.2,
            target_2_pct: 2.4,
        }
    }
}

/// Volume surge: a completed candle printing several times the baseline
/// volume with a directional body signals in the direction of the body.
pub struct VolumeSurgeStrategy {
    config: VolumeSurgeConfig,
    signaled: HashSet<String>,
}

impl VolumeSurgeStrategy {
    pub fn new(config: VolumeSurgeConfig) -> Self {
        Self {
            config,
            signaled: HashSet::new(),
        }
    }
}

impl Strategy for VolumeSurgeStrategy {
    fn id(&self) -> &'static str {
        "volume_surge"
    }

    fn phases(&self) -> &'static [TradingPhase] {
        &[TradingPhase::Morning, TradingPhase::Midday]
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
            if snap.candles.len() < self.config.min_candles {
                continue;
            }
            let Some((surge, baseline)) = snap.candles.split_last() else {
                continue;
            };
            let baseline_avg = baseline.iter().map(|c| c.volume as f64).sum::<f64>()
                / baseline.len() as f64;
            if baseline_avg <= 0.0 || surge.open <= 0.0 {
                continue;
            }
            let surge_ratio = surge.volume as f64 / baseline_avg;
            if surge_ratio < self.config.min_surge_ratio {
                continue;
            }
            let move_pct = (surge.close - surge.open) / surge.open * 100.0;
            if move_pct.abs() < self.config.min_candle_move_pct {
                continue;
            }

            let direction = if move_pct > 0.0 {
                Direction::Long
            } else {
                Direction::Short
            };
            let entry = snap.last_price;
            let sign = direction.sign();
            let stop = entry * (1.0 - sign * self.config.stop_pct / 100.0);
            let target_1 = entry * (1.0 + sign * self.config.target_1_pct / 100.0);
            let target_2 = entry * (1.0 + sign * self.config.target_2_pct / 100.0);
            let range_pct = (surge.high - surge.low) / surge.open * 100.0;

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
                    gap_pct: move_pct,
                    volume_ratio: surge_ratio,
                    range_pct,
                },
                rationale: format!(
                    "{:.1}x volume surge candle moved {:+.1}%",
                    surge_ratio, move_pct
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
            symbol: "HDFC".into(),
            price,
            volume,
            ts,
        }
    }

    #[test]
    fn surge_candle_with_down_body_goes_short() {
        let open = Utc.with_ymd_and_hms(2025, 6, 2, 3, 45, 0).unwrap();
        let store = MarketDataStore::new(StoreConfig::default());
        store.begin_session(open);
        // four quiet baseline candles
        for i in 0..4 {
            store.apply_tick(tick(200.0, 10_000, open + Duration::minutes(i * 5 + 1)));
        }
        // surge candle: 5x volume, -0.5% body
        store.apply_tick(tick(200.0, 25_000, open + Duration::minutes(21)));
        store.apply_tick(tick(199.0, 25_000, open + Duration::minutes(23)));
        // roll the surge candle into the completed set
        store.apply_tick(tick(199.0, 1, open + Duration::minutes(26)));

        let ctx = ScanContext::new(4, open + Duration::minutes(27), TradingPhase::Morning);
        let mut strat = VolumeSurgeStrategy::new(VolumeSurgeConfig::default());
        let out = strat.evaluate(&store, &ctx).unwrap();
        assert_eq!(out.len(), 1);
        let sig = &out[0];
        assert_eq!(sig.direction, Direction::Short);
        assert!(sig.metrics.volume_ratio >= 3.0);
        assert!(sig.stop_price > sig.entry_price);
        assert!(sig.target_2 < sig.target_1);
    }

    #[test]
    fn quiet_tape_stays_silent() {
        let open = Utc.with_ymd_and_hms(2025, 6, 2, 3, 45, 0).unwrap();
        let store = MarketDataStore::new(StoreConfig::default());
        store.begin_session(open);
        for i in 0..6 {
            store.apply_tick(tick(200.0, 10_000, open + Duration::minutes(i * 5 + 1)));
        }
        let ctx = ScanContext::new(4, open + Duration::minutes(31), TradingPhase::Morning);
        let mut strat = VolumeSurgeStrategy::new(VolumeSurgeConfig::default());
        assert!(strat.evaluate(&store, &ctx).unwrap().is_empty());
    }
}
