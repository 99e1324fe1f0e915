use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Duration, DurationRound, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// One real-time price/volume update for one instrument, as pushed by the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickUpdate {
    pub symbol: String,
    pub price: f64,
    /// Volume traded since the previous update (delta, not cumulative).
    pub volume: i64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpeningRange {
    pub high: f64,
    pub low: f64,
    pub finalized: bool,
}

/// Point-in-time copy of one symbol's cached state. Handed to the scan cycle
/// so stage code never holds a lock into the store.
#[derive(Debug, Clone)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub last_price: f64,
    pub last_ts: DateTime<Utc>,
    pub prev_close: Option<f64>,
    pub day_high: f64,
    pub day_low: f64,
    pub day_volume: i64,
    pub vwap: f64,
    pub opening_range: OpeningRange,
    pub candles: Vec<Candle>,
    /// Mean volume of completed candles today (0.0 until one completes).
    pub avg_candle_volume: f64,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub candle_interval_minutes: i64,
    pub opening_range_minutes: i64,
    pub max_candles: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            candle_interval_minutes: 5,
            opening_range_minutes: 15,
            max_candles: 96,
        }
    }
}

#[derive(Debug, Default)]
struct SymbolState {
    last_price: f64,
    last_ts: Option<DateTime<Utc>>,
    prev_close: Option<f64>,
    day_high: f64,
    day_low: f64,
    cum_volume: i64,
    cum_price_volume: f64,
    opening_range: OpeningRange,
    candles: VecDeque<Candle>,
    building: Option<Candle>,
}

/// Thread-safe in-memory cache of the latest tick, running VWAP, opening
/// range, and aggregated candles per instrument. Written by the feed handler
/// task, read by the scan cycle. Per-symbol atomicity comes from DashMap
/// entry-level exclusivity: a reader never sees a half-applied tick.
pub struct MarketDataStore {
    config: StoreConfig,
    symbols: DashMap<String, SymbolState>,
    session_open: RwLock<Option<DateTime<Utc>>>,
}

impl MarketDataStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            symbols: DashMap::new(),
            session_open: RwLock::new(None),
        }
    }

    /// Mark the session open time. Opening-range capture runs for
    /// `opening_range_minutes` from this instant.
    pub fn begin_session(&self, open: DateTime<Utc>) {
        if let Ok(mut guard) = self.session_open.write() {
            *guard = Some(open);
        }
    }

    fn session_open(&self) -> Option<DateTime<Utc>> {
        self.session_open.read().ok().and_then(|g| *g)
    }

    /// Seed yesterday's close, used by gap detection.
    pub fn set_prev_close(&self, symbol: &str, close: f64) {
        let mut state = self.symbols.entry(symbol.to_string()).or_default();
        state.prev_close = Some(close);
    }

    /// Apply one tick. All derived aggregates for the symbol update under a
    /// single entry guard.
    pub fn apply_tick(&self, tick: TickUpdate) {
        let session_open = self.session_open();
        let mut state = self.symbols.entry(tick.symbol.clone()).or_default();

        state.last_price = tick.price;
        state.last_ts = Some(tick.ts);

        if state.day_high == 0.0 || tick.price > state.day_high {
            state.day_high = tick.price;
        }
        if state.day_low == 0.0 || tick.price < state.day_low {
            state.day_low = tick.price;
        }

        state.cum_volume += tick.volume.max(0);
        state.cum_price_volume += tick.price * tick.volume.max(0) as f64;

        // Opening range: capture while inside the window, finalize on the
        // first tick past it.
        if let Some(open) = session_open {
            let window_end = open + Duration::minutes(self.config.opening_range_minutes);
            if tick.ts < window_end {
                if state.opening_range.high == 0.0 || tick.price > state.opening_range.high {
                    state.opening_range.high = tick.price;
                }
                if state.opening_range.low == 0.0 || tick.price < state.opening_range.low {
                    state.opening_range.low = tick.price;
                }
            } else if !state.opening_range.finalized && state.opening_range.high > 0.0 {
                state.opening_range.finalized = true;
            }
        }

        // Candle aggregation on fixed interval buckets.
        let interval = Duration::minutes(self.config.candle_interval_minutes);
        let bucket = tick
            .ts
            .duration_trunc(interval)
            .unwrap_or(tick.ts);

        match &mut state.building {
            Some(candle) if candle.start == bucket => {
                candle.high = candle.high.max(tick.price);
                candle.low = candle.low.min(tick.price);
                candle.close = tick.price;
                candle.volume += tick.volume.max(0);
            }
            _ => {
                if let Some(done) = state.building.take() {
                    state.candles.push_back(done);
                    while state.candles.len() > self.config.max_candles {
                        state.candles.pop_front();
                    }
                }
                state.building = Some(Candle {
                    start: bucket,
                    open: tick.price,
                    high: tick.price,
                    low: tick.price,
                    close: tick.price,
                    volume: tick.volume.max(0),
                });
            }
        }
    }

    pub fn snapshot(&self, symbol: &str) -> Option<SymbolSnapshot> {
        let state = self.symbols.get(symbol)?;
        let last_ts = state.last_ts?;

        let vwap = if state.cum_volume > 0 {
            state.cum_price_volume / state.cum_volume as f64
        } else {
            state.last_price
        };

        let avg_candle_volume = if state.candles.is_empty() {
            0.0
        } else {
            state.candles.iter().map(|c| c.volume as f64).sum::<f64>()
                / state.candles.len() as f64
        };

        Some(SymbolSnapshot {
            symbol: symbol.to_string(),
            last_price: state.last_price,
            last_ts,
            prev_close: state.prev_close,
            day_high: state.day_high,
            day_low: state.day_low,
            day_volume: state.cum_volume,
            vwap,
            opening_range: state.opening_range.clone(),
            candles: state.candles.iter().cloned().collect(),
            avg_candle_volume,
        })
    }

    /// A symbol with no tick inside `max_age` is skipped for the cycle.
    pub fn is_stale(&self, symbol: &str, now: DateTime<Utc>, max_age: Duration) -> bool {
        match self.symbols.get(symbol).and_then(|s| s.last_ts) {
            Some(ts) => now - ts > max_age,
            None => true,
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.iter().map(|e| e.key().clone()).collect()
    }

    /// Session-start reset: yesterday's last price becomes prev_close, all
    /// intraday aggregates clear.
    pub fn session_reset(&self, open: DateTime<Utc>) {
        for mut entry in self.symbols.iter_mut() {
            let carried_close = if entry.last_price > 0.0 {
                Some(entry.last_price)
            } else {
                entry.prev_close
            };
            let state = entry.value_mut();
            *state = SymbolState {
                prev_close: carried_close,
                ..SymbolState::default()
            };
        }
        self.begin_session(open);
        tracing::info!("Market data store reset for new session ({} symbols)", self.symbols.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 13, minute, second).unwrap()
    }

    fn tick(symbol: &str, price: f64, volume: i64, at: DateTime<Utc>) -> TickUpdate {
        TickUpdate {
            symbol: symbol.to_string(),
            price,
            volume,
            ts: at,
        }
    }

    fn store() -> MarketDataStore {
        let store = MarketDataStore::new(StoreConfig::default());
        store.begin_session(ts(30, 0));
        store
    }

    #[test]
    fn vwap_is_volume_weighted() {
        let store = store();
        store.apply_tick(tick("RELI", 100.0, 100, ts(31, 0)));
        store.apply_tick(tick("RELI", 110.0, 300, ts(32, 0)));

        let snap = store.snapshot("RELI").unwrap();
        // (100*100 + 110*300) / 400 = 107.5
        assert!((snap.vwap - 107.5).abs() < 1e-9);
        assert_eq!(snap.day_volume, 400);
    }

    #[test]
    fn opening_range_finalizes_after_window() {
        let store = store();
        store.apply_tick(tick("RELI", 101.0, 10, ts(31, 0)));
        store.apply_tick(tick("RELI", 99.0, 10, ts(40, 0)));
        let snap = store.snapshot("RELI").unwrap();
        assert!(!snap.opening_range.finalized);
        assert!((snap.opening_range.high - 101.0).abs() < 1e-9);
        assert!((snap.opening_range.low - 99.0).abs() < 1e-9);

        // First tick past the 15-minute window finalizes; range stops moving.
        store.apply_tick(tick("RELI", 105.0, 10, ts(46, 0)));
        let snap = store.snapshot("RELI").unwrap();
        assert!(snap.opening_range.finalized);
        assert!((snap.opening_range.high - 101.0).abs() < 1e-9);
    }

    #[test]
    fn candles_roll_on_interval_boundary() {
        let store = store();
        store.apply_tick(tick("RELI", 100.0, 10, ts(31, 0)));
        store.apply_tick(tick("RELI", 102.0, 20, ts(33, 30)));
        // Next 5-minute bucket closes the first candle
        store.apply_tick(tick("RELI", 101.0, 5, ts(36, 0)));

        let snap = store.snapshot("RELI").unwrap();
        assert_eq!(snap.candles.len(), 1);
        let c = &snap.candles[0];
        assert!((c.open - 100.0).abs() < 1e-9);
        assert!((c.high - 102.0).abs() < 1e-9);
        assert!((c.close - 102.0).abs() < 1e-9);
        assert_eq!(c.volume, 30);
        assert!((snap.avg_candle_volume - 30.0).abs() < 1e-9);
    }

    #[test]
    fn completed_candles_stay_bounded() {
        let store = MarketDataStore::new(StoreConfig {
            max_candles: 2,
            ..StoreConfig::default()
        });
        store.begin_session(ts(30, 0));
        // Four distinct 5-minute buckets complete three candles; only the
        // newest two survive the cap.
        for (minute, price) in [(31, 100.0), (36, 101.0), (41, 102.0), (46, 103.0)] {
            store.apply_tick(tick("RELI", price, 10, ts(minute, 0)));
        }

        let snap = store.snapshot("RELI").unwrap();
        assert_eq!(snap.candles.len(), 2);
        assert!((snap.candles[0].close - 101.0).abs() < 1e-9);
        assert!((snap.candles[1].close - 102.0).abs() < 1e-9);
    }

    #[test]
    fn staleness_detected() {
        let store = store();
        assert!(store.is_stale("RELI", ts(40, 0), Duration::seconds(30)));
        store.apply_tick(tick("RELI", 100.0, 10, ts(39, 50)));
        assert!(!store.is_stale("RELI", ts(40, 0), Duration::seconds(30)));
        assert!(store.is_stale("RELI", ts(41, 0), Duration::seconds(30)));
    }

    #[test]
    fn session_reset_carries_close() {
        let store = store();
        store.apply_tick(tick("RELI", 123.0, 10, ts(31, 0)));
        store.session_reset(ts(30, 0) + Duration::days(1));
        let mut _snap = store.snapshot("RELI");
        // No tick yet today, so no snapshot; after one tick prev_close is set.
        store.apply_tick(tick("RELI", 125.0, 5, ts(31, 0) + Duration::days(1)));
        let snap = store.snapshot("RELI").unwrap();
        assert_eq!(snap.prev_close, Some(123.0));
        assert_eq!(snap.day_volume, 5);
    }
}
