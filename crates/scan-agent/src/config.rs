use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use signal_engine::stages::{AdmissionConfig, ScoringConfig};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Scanning
    pub scan_interval_seconds: u64,
    pub watchlist: Vec<String>,
    pub confirmation_lookback_minutes: i64,
    pub scoring_top_n: usize,

    // Admission and sizing
    pub capital_per_trade: f64,
    pub max_open_positions: usize,
    pub min_stars: u8,
    pub signal_ttl_minutes: i64,

    // Trailing exits
    pub breakeven_trigger_pct: f64,
    pub trail_trigger_pct: f64,
    pub trail_distance_pct: f64,
    pub tick_size: f64,

    // Feedback loops
    pub daily_stop_loss_limit: u32,       // circuit breaker
    pub strategy_throttle_threshold: u32, // consecutive losses -> REDUCED
    pub strategy_pause_threshold: u32,    // consecutive losses -> PAUSED
    pub win_rate_lookback_days: i64,

    // Pipeline health
    pub cycle_failure_threshold: u32,
    pub soft_cycle_budget_ms: u64,

    // Session clock (IST wall-clock, minutes past midnight)
    pub session_open_minute: u32,   // 09:15
    pub reminder_minute: u32,       // 15:00
    pub forced_close_minute: u32,   // 15:20

    // Collaborators
    pub webhook_url: String,
    pub database_url: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(env::var(key).unwrap_or_else(|_| default.to_string()).parse()?)
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            scan_interval_seconds: env_or("SCAN_INTERVAL", "1")?,
            watchlist: env::var("WATCHLIST")
                .unwrap_or_else(|_| {
                    "RELIANCE,TCS,HDFCBANK,INFY,ICICIBANK,SBIN,TATAMOTORS,AXISBANK,LT,ITC"
                        .to_string()
                })
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            confirmation_lookback_minutes: env_or("CONFIRMATION_LOOKBACK_MINUTES", "15")?,
            scoring_top_n: env_or("SCORING_TOP_N", "10")?,

            capital_per_trade: env_or("CAPITAL_PER_TRADE", "100000.0")?,
            max_open_positions: env_or("MAX_OPEN_POSITIONS", "5")?,
            min_stars: env_or("MIN_STARS", "3")?,
            signal_ttl_minutes: env_or("SIGNAL_TTL_MINUTES", "30")?,

            breakeven_trigger_pct: env_or("BREAKEVEN_TRIGGER_PCT", "1.5")?,
            trail_trigger_pct: env_or("TRAIL_TRIGGER_PCT", "2.0")?,
            trail_distance_pct: env_or("TRAIL_DISTANCE_PCT", "1.0")?,
            tick_size: env_or("TICK_SIZE", "0.05")?,

            daily_stop_loss_limit: env_or("DAILY_STOP_LOSS_LIMIT", "3")?,
            strategy_throttle_threshold: env_or("STRATEGY_THROTTLE_THRESHOLD", "3")?,
            strategy_pause_threshold: env_or("STRATEGY_PAUSE_THRESHOLD", "5")?,
            win_rate_lookback_days: env_or("WIN_RATE_LOOKBACK_DAYS", "30")?,

            cycle_failure_threshold: env_or("CYCLE_FAILURE_THRESHOLD", "10")?,
            soft_cycle_budget_ms: env_or("SOFT_CYCLE_BUDGET_MS", "1000")?,

            session_open_minute: env_or("SESSION_OPEN_MINUTE", "555")?, // 09:15 IST
            reminder_minute: env_or("REMINDER_MINUTE", "900")?,         // 15:00 IST
            forced_close_minute: env_or("FORCED_CLOSE_MINUTE", "920")?, // 15:20 IST

            webhook_url: env::var("WEBHOOK_URL").unwrap_or_else(|_| String::new()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:tickscout.db".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_seconds == 0 {
            bail!("SCAN_INTERVAL must be positive");
        }
        if self.watchlist.is_empty() {
            bail!("WATCHLIST must name at least one symbol");
        }
        if self.strategy_pause_threshold <= self.strategy_throttle_threshold {
            bail!("STRATEGY_PAUSE_THRESHOLD must exceed STRATEGY_THROTTLE_THRESHOLD");
        }
        if self.daily_stop_loss_limit == 0 {
            bail!("DAILY_STOP_LOSS_LIMIT must be positive");
        }
        if self.forced_close_minute <= self.reminder_minute
            || self.reminder_minute <= self.session_open_minute
        {
            bail!("session minutes must be ordered: open < reminder < forced close");
        }
        self.admission_config().validate()?;
        self.scoring_config().validate()?;
        Ok(())
    }

    pub fn scoring_config(&self) -> ScoringConfig {
        ScoringConfig {
            top_n: self.scoring_top_n,
            ..ScoringConfig::default()
        }
    }

    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            capital_per_trade: self.capital_per_trade,
            max_open_positions: self.max_open_positions,
            min_stars: self.min_stars,
            signal_ttl_minutes: self.signal_ttl_minutes,
        }
    }

    /// Trailing parameters vary per strategy: opening-gap trades move too
    /// fast off the open for a trail to hold, so they run breakeven-only.
    pub fn trailing_config(&self, strategy_id: &str) -> risk_manager::TrailingConfig {
        let trail_trigger_pct = match strategy_id {
            "opening_gap" => None,
            _ => Some(self.trail_trigger_pct),
        };
        risk_manager::TrailingConfig {
            breakeven_trigger_pct: self.breakeven_trigger_pct,
            trail_trigger_pct,
            trail_distance_pct: self.trail_distance_pct,
            tick_size: self.tick_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AgentConfig {
        AgentConfig {
            scan_interval_seconds: 1,
            watchlist: vec!["RELIANCE".into()],
            confirmation_lookback_minutes: 15,
            scoring_top_n: 10,
            capital_per_trade: 100_000.0,
            max_open_positions: 5,
            min_stars: 3,
            signal_ttl_minutes: 30,
            breakeven_trigger_pct: 1.5,
            trail_trigger_pct: 2.0,
            trail_distance_pct: 1.0,
            tick_size: 0.05,
            daily_stop_loss_limit: 3,
            strategy_throttle_threshold: 3,
            strategy_pause_threshold: 5,
            win_rate_lookback_days: 30,
            cycle_failure_threshold: 10,
            soft_cycle_budget_ms: 1000,
            session_open_minute: 555,
            reminder_minute: 900,
            forced_close_minute: 920,
            webhook_url: String::new(),
            database_url: "sqlite::memory:".into(),
        }
    }

    #[test]
    fn defaults_validate() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn pause_must_exceed_throttle() {
        let mut c = base();
        c.strategy_pause_threshold = 3;
        assert!(c.validate().is_err());
    }

    #[test]
    fn opening_gap_trails_breakeven_only() {
        let c = base();
        assert!(c.trailing_config("opening_gap").trail_trigger_pct.is_none());
        assert!(c.trailing_config("orb_breakout").trail_trigger_pct.is_some());
    }

    #[test]
    fn session_minutes_must_be_ordered() {
        let mut c = base();
        c.forced_close_minute = 800;
        assert!(c.validate().is_err());
    }
}
