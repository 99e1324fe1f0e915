use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use risk_manager::{AdaptiveLevel, Direction, ExitEvent};
use serde::{Deserialize, Serialize};

/// Time-of-day phase of the trading session. Strategies declare which phases
/// they run in; the admission path as a whole only runs in signal phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradingPhase {
    PreOpen,
    Opening,
    Morning,
    Midday,
    Late,
    AfterClose,
}

impl TradingPhase {
    /// Phase from minutes since session open. Boundaries: opening 30 min,
    /// morning until +150, midday until +300, late until +375 (NSE-style
    /// 375-minute session; the agent maps wall clock to this offset).
    pub fn from_session_offset(minutes: i64) -> Self {
        match minutes {
            m if m < 0 => TradingPhase::PreOpen,
            m if m < 30 => TradingPhase::Opening,
            m if m < 150 => TradingPhase::Morning,
            m if m < 300 => TradingPhase::Midday,
            m if m < 375 => TradingPhase::Late,
            _ => TradingPhase::AfterClose,
        }
    }

    /// New-signal admission is open during the scanning phases only; the
    /// late phase manages exits exclusively.
    pub fn admits_new_signals(&self) -> bool {
        matches!(
            self,
            TradingPhase::Opening | TradingPhase::Morning | TradingPhase::Midday
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradingPhase::PreOpen => "PRE_OPEN",
            TradingPhase::Opening => "OPENING",
            TradingPhase::Morning => "MORNING",
            TradingPhase::Midday => "MIDDAY",
            TradingPhase::Late => "LATE",
            TradingPhase::AfterClose => "AFTER_CLOSE",
        }
    }
}

/// Strategy-specific raw metrics. The same fields carry different semantics
/// per strategy (gap_pct is a VWAP distance for the reclaim strategy, the
/// surge ratio lives in volume_ratio, and so on) — the per-strategy strength
/// scorer knows how to read them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub gap_pct: f64,
    pub volume_ratio: f64,
    pub range_pct: f64,
}

/// Unvalidated trade idea from one strategy evaluator. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub symbol: String,
    pub direction: Direction,
    pub strategy_id: String,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_1: f64,
    pub target_2: f64,
    pub metrics: StrategyMetrics,
    pub rationale: String,
    pub generated_at: DateTime<Utc>,
}

impl CandidateSignal {
    /// Risk:reward using target-2 against the initial stop.
    pub fn risk_reward(&self) -> f64 {
        let risk = (self.entry_price - self.stop_price).abs();
        if risk <= f64::EPSILON {
            return 0.0;
        }
        (self.target_2 - self.entry_price).abs() / risk
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfirmationLevel {
    Single,
    Double,
    Triple,
}

impl ConfirmationLevel {
    pub fn from_strategy_count(count: usize) -> Self {
        match count {
            c if c >= 3 => ConfirmationLevel::Triple,
            2 => ConfirmationLevel::Double,
            _ => ConfirmationLevel::Single,
        }
    }

    pub fn size_multiplier(&self) -> f64 {
        match self {
            ConfirmationLevel::Single => 1.0,
            ConfirmationLevel::Double => 1.5,
            ConfirmationLevel::Triple => 2.0,
        }
    }

    pub fn star_bonus(&self) -> u8 {
        match self {
            ConfirmationLevel::Single => 0,
            ConfirmationLevel::Double => 1,
            ConfirmationLevel::Triple => 2,
        }
    }

    /// Double/triple agreement is allowed to re-signal a symbol that already
    /// fired today.
    pub fn bypasses_dedup(&self) -> bool {
        *self >= ConfirmationLevel::Double
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationLevel::Single => "SINGLE",
            ConfirmationLevel::Double => "DOUBLE",
            ConfirmationLevel::Triple => "TRIPLE",
        }
    }
}

/// Per-symbol multi-strategy agreement, recomputed every cycle from the
/// current batch plus the recent-signal lookback window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationResult {
    pub level: ConfirmationLevel,
    pub strategies: Vec<String>,
    pub size_multiplier: f64,
    pub star_bonus: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeScore {
    pub strength: f64,
    pub win_rate: f64,
    pub risk_reward: f64,
    pub confirmation: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedSignal {
    pub candidate: CandidateSignal,
    pub score: CompositeScore,
    pub rank: usize,
    pub stars: u8,
    pub confirmation: ConfirmationLevel,
}

/// Terminal output of the admission path. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalSignal {
    pub ranked: RankedSignal,
    pub quantity: i64,
    pub capital_committed: f64,
    pub expires_at: DateTime<Utc>,
}

/// Modifier hints from the out-of-scope advisory collaborator. `Default`
/// (all `None`) must behave exactly like running without the advisor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AdvisoryHints {
    pub min_stars: Option<u8>,
    pub size_multiplier: Option<f64>,
    pub max_positions: Option<usize>,
}

/// An accepted signal from the trailing confirmation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentSignal {
    pub symbol: String,
    pub strategy_id: String,
    pub generated_at: DateTime<Utc>,
}

/// The mutable state bag for exactly one pipeline execution. A fresh
/// instance is created every cycle; stage N only reads what stages < N
/// wrote. Read-only snapshot fields are copied in at cycle start.
#[derive(Debug)]
pub struct ScanContext {
    pub cycle_id: u64,
    pub now: DateTime<Utc>,

    // Read-only snapshot, copied in at cycle start
    pub phase: TradingPhase,
    pub admission_enabled: bool,
    pub hints: AdvisoryHints,
    pub open_positions: usize,
    pub open_symbols: HashSet<String>,
    pub signaled_today: HashSet<String>,
    /// Symbol -> owning strategy, for symbols claimed by an earlier-phase
    /// evaluator today.
    pub claimed_symbols: HashMap<String, String>,
    pub recent_signals: Vec<RecentSignal>,
    pub adaptive_levels: HashMap<String, AdaptiveLevel>,
    /// 30-day win rate per strategy (0.0..=1.0), cached once per day.
    pub win_rates: HashMap<String, f64>,

    // Stage-owned, written in pipeline order
    pub candidates: Vec<CandidateSignal>,
    pub confirmations: HashMap<String, ConfirmationResult>,
    pub ranked: Vec<RankedSignal>,
    pub finals: Vec<FinalSignal>,
    pub exit_events: Vec<ExitEvent>,
}

impl ScanContext {
    pub fn new(cycle_id: u64, now: DateTime<Utc>, phase: TradingPhase) -> Self {
        Self {
            cycle_id,
            now,
            phase,
            admission_enabled: phase.admits_new_signals(),
            hints: AdvisoryHints::default(),
            open_positions: 0,
            open_symbols: HashSet::new(),
            signaled_today: HashSet::new(),
            claimed_symbols: HashMap::new(),
            recent_signals: Vec::new(),
            adaptive_levels: HashMap::new(),
            win_rates: HashMap::new(),
            candidates: Vec::new(),
            confirmations: HashMap::new(),
            ranked: Vec::new(),
            finals: Vec::new(),
            exit_events: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_boundaries() {
        assert_eq!(TradingPhase::from_session_offset(-10), TradingPhase::PreOpen);
        assert_eq!(TradingPhase::from_session_offset(0), TradingPhase::Opening);
        assert_eq!(TradingPhase::from_session_offset(29), TradingPhase::Opening);
        assert_eq!(TradingPhase::from_session_offset(30), TradingPhase::Morning);
        assert_eq!(TradingPhase::from_session_offset(200), TradingPhase::Midday);
        assert_eq!(TradingPhase::from_session_offset(310), TradingPhase::Late);
        assert!(!TradingPhase::Late.admits_new_signals());
        assert_eq!(TradingPhase::from_session_offset(400), TradingPhase::AfterClose);
    }

    #[test]
    fn confirmation_levels_map_counts() {
        assert_eq!(
            ConfirmationLevel::from_strategy_count(1),
            ConfirmationLevel::Single
        );
        assert_eq!(
            ConfirmationLevel::from_strategy_count(2),
            ConfirmationLevel::Double
        );
        assert_eq!(
            ConfirmationLevel::from_strategy_count(5),
            ConfirmationLevel::Triple
        );
        assert!((ConfirmationLevel::Double.size_multiplier() - 1.5).abs() < 1e-9);
        assert_eq!(ConfirmationLevel::Triple.star_bonus(), 2);
        assert!(!ConfirmationLevel::Single.bypasses_dedup());
        assert!(ConfirmationLevel::Double.bypasses_dedup());
    }

    #[test]
    fn risk_reward_uses_target_two() {
        let c = CandidateSignal {
            symbol: "RELI".into(),
            direction: Direction::Long,
            strategy_id: "orb_breakout".into(),
            entry_price: 100.0,
            stop_price: 98.0,
            target_1: 102.0,
            target_2: 106.0,
            metrics: StrategyMetrics::default(),
            rationale: String::new(),
            generated_at: Utc::now(),
        };
        assert!((c.risk_reward() - 3.0).abs() < 1e-9);
    }
}
