use anyhow::{bail, Result};
use async_trait::async_trait;
use risk_manager::AdaptiveLevel;

use crate::strategies::normalize;
use crate::types::{
    CandidateSignal, CompositeScore, ConfirmationLevel, RankedSignal, ScanContext,
};

use super::ScanStage;

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub weight_strength: f64,
    pub weight_win_rate: f64,
    pub weight_risk_reward: f64,
    pub weight_confirmation: f64,
    /// Survivors past this rank are cut before admission.
    pub top_n: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weight_strength: 0.35,
            weight_win_rate: 0.25,
            weight_risk_reward: 0.25,
            weight_confirmation: 0.15,
            top_n: 10,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        let sum = self.weight_strength
            + self.weight_win_rate
            + self.weight_risk_reward
            + self.weight_confirmation;
        if (sum - 1.0).abs() > 1e-6 {
            bail!("scoring weights must sum to 1.0, got {sum}");
        }
        if self.top_n == 0 {
            bail!("scoring top_n must be at least 1");
        }
        Ok(())
    }
}

/// Composite scoring and ranking. Candidates from paused strategies are
/// dropped here, and reduced strategies only keep their 5-star setups;
/// everything surviving gets a 0-100 composite, a star rating, and a
/// deterministic rank.
pub struct ScoringStage {
    config: ScoringConfig,
}

impl ScoringStage {
    pub fn new(config: ScoringConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Setup strength on the 0-100 scale. Each strategy's raw metrics are
    /// read against its own empirical bounds; an unknown strategy id scores
    /// neutral.
    fn strength(candidate: &CandidateSignal) -> f64 {
        let m = &candidate.metrics;
        match candidate.strategy_id.as_str() {
            "opening_gap" => normalize(m.gap_pct.abs(), 2.0, 5.0),
            // tighter opening range, cleaner breakout
            "orb_breakout" => 100.0 - normalize(m.range_pct, 0.3, 3.0),
            // closer to VWAP, better entry
            "vwap_reclaim" => 100.0 - normalize(m.gap_pct, 0.0, 0.5),
            "volume_surge" => normalize(m.volume_ratio, 2.0, 6.0),
            _ => 50.0,
        }
    }

    fn confirmation_component(level: ConfirmationLevel) -> f64 {
        match level {
            ConfirmationLevel::Single => 0.0,
            ConfirmationLevel::Double => 50.0,
            ConfirmationLevel::Triple => 100.0,
        }
    }

    fn stars(total: f64, level: ConfirmationLevel) -> u8 {
        let base = match total {
            t if t < 30.0 => 1,
            t if t < 50.0 => 2,
            t if t < 70.0 => 3,
            t if t < 85.0 => 4,
            _ => 5,
        };
        (base + level.star_bonus()).min(5)
    }
}

#[async_trait]
impl ScanStage for ScoringStage {
    fn name(&self) -> &'static str {
        "scoring"
    }

    async fn process(&mut self, ctx: &mut ScanContext) -> Result<()> {
        let mut ranked: Vec<RankedSignal> = Vec::new();
        for candidate in std::mem::take(&mut ctx.candidates) {
            let adaptive = ctx
                .adaptive_levels
                .get(&candidate.strategy_id)
                .copied()
                .unwrap_or(AdaptiveLevel::Normal);
            if adaptive == AdaptiveLevel::Paused {
                tracing::debug!(
                    symbol = %candidate.symbol,
                    strategy = %candidate.strategy_id,
                    "strategy paused by adaptive control, dropping candidate"
                );
                continue;
            }
            let level = ctx
                .confirmations
                .get(&candidate.symbol)
                .map(|c| c.level)
                .unwrap_or(ConfirmationLevel::Single);

            let strength = Self::strength(&candidate);
            let win_rate = ctx
                .win_rates
                .get(&candidate.strategy_id)
                .map(|w| w * 100.0)
                .unwrap_or(50.0);
            let risk_reward = normalize(candidate.risk_reward(), 1.0, 3.0);
            let confirmation = Self::confirmation_component(level);
            let total = strength * self.config.weight_strength
                + win_rate * self.config.weight_win_rate
                + risk_reward * self.config.weight_risk_reward
                + confirmation * self.config.weight_confirmation;

            let stars = Self::stars(total, level);
            if adaptive == AdaptiveLevel::Reduced && stars < 5 {
                tracing::debug!(
                    symbol = %candidate.symbol,
                    strategy = %candidate.strategy_id,
                    stars,
                    "strategy reduced by adaptive control, only 5-star setups pass"
                );
                continue;
            }

            ranked.push(RankedSignal {
                stars,
                confirmation: level,
                score: CompositeScore {
                    strength,
                    win_rate,
                    risk_reward,
                    confirmation,
                    total,
                },
                rank: 0,
                candidate,
            });
        }

        ranked.sort_by(|a, b| {
            b.score
                .total
                .partial_cmp(&a.score.total)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.candidate.generated_at.cmp(&b.candidate.generated_at))
                .then_with(|| a.candidate.symbol.cmp(&b.candidate.symbol))
        });
        ranked.truncate(self.config.top_n);
        for (i, signal) in ranked.iter_mut().enumerate() {
            signal.rank = i + 1;
        }
        ctx.ranked = ranked;
        Ok(())
    }
}
