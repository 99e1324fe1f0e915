use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Duration;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::types::{ConfirmationLevel, FinalSignal, ScanContext};

use super::ScanStage;

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Base capital per single-confirmation trade.
    pub capital_per_trade: f64,
    pub max_open_positions: usize,
    pub min_stars: u8,
    pub signal_ttl_minutes: i64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capital_per_trade: 100_000.0,
            max_open_positions: 5,
            min_stars: 3,
            signal_ttl_minutes: 30,
        }
    }
}

impl AdmissionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capital_per_trade <= 0.0 {
            bail!("capital_per_trade must be positive");
        }
        if self.min_stars == 0 || self.min_stars > 5 {
            bail!("min_stars must be within 1..=5");
        }
        Ok(())
    }
}

/// The admission gate: star floor, open-slot budget, and position sizing.
/// Takes the ranked list in rank order, admits at most the free slot count,
/// and sizes each with whole-share floor division. A signal sized to zero
/// shares is dropped without backfilling from lower ranks; an advisory size
/// multiplier below 1.0 then scales the surviving quantity with a hard
/// floor of one share.
pub struct AdmissionStage {
    config: AdmissionConfig,
}

impl AdmissionStage {
    pub fn new(config: AdmissionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    fn whole_shares(capital: f64, entry: f64) -> Option<i64> {
        if entry <= 0.0 {
            return None;
        }
        let capital = Decimal::from_f64(capital)?;
        let entry = Decimal::from_f64(entry)?;
        (capital / entry).floor().to_i64()
    }
}

#[async_trait]
impl ScanStage for AdmissionStage {
    fn name(&self) -> &'static str {
        "admission"
    }

    async fn process(&mut self, ctx: &mut ScanContext) -> Result<()> {
        let min_stars = self.config.min_stars.max(ctx.hints.min_stars.unwrap_or(0));
        let max_positions = ctx
            .hints
            .max_positions
            .unwrap_or(self.config.max_open_positions);
        let slots = max_positions.saturating_sub(ctx.open_positions);
        if slots == 0 {
            tracing::debug!(open = ctx.open_positions, "no free position slots");
            return Ok(());
        }
        let hint_factor = ctx.hints.size_multiplier.unwrap_or(1.0);

        let admitted: Vec<_> = ctx
            .ranked
            .iter()
            .filter(|r| r.stars >= min_stars)
            .take(slots)
            .cloned()
            .collect();

        for signal in admitted {
            let confirmation_factor = ctx
                .confirmations
                .get(&signal.candidate.symbol)
                .map(|c| c.size_multiplier)
                .unwrap_or_else(|| ConfirmationLevel::Single.size_multiplier());
            let capital = self.config.capital_per_trade * confirmation_factor;

            let Some(mut quantity) = Self::whole_shares(capital, signal.candidate.entry_price)
            else {
                tracing::warn!(symbol = %signal.candidate.symbol, "unsizable entry price, dropping");
                continue;
            };
            if quantity < 1 {
                tracing::info!(
                    symbol = %signal.candidate.symbol,
                    entry = signal.candidate.entry_price,
                    capital,
                    "sized to zero shares, dropping"
                );
                continue;
            }
            if hint_factor < 1.0 {
                // advisory reduction scales an already-admitted signal, never
                // down to zero shares
                quantity = ((quantity as f64 * hint_factor.max(0.0)).floor() as i64).max(1);
            }

            ctx.finals.push(FinalSignal {
                quantity,
                capital_committed: quantity as f64 * signal.candidate.entry_price,
                expires_at: ctx.now + Duration::minutes(self.config.signal_ttl_minutes),
                ranked: signal,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CandidateSignal, CompositeScore, ConfirmationResult, RankedSignal, StrategyMetrics,
        TradingPhase,
    };
    use chrono::Utc;
    use risk_manager::Direction;

    fn ranked(symbol: &str, rank: usize, stars: u8, entry: f64) -> RankedSignal {
        RankedSignal {
            candidate: CandidateSignal {
                symbol: symbol.into(),
                direction: Direction::Long,
                strategy_id: "orb_breakout".into(),
                entry_price: entry,
                stop_price: entry * 0.98,
                target_1: entry * 1.02,
                target_2: entry * 1.06,
                metrics: StrategyMetrics::default(),
                rationale: String::new(),
                generated_at: Utc::now(),
            },
            score: CompositeScore {
                strength: 50.0,
                win_rate: 50.0,
                risk_reward: 100.0,
                confirmation: 0.0,
                total: 100.0 - rank as f64,
            },
            rank,
            stars,
            confirmation: ConfirmationLevel::Single,
        }
    }

    fn ctx() -> ScanContext {
        ScanContext::new(1, Utc::now(), TradingPhase::Morning)
    }

    #[tokio::test]
    async fn slots_cap_admissions_in_rank_order() {
        let mut ctx = ctx();
        ctx.open_positions = 3;
        for (i, sym) in ["AAA", "BBB", "CCC", "DDD"].iter().enumerate() {
            ctx.ranked.push(ranked(sym, i + 1, 4, 100.0));
        }
        let mut stage = AdmissionStage::new(AdmissionConfig::default()).unwrap();
        stage.process(&mut ctx).await.unwrap();
        // 5 max - 3 open = 2 slots
        assert_eq!(ctx.finals.len(), 2);
        assert_eq!(ctx.finals[0].ranked.candidate.symbol, "AAA");
        assert_eq!(ctx.finals[1].ranked.candidate.symbol, "BBB");
    }

    #[tokio::test]
    async fn star_floor_respects_advisory_hint() {
        let mut ctx = ctx();
        ctx.hints.min_stars = Some(4);
        ctx.ranked.push(ranked("AAA", 1, 3, 100.0));
        ctx.ranked.push(ranked("BBB", 2, 4, 100.0));

        let mut stage = AdmissionStage::new(AdmissionConfig::default()).unwrap();
        stage.process(&mut ctx).await.unwrap();
        assert_eq!(ctx.finals.len(), 1);
        assert_eq!(ctx.finals[0].ranked.candidate.symbol, "BBB");
    }

    #[tokio::test]
    async fn zero_quantity_is_dropped_without_backfill() {
        let mut ctx = ctx();
        // entry far above per-trade capital sizes to zero shares
        ctx.ranked.push(ranked("AAA", 1, 5, 150_000.0));
        ctx.ranked.push(ranked("BBB", 2, 5, 100.0));
        let config = AdmissionConfig {
            max_open_positions: 1,
            ..AdmissionConfig::default()
        };
        let mut stage = AdmissionStage::new(config).unwrap();
        stage.process(&mut ctx).await.unwrap();
        // the single slot went to AAA which sized to zero; BBB is not pulled up
        assert!(ctx.finals.is_empty());
    }

    #[tokio::test]
    async fn confirmation_multiplier_scales_size() {
        let mut ctx = ctx();
        ctx.ranked.push(ranked("AAA", 1, 4, 100.0));
        ctx.confirmations.insert(
            "AAA".into(),
            ConfirmationResult {
                level: ConfirmationLevel::Double,
                strategies: vec!["orb_breakout".into(), "volume_surge".into()],
                size_multiplier: 1.5,
                star_bonus: 1,
            },
        );

        let mut stage = AdmissionStage::new(AdmissionConfig::default()).unwrap();
        stage.process(&mut ctx).await.unwrap();
        // 100_000 * 1.5 at entry 100 -> 1500 shares
        assert_eq!(ctx.finals[0].quantity, 1500);
        assert!((ctx.finals[0].capital_committed - 150_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn size_hint_scales_down_with_one_share_floor() {
        let mut ctx = ctx();
        ctx.hints.size_multiplier = Some(0.5);
        ctx.ranked.push(ranked("AAA", 1, 4, 100.0));
        // sizes to exactly 1 share before the hint applies
        ctx.ranked.push(ranked("BBB", 2, 4, 99_000.0));

        let mut stage = AdmissionStage::new(AdmissionConfig::default()).unwrap();
        stage.process(&mut ctx).await.unwrap();
        assert_eq!(ctx.finals.len(), 2);
        // 1000 shares halved
        assert_eq!(ctx.finals[0].quantity, 500);
        // floor(1 * 0.5) = 0 but the hint never drops an admitted signal
        assert_eq!(ctx.finals[1].quantity, 1);
    }

    #[tokio::test]
    async fn advisory_position_cap_overrides_config() {
        let mut ctx = ctx();
        ctx.hints.max_positions = Some(4);
        for (i, sym) in ["AAA", "BBB", "CCC", "DDD", "EEE", "FFF"].iter().enumerate() {
            ctx.ranked.push(ranked(sym, i + 1, 4, 100.0));
        }

        let config = AdmissionConfig {
            max_open_positions: 6,
            ..AdmissionConfig::default()
        };
        let mut stage = AdmissionStage::new(config).unwrap();
        stage.process(&mut ctx).await.unwrap();
        // the hint caps at 4 even though config would allow 6
        assert_eq!(ctx.finals.len(), 4);
        assert_eq!(ctx.finals[3].ranked.candidate.symbol, "DDD");
    }
}
