use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;

use crate::types::{CandidateSignal, ConfirmationLevel, ConfirmationResult, ScanContext};

use super::ScanStage;

/// Deduplicates and cross-references the raw candidate batch:
/// symbols claimed by an exclusive evaluator are dropped outright, agreement
/// across strategies (this batch plus the recent lookback window) is scored
/// into confirmation levels, same-day repeats are dropped unless confirmed,
/// and the batch collapses to one candidate per symbol.
pub struct ConsolidationStage {
    lookback: Duration,
}

impl ConsolidationStage {
    pub fn new(lookback_minutes: i64) -> Self {
        Self {
            lookback: Duration::minutes(lookback_minutes),
        }
    }
}

#[async_trait]
impl ScanStage for ConsolidationStage {
    fn name(&self) -> &'static str {
        "consolidation"
    }

    async fn process(&mut self, ctx: &mut ScanContext) -> Result<()> {
        let mut survivors: Vec<CandidateSignal> = Vec::new();
        for candidate in std::mem::take(&mut ctx.candidates) {
            if let Some(owner) = ctx.claimed_symbols.get(&candidate.symbol) {
                if *owner != candidate.strategy_id {
                    tracing::debug!(
                        symbol = %candidate.symbol,
                        strategy = %candidate.strategy_id,
                        owner = %owner,
                        "symbol claimed by exclusive evaluator, dropping"
                    );
                    continue;
                }
            }
            if ctx.open_symbols.contains(&candidate.symbol) {
                continue;
            }
            survivors.push(candidate);
        }

        // Agreement per symbol: strategies in this batch plus accepted
        // signals inside the lookback window.
        let cutoff = ctx.now - self.lookback;
        let mut agreeing: HashMap<String, Vec<String>> = HashMap::new();
        for candidate in &survivors {
            let entry = agreeing.entry(candidate.symbol.clone()).or_default();
            if !entry.contains(&candidate.strategy_id) {
                entry.push(candidate.strategy_id.clone());
            }
        }
        for recent in &ctx.recent_signals {
            if recent.generated_at < cutoff {
                continue;
            }
            let Some(entry) = agreeing.get_mut(&recent.symbol) else {
                continue;
            };
            if !entry.contains(&recent.strategy_id) {
                entry.push(recent.strategy_id.clone());
            }
        }
        for (symbol, strategies) in agreeing {
            let level = ConfirmationLevel::from_strategy_count(strategies.len());
            ctx.confirmations.insert(
                symbol,
                ConfirmationResult {
                    level,
                    size_multiplier: level.size_multiplier(),
                    star_bonus: level.star_bonus(),
                    strategies,
                },
            );
        }

        // Same-day dedup, bypassed by multi-strategy agreement.
        survivors.retain(|c| {
            if !ctx.signaled_today.contains(&c.symbol) {
                return true;
            }
            ctx.confirmations
                .get(&c.symbol)
                .map(|r| r.level.bypasses_dedup())
                .unwrap_or(false)
        });

        // One candidate per symbol, earliest generation wins.
        let mut by_symbol: HashMap<String, CandidateSignal> = HashMap::new();
        for candidate in survivors {
            match by_symbol.get(&candidate.symbol) {
                Some(kept) if kept.generated_at <= candidate.generated_at => {}
                _ => {
                    by_symbol.insert(candidate.symbol.clone(), candidate);
                }
            }
        }
        let mut collapsed: Vec<CandidateSignal> = by_symbol.into_values().collect();
        collapsed.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        ctx.candidates = collapsed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecentSignal, StrategyMetrics, TradingPhase};
    use chrono::Utc;
    use risk_manager::Direction;

    fn candidate(symbol: &str, strategy: &str, offset_secs: i64) -> CandidateSignal {
        CandidateSignal {
            symbol: symbol.into(),
            direction: Direction::Long,
            strategy_id: strategy.into(),
            entry_price: 100.0,
            stop_price: 99.0,
            target_1: 101.0,
            target_2: 103.0,
            metrics: StrategyMetrics::default(),
            rationale: String::new(),
            generated_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    fn ctx() -> ScanContext {
        ScanContext::new(1, Utc::now(), TradingPhase::Morning)
    }

    #[tokio::test]
    async fn claimed_symbol_drops_other_evaluators() {
        let mut ctx = ctx();
        ctx.claimed_symbols
            .insert("RELI".into(), "opening_gap".into());
        ctx.candidates.push(candidate("RELI", "orb_breakout", 0));
        ctx.candidates.push(candidate("TATA", "orb_breakout", 0));

        let mut stage = ConsolidationStage::new(15);
        stage.process(&mut ctx).await.unwrap();
        assert_eq!(ctx.candidates.len(), 1);
        assert_eq!(ctx.candidates[0].symbol, "TATA");
    }

    #[tokio::test]
    async fn two_strategies_confirm_and_bypass_dedup() {
        let mut ctx = ctx();
        ctx.signaled_today.insert("INFY".into());
        ctx.candidates.push(candidate("INFY", "orb_breakout", 5));
        ctx.candidates.push(candidate("INFY", "volume_surge", 0));

        let mut stage = ConsolidationStage::new(15);
        stage.process(&mut ctx).await.unwrap();
        let conf = ctx.confirmations.get("INFY").unwrap();
        assert_eq!(conf.level, ConfirmationLevel::Double);
        // dedup bypassed, collapsed to the earlier candidate
        assert_eq!(ctx.candidates.len(), 1);
        assert_eq!(ctx.candidates[0].strategy_id, "volume_surge");
    }

    #[tokio::test]
    async fn single_strategy_repeat_is_deduped() {
        let mut ctx = ctx();
        ctx.signaled_today.insert("INFY".into());
        ctx.candidates.push(candidate("INFY", "orb_breakout", 0));

        let mut stage = ConsolidationStage::new(15);
        stage.process(&mut ctx).await.unwrap();
        assert!(ctx.candidates.is_empty());
    }

    #[tokio::test]
    async fn recent_window_counts_toward_confirmation() {
        let mut ctx = ctx();
        ctx.candidates.push(candidate("HDFC", "vwap_reclaim", 0));
        ctx.recent_signals.push(RecentSignal {
            symbol: "HDFC".into(),
            strategy_id: "volume_surge".into(),
            generated_at: ctx.now - Duration::minutes(10),
        });
        // outside the window, does not count
        ctx.recent_signals.push(RecentSignal {
            symbol: "HDFC".into(),
            strategy_id: "orb_breakout".into(),
            generated_at: ctx.now - Duration::minutes(40),
        });

        let mut stage = ConsolidationStage::new(15);
        stage.process(&mut ctx).await.unwrap();
        let conf = ctx.confirmations.get("HDFC").unwrap();
        assert_eq!(conf.level, ConfirmationLevel::Double);
        assert_eq!(conf.strategies.len(), 2);
    }

    #[tokio::test]
    async fn open_symbol_is_excluded() {
        let mut ctx = ctx();
        ctx.open_symbols.insert("SBIN".into());
        ctx.candidates.push(candidate("SBIN", "orb_breakout", 0));

        let mut stage = ConsolidationStage::new(15);
        stage.process(&mut ctx).await.unwrap();
        assert!(ctx.candidates.is_empty());
    }
}
