use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use market_data::{MarketDataStore, StoreConfig, TickUpdate};
use risk_manager::{
    AdaptiveManager, CircuitBreaker, EventBus, ExitEvent, ExitMonitor, TradeEventHandler,
    TradeRecord, TradeStatus,
};
use signal_engine::stages::{
    AdmissionStage, ConsolidationStage, DeliveryStage, ExitStage, ScanStage, ScoringStage,
    StrategyStage,
};
use signal_engine::strategies::{
    OpeningGapConfig, OpeningGapStrategy, OrbBreakoutConfig, OrbBreakoutStrategy, Strategy,
    VolumeSurgeConfig, VolumeSurgeStrategy, VwapReclaimConfig, VwapReclaimStrategy,
};
use signal_engine::{
    AdvisoryProvider, DeliveryChannel, NoopAdvisory, PipelineExecutor, ScanContext,
    SignalRepository,
};
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;
use tokio::time;

mod config;
mod metrics;
mod notifier;
mod repository;
mod session;

use config::AgentConfig;
use metrics::ScanMetrics;
use notifier::WebhookNotifier;
use repository::SignalDb;
use session::SessionClock;

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting TickScout scan agent");

    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Watchlist: {} symbols", config.watchlist.len());
    tracing::info!("  Scan interval: {}s", config.scan_interval_seconds);
    tracing::info!(
        "  Capital per trade: {} | Max positions: {} | Min stars: {}",
        config.capital_per_trade,
        config.max_open_positions,
        config.min_stars
    );
    tracing::info!(
        "  Daily stop limit: {} | Throttle/pause: {}/{}",
        config.daily_stop_loss_limit,
        config.strategy_throttle_threshold,
        config.strategy_pause_threshold
    );

    // Persistence and delivery collaborators
    let db = SignalDb::connect(&config.database_url).await?;
    let repository: Arc<dyn SignalRepository> = Arc::new(db.clone());
    tracing::info!("Database ready ({})", config.database_url);

    let channel: Arc<dyn DeliveryChannel> =
        Arc::new(WebhookNotifier::new(config.webhook_url.clone())?);
    tracing::info!("Webhook notifier ready");

    // Market data store and the tick feed task. The feed adapter (out of
    // process) pushes ticks into the sender half.
    let store = Arc::new(MarketDataStore::new(StoreConfig::default()));
    let (feed_tx, feed_rx) = mpsc::channel::<TickUpdate>(1024);
    let feed_task = market_data::spawn_feed_handler(Arc::clone(&store), feed_rx);
    tracing::info!("Market data feed handler running");

    // Exit monitor, re-seeded from trades left open by a previous run
    let monitor = Arc::new(Mutex::new(ExitMonitor::new(chrono::Duration::minutes(5))));
    let carried = repository.active_trades().await?;
    if !carried.is_empty() {
        tracing::warn!("Re-seeding exit monitor with {} open trades", carried.len());
        let mut guard = lock_or_recover(&monitor);
        for trade in carried {
            let trailing = config.trailing_config(&trade.strategy_id);
            guard.open_trade(trade, trailing);
        }
    }

    // Feedback controllers, wired to the close-event bus
    let breaker = Arc::new(Mutex::new(CircuitBreaker::new(config.daily_stop_loss_limit)));
    let adaptive = Arc::new(Mutex::new(AdaptiveManager::new(
        config.strategy_throttle_threshold,
        config.strategy_pause_threshold,
    )));
    let mut bus = EventBus::new();
    bus.register(Arc::clone(&breaker) as Arc<Mutex<dyn TradeEventHandler>>);
    bus.register(Arc::clone(&adaptive) as Arc<Mutex<dyn TradeEventHandler>>);
    tracing::info!("Circuit breaker and adaptive throttle registered");

    // Strategy evaluators
    let strategies: Vec<Box<dyn Strategy>> = vec![
        Box::new(OpeningGapStrategy::new(OpeningGapConfig::default())),
        Box::new(OrbBreakoutStrategy::new(OrbBreakoutConfig::default())),
        Box::new(VwapReclaimStrategy::new(VwapReclaimConfig::default())),
        Box::new(VolumeSurgeStrategy::new(VolumeSurgeConfig::default())),
    ];
    let strategy_ids: Vec<String> = strategies.iter().map(|s| s.id().to_string()).collect();
    let exclusive_strategies: HashSet<String> = strategies
        .iter()
        .filter(|s| s.claims_exclusivity())
        .map(|s| s.id().to_string())
        .collect();
    tracing::info!("{} strategy evaluators registered", strategies.len());

    // Pipeline assembly: exits always first, then the admission path
    let exit_stages: Vec<Box<dyn ScanStage>> = vec![Box::new(ExitStage::new(
        Arc::clone(&monitor),
        Arc::clone(&store),
        bus.clone(),
        Arc::clone(&repository),
        Arc::clone(&channel),
    ))];
    let admission_stages: Vec<Box<dyn ScanStage>> = vec![
        Box::new(StrategyStage::new(Arc::clone(&store), strategies)),
        Box::new(ConsolidationStage::new(config.confirmation_lookback_minutes)),
        Box::new(ScoringStage::new(config.scoring_config())?),
        Box::new(AdmissionStage::new(config.admission_config())?),
        Box::new(DeliveryStage::new(
            Arc::clone(&repository),
            Arc::clone(&channel),
        )),
    ];
    let mut executor = PipelineExecutor::new(
        exit_stages,
        admission_stages,
        Arc::clone(&channel),
        config.cycle_failure_threshold,
    );
    tracing::info!("Pipeline executor assembled");

    let advisory = NoopAdvisory;
    let clock = SessionClock::new(
        config.session_open_minute,
        config.reminder_minute,
        config.forced_close_minute,
    );
    let mut scan_metrics = ScanMetrics::new(config.soft_cycle_budget_ms, 10);

    repository.insert_log("INFO", "scan agent started").await?;
    channel
        .deliver_alert(&format!(
            "TickScout started: {} symbols, scanning every {}s",
            config.watchlist.len(),
            config.scan_interval_seconds
        ))
        .await
        .ok();

    tracing::info!(
        "Agent running. Scanning every {}s. Press Ctrl+C to stop.",
        config.scan_interval_seconds
    );

    // Per-day state
    let mut current_session: Option<NaiveDate> = None;
    let mut signaled_today: HashSet<String> = HashSet::new();
    let mut claimed_symbols: HashMap<String, String> = HashMap::new();
    let mut win_rates: HashMap<String, f64> = HashMap::new();
    let mut reminder_sent = false;
    let mut forced_close_done = false;
    let mut cycle_id: u64 = 0;

    let mut interval = time::interval(Duration::from_secs(config.scan_interval_seconds));
    // An overrunning cycle starts the next one late; missed ticks are never
    // queued or replayed in a burst.
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now();
                let today = clock.session_date(now);

                // Daily session rollover, at or after the open. Adaptive
                // throttle state deliberately carries across days.
                if clock.is_trading_day(now)
                    && clock.minutes_since_open(now) >= 0
                    && current_session != Some(today)
                {
                    tracing::info!(date = %today, "session start: resetting daily state");
                    store.session_reset(clock.session_open_utc(now));
                    executor.reset_daily();
                    lock_or_recover(&breaker).session_reset();
                    signaled_today.clear();
                    claimed_symbols.clear();
                    reminder_sent = false;
                    forced_close_done = false;
                    win_rates = load_win_rates(
                        repository.as_ref(),
                        &strategy_ids,
                        config.win_rate_lookback_days,
                    )
                    .await;
                    current_session = Some(today);
                    repository.insert_log("INFO", "session reset complete").await.ok();
                }

                cycle_id += 1;
                let timer = ScanMetrics::start_timer();

                let mut ctx = ScanContext::new(cycle_id, now, clock.phase(now));
                ctx.admission_enabled = ctx.phase.admits_new_signals()
                    && lock_or_recover(&breaker).admission_allowed();
                ctx.hints = advisory.hints();
                {
                    let guard = lock_or_recover(&monitor);
                    ctx.open_positions = guard.open_count();
                    ctx.open_symbols = guard.open_symbols().into_iter().collect();
                }
                ctx.signaled_today = signaled_today.clone();
                ctx.claimed_symbols = claimed_symbols.clone();
                ctx.adaptive_levels = lock_or_recover(&adaptive).levels();
                ctx.win_rates = win_rates.clone();
                match repository
                    .recent_signals(now - chrono::Duration::minutes(config.confirmation_lookback_minutes))
                    .await
                {
                    Ok(recent) => ctx.recent_signals = recent,
                    Err(e) => tracing::warn!(error = %e, "failed to load recent signals"),
                }

                if let Err(e) = executor.run_cycle(&mut ctx).await {
                    tracing::error!(cycle = cycle_id, error = %e, "cycle failed");
                    channel
                        .deliver_alert(&format!("cycle #{cycle_id} error: {e} (agent still running)"))
                        .await
                        .ok();
                }

                // Open paper trades for everything admitted this cycle
                for signal in &ctx.finals {
                    let c = &signal.ranked.candidate;
                    let mut trade = TradeRecord {
                        id: 0,
                        symbol: c.symbol.clone(),
                        direction: c.direction,
                        strategy_id: c.strategy_id.clone(),
                        entry_price: c.entry_price,
                        quantity: signal.quantity,
                        stop_price: c.stop_price,
                        target_1: c.target_1,
                        target_2: c.target_2,
                        opened_at: now,
                        status: TradeStatus::Open,
                        exit_price: None,
                        exit_reason: None,
                        closed_at: None,
                    };
                    // An unpersisted signal still consumed its slot for the day
                    signaled_today.insert(c.symbol.clone());
                    if exclusive_strategies.contains(&c.strategy_id) {
                        claimed_symbols.insert(c.symbol.clone(), c.strategy_id.clone());
                    }
                    match repository.insert_trade(&trade).await {
                        Ok(id) => {
                            trade.id = id;
                            let trailing = config.trailing_config(&c.strategy_id);
                            lock_or_recover(&monitor).open_trade(trade, trailing);
                            scan_metrics.trades_opened += 1;
                        }
                        Err(e) => {
                            tracing::error!(symbol = %c.symbol, error = %e, "failed to open paper trade");
                        }
                    }
                }

                scan_metrics.candidates_seen += ctx.ranked.len() as u64;
                scan_metrics.signals_admitted += ctx.finals.len() as u64;
                for event in &ctx.exit_events {
                    if let ExitEvent::Closed(closed) = event {
                        scan_metrics.trades_closed += 1;
                        if closed.reason.is_stop() {
                            scan_metrics.stops_hit += 1;
                        }
                    }
                }

                // End-of-day reminder, then the mandatory close
                if clock.past_reminder(now) && !reminder_sent {
                    let advisories = lock_or_recover(&monitor).session_end_advisories();
                    for reminder in &advisories {
                        if let Err(e) = channel.deliver_advisory(reminder).await {
                            tracing::error!(symbol = %reminder.symbol, error = %e, "failed to deliver reminder");
                        }
                    }
                    reminder_sent = true;
                }
                if clock.past_forced_close(now) && !forced_close_done {
                    let events = lock_or_recover(&monitor).force_close_all(&store, now);
                    for event in &events {
                        if let ExitEvent::Closed(closed) = event {
                            bus.dispatch(closed);
                            scan_metrics.trades_closed += 1;
                            if let Err(e) = repository.record_trade_close(closed).await {
                                tracing::error!(trade_id = closed.trade_id, error = %e, "failed to persist forced close");
                            }
                            channel
                                .deliver_alert(&format!(
                                    "TIME EXIT {} {} @ {:.2} pnl {:.2}",
                                    closed.symbol, closed.quantity, closed.exit_price, closed.pnl
                                ))
                                .await
                                .ok();
                        }
                    }
                    forced_close_done = true;
                }

                scan_metrics.finish_cycle(timer);
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, exiting gracefully...");
                scan_metrics.log_metrics();
                break;
            }
        }
    }

    // Teardown order: feed first (no new ticks), then outward notification,
    // then persistence.
    drop(feed_tx);
    feed_task.await.ok();
    channel.deliver_alert("TickScout stopped").await.ok();
    repository.insert_log("INFO", "scan agent stopped").await.ok();
    tracing::info!("Scan agent shut down.");
    Ok(())
}

async fn load_win_rates(
    repository: &dyn SignalRepository,
    strategy_ids: &[String],
    days: i64,
) -> HashMap<String, f64> {
    let mut rates = HashMap::new();
    for id in strategy_ids {
        match repository.strategy_win_rate(id, days).await {
            Ok(Some(rate)) => {
                tracing::info!(strategy = %id, rate = format!("{:.0}%", rate * 100.0), "win rate cached");
                rates.insert(id.clone(), rate);
            }
            Ok(None) => {
                tracing::info!(strategy = %id, "no closed trades in window, scoring neutral");
            }
            Err(e) => {
                tracing::warn!(strategy = %id, error = %e, "win rate query failed, scoring neutral");
            }
        }
    }
    rates
}
