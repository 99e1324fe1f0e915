use std::time::Instant;

/// Per-cycle and aggregate telemetry, emitted via tracing on an interval.
pub struct ScanMetrics {
    pub cycles_run: u64,
    pub candidates_seen: u64,
    pub signals_admitted: u64,
    pub trades_opened: u64,
    pub trades_closed: u64,
    pub stops_hit: u64,
    pub last_cycle_ms: u64,

    soft_budget_ms: u64,
    log_interval_cycles: u64,
}

impl ScanMetrics {
    pub fn new(soft_budget_ms: u64, log_interval_cycles: u64) -> Self {
        Self {
            cycles_run: 0,
            candidates_seen: 0,
            signals_admitted: 0,
            trades_opened: 0,
            trades_closed: 0,
            stops_hit: 0,
            last_cycle_ms: 0,
            soft_budget_ms,
            log_interval_cycles,
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    /// Finish a cycle: record timing, warn when past the soft budget, and
    /// periodically emit the aggregate summary.
    pub fn finish_cycle(&mut self, cycle_start: Instant) {
        self.last_cycle_ms = cycle_start.elapsed().as_millis() as u64;
        self.cycles_run += 1;

        if self.soft_budget_ms > 0 && self.last_cycle_ms > self.soft_budget_ms {
            tracing::warn!(
                cycle = self.cycles_run,
                elapsed_ms = self.last_cycle_ms,
                budget_ms = self.soft_budget_ms,
                "cycle overran soft latency budget"
            );
        }
        if self.log_interval_cycles > 0 && self.cycles_run % self.log_interval_cycles == 0 {
            self.log_metrics();
        }
    }

    pub fn log_metrics(&self) {
        tracing::info!(
            cycles = self.cycles_run,
            candidates = self.candidates_seen,
            admitted = self.signals_admitted,
            trades_opened = self.trades_opened,
            trades_closed = self.trades_closed,
            stops_hit = self.stops_hit,
            last_cycle_ms = self.last_cycle_ms,
            "scan metrics summary"
        );
    }
}
