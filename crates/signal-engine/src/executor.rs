use std::sync::Arc;

use anyhow::Result;

use crate::ports::DeliveryChannel;
use crate::stages::ScanStage;
use crate::types::ScanContext;

/// Drives one cycle through the staged pipeline.
///
/// Exit stages run first, every cycle, unconditionally. Admission stages run
/// only when the context allows admission and the executor has not disabled
/// itself; a failing admission stage aborts the rest of the admission path
/// for that cycle. After `failure_threshold` consecutive failed cycles the
/// executor stops admitting and pages the operator once; exits keep running
/// throughout.
pub struct PipelineExecutor {
    exit_stages: Vec<Box<dyn ScanStage>>,
    admission_stages: Vec<Box<dyn ScanStage>>,
    channel: Arc<dyn DeliveryChannel>,
    failure_threshold: u32,
    consecutive_failures: u32,
    self_disabled: bool,
}

impl PipelineExecutor {
    pub fn new(
        exit_stages: Vec<Box<dyn ScanStage>>,
        admission_stages: Vec<Box<dyn ScanStage>>,
        channel: Arc<dyn DeliveryChannel>,
        failure_threshold: u32,
    ) -> Self {
        Self {
            exit_stages,
            admission_stages,
            channel,
            failure_threshold: failure_threshold.max(1),
            consecutive_failures: 0,
            self_disabled: false,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.self_disabled
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Operator acknowledgment: clears the failure streak and re-enables
    /// admission.
    pub fn acknowledge_failures(&mut self) {
        self.consecutive_failures = 0;
        self.self_disabled = false;
        tracing::info!("pipeline failures acknowledged, admission re-enabled");
    }

    /// Session-start reset of per-day stage state.
    pub fn reset_daily(&mut self) {
        for stage in self
            .exit_stages
            .iter_mut()
            .chain(self.admission_stages.iter_mut())
        {
            stage.reset_daily();
        }
    }

    pub async fn run_cycle(&mut self, ctx: &mut ScanContext) -> Result<()> {
        let mut cycle_failed = false;

        // Exit stages are isolated from one another: a failing sweep never
        // stops the remaining exit stages.
        for stage in &mut self.exit_stages {
            if let Err(e) = stage.process(ctx).await {
                tracing::error!(cycle = ctx.cycle_id, stage = stage.name(), error = %e, "exit stage failed");
                cycle_failed = true;
            }
        }

        if ctx.admission_enabled && !self.self_disabled && !cycle_failed {
            for stage in &mut self.admission_stages {
                if let Err(e) = stage.process(ctx).await {
                    tracing::error!(cycle = ctx.cycle_id, stage = stage.name(), error = %e, "admission stage failed, aborting admission path");
                    cycle_failed = true;
                    break;
                }
            }
        } else if !ctx.admission_enabled {
            tracing::debug!(cycle = ctx.cycle_id, phase = ctx.phase.as_str(), "admission gated off");
        }

        if cycle_failed {
            self.consecutive_failures += 1;
            if self.consecutive_failures >= self.failure_threshold && !self.self_disabled {
                self.self_disabled = true;
                tracing::error!(
                    failures = self.consecutive_failures,
                    "failure threshold reached, disabling admission until acknowledged"
                );
                if let Err(e) = self
                    .channel
                    .deliver_alert(&format!(
                        "scanner disabled after {} consecutive failed cycles; exits still monitored",
                        self.consecutive_failures
                    ))
                    .await
                {
                    tracing::error!(error = %e, "failed to deliver disable alert");
                }
            }
        } else {
            self.consecutive_failures = 0;
        }
        Ok(())
    }
}
