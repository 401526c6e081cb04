use chrono::{DateTime, Utc};
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info};

use super::batch::{BatchConfig, BatchRunner, RunState, RunSummary};
use super::processor::{CustomerProcessor, ProcessorConfig, RecomputeOutcome};
use crate::config::{NotificationConfig, SchedulerConfig};
use crate::domain::CustomerId;
use crate::notification::PackageAlertScanner;
use crate::store::Ports;
use crate::utils::error::EngineResult;
use crate::utils::metrics::{Metrics, Timer};

/// Entry point for batch runs and single-customer recomputes
pub struct LifecycleEngine {
    ports: Ports,
    processor: Arc<CustomerProcessor>,
    runner: BatchRunner,
    metrics: Metrics,
    state: Mutex<RunState>,
}

impl LifecycleEngine {
    pub fn new(
        ports: Ports,
        scheduler: &SchedulerConfig,
        notification: &NotificationConfig,
        metrics: Metrics,
    ) -> Self {
        let processor = Arc::new(CustomerProcessor::new(
            &ports,
            ProcessorConfig {
                aggregation_retries: scheduler.aggregation_retries,
                retry_backoff: scheduler.retry_backoff(),
                recipient: notification.recipient_user_id,
                iteration_timeout: scheduler.iteration_timeout(),
            },
        ));

        let scanner = PackageAlertScanner::new(
            ports.packages.clone(),
            ports.ledger.clone(),
            ports.sink.clone(),
            notification.clone(),
        );

        let runner = BatchRunner::new(
            ports.clone(),
            processor.clone(),
            scanner,
            BatchConfig {
                worker_concurrency: scheduler.worker_concurrency,
            },
        );

        Self {
            ports,
            processor,
            runner,
            metrics,
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// `Idle` until the first run starts, then the state of the latest run
    pub fn run_state(&self) -> RunState {
        self.state.lock().clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.ports.clock.now()
    }

    pub async fn last_successful_run(&self) -> EngineResult<Option<DateTime<Utc>>> {
        self.ports.checkpoint.last_successful_run().await
    }

    /// Runs one full batch. Only a completed run moves the checkpoint.
    pub async fn run_batch(&self, shutdown: &watch::Receiver<bool>) -> RunSummary {
        let timer = Timer::new();
        *self.state.lock() = RunState::Running;
        let summary = self.runner.run(shutdown).await;
        *self.state.lock() = summary.state.clone();

        if summary.state == RunState::Completed {
            if let Err(e) = self
                .ports
                .checkpoint
                .record_successful_run(summary.finished_at)
                .await
            {
                error!(run_id = %summary.run_id, "Failed to record checkpoint: {}", e);
            }
        }

        self.metrics.record_run(&summary, timer.elapsed());
        summary
    }

    /// Recomputes one customer outside the batch cadence
    pub async fn recompute_customer(&self, customer_id: CustomerId) -> EngineResult<RecomputeOutcome> {
        let criteria = self.ports.config.get_membership_criteria().await?;

        let outcome = self.processor.recompute(customer_id, &criteria).await?;

        self.metrics.increment_on_demand();
        if let RecomputeOutcome::Updated {
            notifications_sent, ..
        } = outcome
        {
            self.metrics.add_notifications_sent(notifications_sent as u64);
        }

        info!(customer_id, outcome = ?outcome, "On-demand recompute finished");
        Ok(outcome)
    }
}
