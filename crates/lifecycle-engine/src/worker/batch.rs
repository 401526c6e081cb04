use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::processor::{CustomerProcessor, RecomputeOutcome};
use super::shutdown_requested;
use crate::domain::{CustomerId, MembershipCriteria};
use crate::notification::{AlertScanSummary, PackageAlertScanner};
use crate::store::Ports;
use crate::utils::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Membership criteria could not be loaded before the run started
    ConfigUnavailable(String),
    CustomerListUnavailable(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// No run has started yet, see `LifecycleEngine::run_state`
    Idle,
    Running,
    Completed,
    Aborted(AbortReason),
}

impl RunState {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunState::Aborted(AbortReason::ConfigUnavailable(_))
                | RunState::Aborted(AbortReason::CustomerListUnavailable(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedCustomer {
    pub customer_id: CustomerId,
    pub reason: String,
}

/// Per-run report
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: RunState,
    pub customers_total: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub conflict_skipped: usize,
    /// Abandoned by the per-customer timeout; also listed in `failed`
    pub timed_out: usize,
    pub failed: Vec<FailedCustomer>,
    pub notifications_sent: usize,
    pub notification_failures: usize,
    pub package_alerts_sent: usize,
    pub package_alerts_deduplicated: usize,
    pub package_alert_failures: usize,
}

impl RunSummary {
    fn start(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: started_at,
            state: RunState::Running,
            customers_total: 0,
            updated: 0,
            unchanged: 0,
            conflict_skipped: 0,
            timed_out: 0,
            failed: Vec::new(),
            notifications_sent: 0,
            notification_failures: 0,
            package_alerts_sent: 0,
            package_alerts_deduplicated: 0,
            package_alert_failures: 0,
        }
    }

    /// Customers whose processing finished, successfully or not
    pub fn processed(&self) -> usize {
        self.updated + self.unchanged + self.conflict_skipped + self.failed.len()
    }

    pub fn failed_ids(&self) -> Vec<CustomerId> {
        self.failed.iter().map(|f| f.customer_id).collect()
    }

    fn record_outcome(&mut self, outcome: RecomputeOutcome) {
        match outcome {
            RecomputeOutcome::Unchanged => self.unchanged += 1,
            RecomputeOutcome::ConflictSkipped => self.conflict_skipped += 1,
            RecomputeOutcome::Updated {
                notifications_sent,
                notifications_failed,
                ..
            } => {
                self.updated += 1;
                self.notifications_sent += notifications_sent;
                self.notification_failures += notifications_failed;
            }
        }
    }

    fn record_alerts(&mut self, alerts: AlertScanSummary) {
        self.package_alerts_sent = alerts.sent;
        self.package_alerts_deduplicated = alerts.deduplicated;
        self.package_alert_failures = alerts.failed;
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub worker_concurrency: usize,
}

/// One pass over every customer followed by the package alert scan
pub struct BatchRunner {
    ports: Ports,
    processor: Arc<CustomerProcessor>,
    scanner: PackageAlertScanner,
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(
        ports: Ports,
        processor: Arc<CustomerProcessor>,
        scanner: PackageAlertScanner,
        config: BatchConfig,
    ) -> Self {
        Self {
            ports,
            processor,
            scanner,
            config,
        }
    }

    pub async fn run(&self, shutdown: &watch::Receiver<bool>) -> RunSummary {
        let mut summary = RunSummary::start(self.ports.clock.now());
        let run_id = summary.run_id;
        info!(%run_id, "🚀 Starting membership batch run");

        let criteria = match self.ports.config.get_membership_criteria().await {
            Ok(criteria) => Arc::new(criteria),
            Err(e) => {
                error!(%run_id, "❌ Fatal: membership criteria unavailable: {}", e);
                return self.finish(summary, RunState::Aborted(AbortReason::ConfigUnavailable(e.to_string())));
            }
        };

        let customer_ids = match self.ports.customers.list_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(%run_id, "❌ Fatal: customer list unavailable: {}", e);
                return self.finish(
                    summary,
                    RunState::Aborted(AbortReason::CustomerListUnavailable(e.to_string())),
                );
            }
        };
        summary.customers_total = customer_ids.len();
        info!(%run_id, customers = customer_ids.len(), "📦 Loaded customers");

        let cancelled = self
            .process_customers(&customer_ids, criteria, shutdown, &mut summary)
            .await;

        if cancelled {
            warn!(%run_id, processed = summary.processed(), "Batch run cancelled between customers");
            return self.finish(summary, RunState::Aborted(AbortReason::Cancelled));
        }

        let alerts = self
            .scanner
            .scan(self.ports.clock.today(), self.ports.clock.now())
            .await;
        summary.record_alerts(alerts);

        self.finish(summary, RunState::Completed)
    }

    /// Fans out over the customers; returns `true` if cancelled before all were started
    async fn process_customers(
        &self,
        customer_ids: &[CustomerId],
        criteria: Arc<MembershipCriteria>,
        shutdown: &watch::Receiver<bool>,
        summary: &mut RunSummary,
    ) -> bool {
        let semaphore = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut task_customers = HashMap::new();
        let mut shutdown = shutdown.clone();
        let mut cancelled = false;

        for &customer_id in customer_ids {
            if shutdown_requested(&shutdown) {
                cancelled = true;
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit,
                _ = super::wait_for_shutdown(&mut shutdown) => {
                    cancelled = true;
                    break;
                }
            };
            let Ok(permit) = permit else {
                break;
            };
            // The signal may have flipped while waiting for a free worker
            if shutdown_requested(&shutdown) {
                cancelled = true;
                break;
            }

            let processor = self.processor.clone();
            let criteria = criteria.clone();

            let handle = tasks.spawn(async move {
                let _permit = permit;
                processor.recompute(customer_id, &criteria).await
            });
            task_customers.insert(handle.id(), customer_id);
        }

        // In-flight customers always run to completion
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((task_id, result)) => {
                    let customer_id = task_customers.remove(&task_id).unwrap_or_default();
                    match result {
                        Ok(outcome) => summary.record_outcome(outcome),
                        Err(e) => {
                            if matches!(e, EngineError::IterationTimeout(_)) {
                                warn!(customer_id, "⏱️  Recompute timed out, will retry next cycle");
                                summary.timed_out += 1;
                            } else {
                                error!(customer_id, error = %e, "❌ Failed to recompute customer");
                            }
                            summary.failed.push(FailedCustomer {
                                customer_id,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                Err(join_error) => {
                    let customer_id = task_customers
                        .remove(&join_error.id())
                        .unwrap_or_default();
                    error!(customer_id, "❌ Recompute task panicked: {}", join_error);
                    summary.failed.push(FailedCustomer {
                        customer_id,
                        reason: format!("task failed: {}", join_error),
                    });
                }
            }
        }

        cancelled
    }

    fn finish(&self, mut summary: RunSummary, state: RunState) -> RunSummary {
        summary.finished_at = self.ports.clock.now();
        summary.state = state;

        match &summary.state {
            RunState::Completed => info!(
                run_id = %summary.run_id,
                total = summary.customers_total,
                updated = summary.updated,
                unchanged = summary.unchanged,
                conflict_skipped = summary.conflict_skipped,
                failed = summary.failed.len(),
                failed_ids = ?summary.failed_ids(),
                notifications = summary.notifications_sent,
                package_alerts = summary.package_alerts_sent,
                "🎉 Batch run completed"
            ),
            state => warn!(
                run_id = %summary.run_id,
                state = ?state,
                processed = summary.processed(),
                failed_ids = ?summary.failed_ids(),
                "Batch run aborted"
            ),
        }

        summary
    }
}
