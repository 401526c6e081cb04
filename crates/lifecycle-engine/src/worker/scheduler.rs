use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::engine::LifecycleEngine;
use super::queue::{RecomputeQueue, RecomputeTask, TaskPriority};
use super::wait_for_shutdown;
use crate::config::SchedulerConfig;
use crate::database::PaymentNotification;
use crate::domain::CustomerId;
use crate::utils::error::EngineError;

/// On-demand recomputes that failed transiently are re-queued this many times
const MAX_ON_DEMAND_RETRIES: u32 = 3;

/// Time until the next batch is due, given the last completed run
pub fn next_run_delay(
    last_success: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval: Duration,
) -> Duration {
    let Some(last) = last_success else {
        return Duration::ZERO;
    };

    let Ok(interval) = chrono::Duration::from_std(interval) else {
        return Duration::ZERO;
    };

    (last + interval - now).to_std().unwrap_or(Duration::ZERO)
}

/// Cloneable front door to a running scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    queue: Arc<RecomputeQueue>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SchedulerHandle {
    /// Returns `false` if the on-demand queue dropped the request
    pub async fn request_recompute(&self, customer_id: CustomerId, priority: TaskPriority) -> bool {
        let accepted = self
            .queue
            .enqueue(RecomputeTask::new(customer_id, priority))
            .await;

        if !accepted {
            warn!(customer_id, "On-demand queue full, recompute request dropped");
        }
        accepted
    }

    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.send_replace(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Periodic batch driver plus the on-demand recompute lane
pub struct Scheduler {
    engine: Arc<LifecycleEngine>,
    queue: Arc<RecomputeQueue>,
    interval: Duration,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Scheduler {
    pub fn new(engine: Arc<LifecycleEngine>, config: &SchedulerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            engine,
            queue: Arc::new(RecomputeQueue::new(config.on_demand_queue_capacity)),
            interval: config.interval().max(Duration::from_secs(1)),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            queue: self.queue.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Runs until the handle's `shutdown` is called
    pub async fn run(self, payments: Option<mpsc::UnboundedReceiver<PaymentNotification>>) {
        let mut shutdown = self.shutdown.subscribe();
        info!("🎯 Scheduler started");

        let drain_handle = tokio::spawn(drain_on_demand(
            self.engine.clone(),
            self.queue.clone(),
            self.shutdown.subscribe(),
        ));

        let forward_handle = payments.map(|payments| {
            tokio::spawn(forward_payments(
                payments,
                self.handle(),
                self.shutdown.subscribe(),
            ))
        });

        let last_success = match self.engine.last_successful_run().await {
            Ok(last) => last,
            Err(e) => {
                warn!("Could not read last run checkpoint, running now: {}", e);
                None
            }
        };
        let delay = next_run_delay(last_success, self.engine.now(), self.interval);
        info!(
            last_success = ?last_success,
            delay_secs = delay.as_secs(),
            interval_secs = self.interval.as_secs(),
            "⏰ First batch run scheduled"
        );

        let mut ticker = interval_at(Instant::now() + delay, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.engine.run_batch(&shutdown).await;
                    if summary.state.is_fatal() {
                        error!(
                            run_id = %summary.run_id,
                            state = ?summary.state,
                            "❌ Batch run aborted, retrying next interval"
                        );
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        info!("Shutting down scheduler...");
        if let Err(e) = drain_handle.await {
            error!("On-demand worker ended abnormally: {}", e);
        }
        if let Some(handle) = forward_handle {
            if let Err(e) = handle.await {
                error!("Payment forwarder ended abnormally: {}", e);
            }
        }

        let dropped = self.queue.size().await;
        if dropped > 0 {
            info!(dropped, "Dropped queued on-demand recomputes");
        }
        info!("Scheduler stopped");
    }
}

async fn drain_on_demand(
    engine: Arc<LifecycleEngine>,
    queue: Arc<RecomputeQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let task = tokio::select! {
            task = queue.next() => task,
            _ = wait_for_shutdown(&mut shutdown) => break,
        };

        debug!(customer_id = task.customer_id, priority = ?task.priority, "Processing on-demand recompute");

        match engine.recompute_customer(task.customer_id).await {
            Ok(_) => {}
            Err(e) if should_requeue(&e) && task.retry_count < MAX_ON_DEMAND_RETRIES => {
                warn!(
                    customer_id = task.customer_id,
                    retry = task.retry_count + 1,
                    "On-demand recompute failed, re-queueing: {}",
                    e
                );
                queue
                    .enqueue(RecomputeTask {
                        retry_count: task.retry_count + 1,
                        ..task
                    })
                    .await;
            }
            Err(e) => {
                error!(customer_id = task.customer_id, "❌ On-demand recompute failed: {}", e);
            }
        }
    }
}

fn should_requeue(error: &EngineError) -> bool {
    error.is_retryable() || matches!(error, EngineError::IterationTimeout(_))
}

async fn forward_payments(
    mut payments: mpsc::UnboundedReceiver<PaymentNotification>,
    handle: SchedulerHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("👂 Listening for recorded payments...");
    loop {
        tokio::select! {
            payment = payments.recv() => {
                let Some(payment) = payment else {
                    warn!("Payment listener closed, on-demand recomputes from payments stopped");
                    break;
                };
                info!(
                    customer_id = payment.customer_id,
                    operation = %payment.operation,
                    "📬 Payment recorded"
                );
                handle
                    .request_recompute(payment.customer_id, TaskPriority::High)
                    .await;
            }
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationConfig;
    use crate::domain::MembershipCriteria;
    use crate::store::memory::MemoryStore;
    use crate::store::{CheckpointStore, FixedClock, Ports};
    use crate::utils::metrics::Metrics;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal::Decimal;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_next_run_immediately_without_checkpoint() {
        assert_eq!(next_run_delay(None, at(12), DAY), Duration::ZERO);
    }

    #[test]
    fn test_next_run_resumes_cadence_after_restart() {
        // Last run at 02:00, restarted at 12:00: the next run is due at 02:00 tomorrow
        assert_eq!(
            next_run_delay(Some(at(2)), at(12), DAY),
            Duration::from_secs(14 * 60 * 60)
        );
        // Exactly one interval later the run is due now
        let yesterday = at(12) - chrono::Duration::days(1);
        assert_eq!(next_run_delay(Some(yesterday), at(12), DAY), Duration::ZERO);
    }

    #[test]
    fn test_overdue_run_starts_immediately() {
        let last = at(2) - chrono::Duration::days(3);
        assert_eq!(next_run_delay(Some(last), at(12), DAY), Duration::ZERO);
    }

    fn setup() -> (Arc<MemoryStore>, Scheduler) {
        let store = Arc::new(MemoryStore::with_criteria(
            MembershipCriteria::source_defaults(),
        ));
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        store.add_customer(1);
        store.add_reservation(1, today, true);
        store.add_payment(1, today, Decimal::from(100));

        let config = SchedulerConfig::default();
        let engine = Arc::new(LifecycleEngine::new(
            Ports::from_store(store.clone(), Arc::new(FixedClock::at_date(today))),
            &config,
            &NotificationConfig::default(),
            Metrics::new(),
        ));
        (store, Scheduler::new(engine, &config))
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_first_run_is_immediate_without_checkpoint() {
        let (store, scheduler) = setup();
        let handle = scheduler.handle();
        let running = tokio::spawn(scheduler.run(None));

        wait_until(|| store.checkpoint().is_some()).await;
        assert_eq!(store.customer(1).unwrap().version, 1);

        handle.shutdown();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn test_payment_triggers_on_demand_recompute() {
        let (store, scheduler) = setup();
        // Recent checkpoint keeps the periodic run a day away
        store.record_successful_run(at(0)).await.unwrap();
        let handle = scheduler.handle();
        let (tx, rx) = mpsc::unbounded_channel();
        let running = tokio::spawn(scheduler.run(Some(rx)));

        tx.send(PaymentNotification {
            customer_id: 1,
            operation: "INSERT".to_string(),
        })
        .unwrap();

        wait_until(|| store.customer(1).unwrap().version == 1).await;
        assert_eq!(store.checkpoint(), Some(at(0)));

        handle.shutdown();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_scheduler() {
        let (store, scheduler) = setup();
        store.record_successful_run(at(0)).await.unwrap();
        let handle = scheduler.handle();
        let running = tokio::spawn(scheduler.run(None));

        handle.shutdown();

        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.write_count(), 0);
    }
}
