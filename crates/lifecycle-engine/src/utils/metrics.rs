use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::worker::{RunState, RunSummary};

/// Process-lifetime counters across batch runs and on-demand recomputes
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    runs_completed: AtomicU64,
    runs_aborted: AtomicU64,
    customers_processed: AtomicU64,
    customers_updated: AtomicU64,
    customers_failed: AtomicU64,
    on_demand_recomputes: AtomicU64,
    notifications_sent: AtomicU64,
    total_run_time_ms: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                runs_completed: AtomicU64::new(0),
                runs_aborted: AtomicU64::new(0),
                customers_processed: AtomicU64::new(0),
                customers_updated: AtomicU64::new(0),
                customers_failed: AtomicU64::new(0),
                on_demand_recomputes: AtomicU64::new(0),
                notifications_sent: AtomicU64::new(0),
                total_run_time_ms: AtomicU64::new(0),
            }),
        }
    }

    pub fn record_run(&self, summary: &RunSummary, duration: Duration) {
        let counter = match summary.state {
            RunState::Completed => &self.inner.runs_completed,
            _ => &self.inner.runs_aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.inner
            .customers_processed
            .fetch_add(summary.processed() as u64, Ordering::Relaxed);
        self.inner
            .customers_updated
            .fetch_add(summary.updated as u64, Ordering::Relaxed);
        self.inner
            .customers_failed
            .fetch_add(summary.failed.len() as u64, Ordering::Relaxed);
        self.inner.notifications_sent.fetch_add(
            (summary.notifications_sent + summary.package_alerts_sent) as u64,
            Ordering::Relaxed,
        );
        self.inner
            .total_run_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn increment_on_demand(&self) {
        self.inner.on_demand_recomputes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_notifications_sent(&self, count: u64) {
        self.inner.notifications_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn get_runs_completed(&self) -> u64 {
        self.inner.runs_completed.load(Ordering::Relaxed)
    }

    pub fn get_runs_aborted(&self) -> u64 {
        self.inner.runs_aborted.load(Ordering::Relaxed)
    }

    pub fn get_customers_processed(&self) -> u64 {
        self.inner.customers_processed.load(Ordering::Relaxed)
    }

    pub fn get_customers_failed(&self) -> u64 {
        self.inner.customers_failed.load(Ordering::Relaxed)
    }

    pub fn get_on_demand_recomputes(&self) -> u64 {
        self.inner.on_demand_recomputes.load(Ordering::Relaxed)
    }

    pub fn get_notifications_sent(&self) -> u64 {
        self.inner.notifications_sent.load(Ordering::Relaxed)
    }

    pub fn get_average_run_time_ms(&self) -> f64 {
        let runs = self.get_runs_completed() + self.get_runs_aborted();
        if runs == 0 {
            return 0.0;
        }

        self.inner.total_run_time_ms.load(Ordering::Relaxed) as f64 / runs as f64
    }

    pub fn log_summary(&self) {
        info!(
            runs_completed = self.get_runs_completed(),
            runs_aborted = self.get_runs_aborted(),
            customers_processed = self.get_customers_processed(),
            customers_updated = self.inner.customers_updated.load(Ordering::Relaxed),
            customers_failed = self.get_customers_failed(),
            on_demand_recomputes = self.get_on_demand_recomputes(),
            notifications_sent = self.get_notifications_sent(),
            average_run_ms = format!("{:.2}", self.get_average_run_time_ms()),
            "📊 Engine metrics"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall-clock timer for a run or a single recompute
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
