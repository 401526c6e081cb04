use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::classifier::classify;
use crate::domain::{
    Classification, CustomerFacts, CustomerId, CustomerUpdate, MembershipCriteria, RevenueWindow,
    UserId,
};
use crate::notification::change_events;
use crate::store::{AggregationReader, Clock, CustomerRepository, NotificationSink, Ports};
use crate::utils::error::{EngineError, EngineResult};

/// Optimistic write attempts per customer: the first try plus one retry
const PERSIST_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecomputeOutcome {
    /// Stored row already up to date; nothing written, nothing sent
    Unchanged,
    Updated {
        status_changed: bool,
        tier_changed: bool,
        notifications_sent: usize,
        notifications_failed: usize,
    },
    /// Lost the optimistic race twice; left for the next cycle
    ConflictSkipped,
}

/// Result of the transactional part of a recompute
enum Committed {
    Unchanged,
    ConflictSkipped,
    Written {
        previous: Classification,
        next: Classification,
    },
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub aggregation_retries: u32,
    pub retry_backoff: Duration,
    pub recipient: UserId,
    /// Bounds the read-classify-write phase; notifications run after it
    pub iteration_timeout: Duration,
}

/// Read-modify-write of a single customer
pub struct CustomerProcessor {
    aggregation: Arc<dyn AggregationReader>,
    customers: Arc<dyn CustomerRepository>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: ProcessorConfig,
}

impl CustomerProcessor {
    pub fn new(ports: &Ports, config: ProcessorConfig) -> Self {
        Self {
            aggregation: ports.aggregation.clone(),
            customers: ports.customers.clone(),
            sink: ports.sink.clone(),
            clock: ports.clock.clone(),
            config,
        }
    }

    /// A timeout drops the commit future mid-flight, which rolls its
    /// transaction back. Once the row is written the change events are
    /// always sent, however long the sink takes.
    pub async fn recompute(
        &self,
        customer_id: CustomerId,
        criteria: &MembershipCriteria,
    ) -> EngineResult<RecomputeOutcome> {
        let committed = tokio::time::timeout(
            self.config.iteration_timeout,
            self.commit(customer_id, criteria),
        )
        .await
        .map_err(|_| EngineError::IterationTimeout(customer_id))??;

        let (previous, next) = match committed {
            Committed::Unchanged => return Ok(RecomputeOutcome::Unchanged),
            Committed::ConflictSkipped => return Ok(RecomputeOutcome::ConflictSkipped),
            Committed::Written { previous, next } => (previous, next),
        };

        let (notifications_sent, notifications_failed) =
            self.notify_changes(customer_id, &previous, &next).await;

        let status_changed = previous.status != next.status;
        let tier_changed = previous.tier != next.tier;
        if status_changed || tier_changed {
            info!(
                customer_id,
                status = ?next.status,
                tier = %next.tier,
                "Customer reclassified"
            );
        }

        Ok(RecomputeOutcome::Updated {
            status_changed,
            tier_changed,
            notifications_sent,
            notifications_failed,
        })
    }

    async fn commit(
        &self,
        customer_id: CustomerId,
        criteria: &MembershipCriteria,
    ) -> EngineResult<Committed> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let record = self
                .customers
                .get(customer_id)
                .await?
                .ok_or(EngineError::CustomerNotFound(customer_id))?;

            let today = self.clock.today();
            let facts = self
                .read_facts(customer_id, RevenueWindow::trailing_year(today))
                .await?;
            let classification = classify(&facts, criteria, today);

            if record.matches(&facts, &classification) {
                debug!(customer_id, "Customer unchanged");
                return Ok(Committed::Unchanged);
            }

            let update = CustomerUpdate {
                id: customer_id,
                expected_version: record.version,
                status: classification.status,
                tier: classification.tier,
                facts,
            };

            match self.customers.update(&update).await {
                Ok(()) => {
                    return Ok(Committed::Written {
                        previous: record.classification(),
                        next: classification,
                    })
                }
                Err(EngineError::PersistConflict { .. }) if attempt < PERSIST_ATTEMPTS => {
                    warn!(customer_id, "Concurrent write detected, retrying once");
                }
                Err(EngineError::PersistConflict { expected_version, .. }) => {
                    warn!(
                        customer_id,
                        expected_version, "Persist conflict persisted after retry, skipping"
                    );
                    return Ok(Committed::ConflictSkipped);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn read_facts(
        &self,
        customer_id: CustomerId,
        window: RevenueWindow,
    ) -> EngineResult<CustomerFacts> {
        let mut attempt: u32 = 0;

        loop {
            match self.aggregation.get_facts(customer_id, window).await {
                Ok(facts) => return Ok(facts),
                Err(e) if e.is_retryable() && attempt < self.config.aggregation_retries => {
                    attempt += 1;
                    warn!(customer_id, attempt, "Aggregation read failed, retrying: {}", e);
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(e @ EngineError::AggregationReadFailure { .. }) => return Err(e),
                Err(e) => {
                    return Err(EngineError::AggregationReadFailure {
                        customer_id,
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    /// Sink failures are counted, never propagated: the write already happened
    async fn notify_changes(
        &self,
        customer_id: CustomerId,
        previous: &Classification,
        next: &Classification,
    ) -> (usize, usize) {
        let events = change_events(
            customer_id,
            previous,
            next,
            self.config.recipient,
            self.clock.now(),
        );

        let mut sent = 0;
        let mut failed = 0;
        for event in &events {
            match self.sink.create(event).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    failed += 1;
                    warn!(
                        customer_id,
                        kind = event.kind.as_str(),
                        "Failed to create notification: {}",
                        e
                    );
                }
            }
        }

        (sent, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CustomerRecord, CustomerStatus, MembershipTier, NotificationEvent, NotificationKind,
    };
    use crate::store::memory::MemoryStore;
    use crate::store::{FixedClock, MockAggregationReader, MockCustomerRepository};
    use chrono::{NaiveDate, TimeDelta};
    use rust_decimal::Decimal;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn config() -> ProcessorConfig {
        ProcessorConfig {
            aggregation_retries: 2,
            retry_backoff: Duration::from_millis(1),
            recipient: 99,
            iteration_timeout: Duration::from_secs(5),
        }
    }

    fn setup() -> (Arc<MemoryStore>, CustomerProcessor) {
        let store = Arc::new(MemoryStore::with_criteria(
            MembershipCriteria::source_defaults(),
        ));
        let ports = Ports::from_store(store.clone(), Arc::new(FixedClock::at_date(today())));
        (store, CustomerProcessor::new(&ports, config()))
    }

    fn seed_visits(store: &MemoryStore, id: CustomerId, last_days_ago: i64, visits: u32) {
        for i in 0..visits {
            let offset = last_days_ago + i64::from(i);
            store.add_reservation(id, today() - TimeDelta::days(offset), true);
        }
    }

    #[tokio::test]
    async fn test_inactive_silver_customer() {
        let (store, processor) = setup();
        store.add_customer(1);
        seed_visits(&store, 1, 45, 15);
        store.add_payment(1, today() - TimeDelta::days(45), Decimal::from(6_000_000));

        let criteria = MembershipCriteria::source_defaults();
        let outcome = processor.recompute(1, &criteria).await.unwrap();

        assert!(matches!(outcome, RecomputeOutcome::Updated { tier_changed: true, .. }));
        let record = store.customer(1).unwrap();
        assert_eq!(record.status, Some(CustomerStatus::Inactive));
        assert_eq!(record.tier, MembershipTier::Silver);
        assert_eq!(record.facts.total_visits, 15);
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let (store, processor) = setup();
        store.add_customer(1);
        seed_visits(&store, 1, 10, 120);
        store.add_payment(1, today(), Decimal::from(25_000_000));
        let criteria = MembershipCriteria::source_defaults();

        processor.recompute(1, &criteria).await.unwrap();
        let after_first = store.customer(1).unwrap();
        let notifications = store.notifications().len();
        let writes = store.write_count();

        let outcome = processor.recompute(1, &criteria).await.unwrap();

        assert_eq!(outcome, RecomputeOutcome::Unchanged);
        assert_eq!(store.customer(1).unwrap(), after_first);
        assert_eq!(store.notifications().len(), notifications);
        assert_eq!(store.write_count(), writes);
        assert_eq!(after_first.tier, MembershipTier::Platinum);
        assert_eq!(after_first.status, Some(CustomerStatus::Active));
    }

    #[tokio::test]
    async fn test_never_visited_customer_stays_unclassified() {
        let (store, processor) = setup();
        store.add_customer(4);
        store.add_payment(4, today(), Decimal::from(100_000));

        let outcome = processor
            .recompute(4, &MembershipCriteria::source_defaults())
            .await
            .unwrap();

        // Revenue changed the cached facts, classification did not change
        assert!(matches!(
            outcome,
            RecomputeOutcome::Updated {
                status_changed: false,
                tier_changed: false,
                ..
            }
        ));
        let record = store.customer(4).unwrap();
        assert_eq!(record.status, None);
        assert_eq!(record.tier, MembershipTier::Bronze);
        assert!(store.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_status_change_notifies() {
        let (store, processor) = setup();
        store.add_customer(2);
        seed_visits(&store, 2, 5, 1);
        let criteria = MembershipCriteria::source_defaults();
        processor.recompute(2, &criteria).await.unwrap();
        assert!(store.notifications().is_empty());

        // Let the visit age past the active window
        let clock = Arc::new(FixedClock::at_date(today() + TimeDelta::days(40)));
        let ports = Ports::from_store(store.clone(), clock);
        let later = CustomerProcessor::new(&ports, config());
        later.recompute(2, &criteria).await.unwrap();

        let events = store.notifications();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, NotificationKind::StatusChanged);
        assert_eq!(events[0].target_user_id, 99);
        assert_eq!(events[0].related_entity_id, 2);
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_write() {
        let (store, processor) = setup();
        store.add_customer(3);
        seed_visits(&store, 3, 1, 40);
        store.add_payment(3, today(), Decimal::from(12_000_000));
        store.set_sink_failing(true);

        let outcome = processor
            .recompute(3, &MembershipCriteria::source_defaults())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RecomputeOutcome::Updated {
                status_changed: true,
                tier_changed: true,
                notifications_sent: 0,
                notifications_failed: 1,
            }
        );
        assert_eq!(store.customer(3).unwrap().tier, MembershipTier::Gold);
    }

    #[tokio::test]
    async fn test_slow_sink_runs_outside_iteration_timeout() {
        let store = Arc::new(MemoryStore::new());
        store.add_customer(3);
        seed_visits(&store, 3, 1, 40);
        store.add_payment(3, today(), Decimal::from(12_000_000));
        let mut ports = Ports::from_store(store.clone(), Arc::new(FixedClock::at_date(today())));
        ports.sink = Arc::new(SlowSink {
            inner: store.clone(),
            delay: Duration::from_millis(200),
        });
        let processor = CustomerProcessor::new(
            &ports,
            ProcessorConfig {
                iteration_timeout: Duration::from_millis(50),
                ..config()
            },
        );

        let outcome = processor
            .recompute(3, &MembershipCriteria::source_defaults())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RecomputeOutcome::Updated {
                status_changed: true,
                tier_changed: true,
                notifications_sent: 1,
                notifications_failed: 0,
            }
        );
        assert_eq!(store.customer(3).unwrap().version, 1);
        assert_eq!(store.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_aggregation_retried_then_succeeds() {
        let store = Arc::new(MemoryStore::new());
        store.add_customer(5);
        let mut reader = MockAggregationReader::new();
        let mut calls = 0;
        reader.expect_get_facts().times(2).returning(move |id, _| {
            calls += 1;
            if calls == 1 {
                Err(EngineError::AggregationReadFailure {
                    customer_id: id,
                    reason: "timeout".into(),
                })
            } else {
                Ok(CustomerFacts::never_visited())
            }
        });

        let mut ports = Ports::from_store(store.clone(), Arc::new(FixedClock::at_date(today())));
        ports.aggregation = Arc::new(reader);
        let processor = CustomerProcessor::new(&ports, config());

        let outcome = processor
            .recompute(5, &MembershipCriteria::source_defaults())
            .await
            .unwrap();
        assert_eq!(outcome, RecomputeOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_aggregation_gives_up_after_retries() {
        let (store, processor) = setup();
        store.add_customer(6);
        store.fail_aggregation_for(6);

        let err = processor
            .recompute(6, &MembershipCriteria::source_defaults())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::AggregationReadFailure { customer_id: 6, .. }));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_conflict_retried_once() {
        let store = Arc::new(MemoryStore::new());
        let mut customers = MockCustomerRepository::new();
        customers.expect_get().times(2).returning(|id| {
            Ok(Some(CustomerRecord {
                id,
                status: None,
                tier: MembershipTier::Bronze,
                facts: CustomerFacts::never_visited(),
                version: 1,
            }))
        });
        let mut first = true;
        customers.expect_update().times(2).returning(move |update| {
            if std::mem::take(&mut first) {
                Err(EngineError::PersistConflict {
                    customer_id: update.id,
                    expected_version: update.expected_version,
                })
            } else {
                Ok(())
            }
        });

        let mut ports = Ports::from_store(store.clone(), Arc::new(FixedClock::at_date(today())));
        store.add_customer(7);
        store.add_reservation(7, today(), true);
        ports.customers = Arc::new(customers);
        let processor = CustomerProcessor::new(&ports, config());

        let outcome = processor
            .recompute(7, &MembershipCriteria::source_defaults())
            .await
            .unwrap();
        assert!(matches!(outcome, RecomputeOutcome::Updated { .. }));
    }

    #[tokio::test]
    async fn test_second_conflict_skips() {
        let store = Arc::new(MemoryStore::new());
        store.add_reservation(8, today(), true);
        let mut customers = MockCustomerRepository::new();
        customers.expect_get().times(2).returning(|id| {
            Ok(Some(CustomerRecord {
                id,
                status: None,
                tier: MembershipTier::Bronze,
                facts: CustomerFacts::never_visited(),
                version: 3,
            }))
        });
        customers.expect_update().times(2).returning(|update| {
            Err(EngineError::PersistConflict {
                customer_id: update.id,
                expected_version: update.expected_version,
            })
        });

        let mut ports = Ports::from_store(store.clone(), Arc::new(FixedClock::at_date(today())));
        ports.customers = Arc::new(customers);
        let processor = CustomerProcessor::new(&ports, config());

        let outcome = processor
            .recompute(8, &MembershipCriteria::source_defaults())
            .await
            .unwrap();
        assert_eq!(outcome, RecomputeOutcome::ConflictSkipped);
        assert!(store.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_customer() {
        let (_store, processor) = setup();
        let err = processor
            .recompute(404, &MembershipCriteria::source_defaults())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CustomerNotFound(404)));
    }

    /// Accepts each event only after a delay
    struct SlowSink {
        inner: Arc<MemoryStore>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl NotificationSink for SlowSink {
        async fn create(&self, event: &NotificationEvent) -> EngineResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.create(event).await
        }
    }
}
