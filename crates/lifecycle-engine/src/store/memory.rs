//! In-memory implementation of every port, used for tests and local runs.
//!
//! Reservations and payments are indexed by customer id so fact lookups
//! never scan other customers' rows.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

use super::{
    AggregationReader, AlertLedger, CheckpointStore, ConfigurationStore, CustomerRepository,
    NotificationSink, PackageRepository,
};
use crate::domain::{
    AlertKey, CustomerFacts, CustomerId, CustomerRecord, CustomerUpdate, MembershipCriteria,
    MembershipTier, NotificationEvent, PackagePurchase, RevenueWindow,
};
use crate::utils::error::{EngineError, EngineResult};

#[derive(Debug, Clone)]
struct Reservation {
    date: NaiveDate,
    completed: bool,
}

#[derive(Debug, Clone)]
struct Payment {
    date: NaiveDate,
    amount: Decimal,
}

#[derive(Debug, Clone)]
struct StoredPackage {
    purchase: PackagePurchase,
    active: bool,
}

#[derive(Debug, Default)]
struct State {
    criteria: Option<MembershipCriteria>,
    customers: HashMap<CustomerId, CustomerRecord>,
    reservations: HashMap<CustomerId, Vec<Reservation>>,
    payments: HashMap<CustomerId, Vec<Payment>>,
    packages: Vec<StoredPackage>,
    notifications: Vec<NotificationEvent>,
    claimed_alerts: HashSet<AlertKey>,
    last_successful_run: Option<DateTime<Utc>>,
    failing_aggregations: HashSet<CustomerId>,
    failing_sink: bool,
    writes: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_criteria(criteria: MembershipCriteria) -> Self {
        let store = Self::new();
        store.set_criteria(Some(criteria));
        store
    }

    // ==================== Seeding ====================

    pub fn set_criteria(&self, criteria: Option<MembershipCriteria>) {
        self.state.lock().criteria = criteria;
    }

    /// Adds a customer that has never been classified
    pub fn add_customer(&self, id: CustomerId) {
        self.state.lock().customers.insert(
            id,
            CustomerRecord {
                id,
                status: None,
                tier: MembershipTier::LOWEST,
                facts: CustomerFacts::never_visited(),
                version: 0,
            },
        );
    }

    pub fn add_reservation(&self, customer_id: CustomerId, date: NaiveDate, completed: bool) {
        self.state
            .lock()
            .reservations
            .entry(customer_id)
            .or_default()
            .push(Reservation { date, completed });
    }

    pub fn add_payment(&self, customer_id: CustomerId, date: NaiveDate, amount: Decimal) {
        self.state
            .lock()
            .payments
            .entry(customer_id)
            .or_default()
            .push(Payment { date, amount });
    }

    pub fn add_package(&self, purchase: PackagePurchase, active: bool) {
        self.state
            .lock()
            .packages
            .push(StoredPackage { purchase, active });
    }

    // ==================== Failure injection ====================

    pub fn fail_aggregation_for(&self, customer_id: CustomerId) {
        self.state.lock().failing_aggregations.insert(customer_id);
    }

    pub fn heal_aggregation_for(&self, customer_id: CustomerId) {
        self.state.lock().failing_aggregations.remove(&customer_id);
    }

    pub fn set_sink_failing(&self, failing: bool) {
        self.state.lock().failing_sink = failing;
    }

    /// Simulates a concurrent writer touching the row
    pub fn bump_version(&self, customer_id: CustomerId) {
        if let Some(record) = self.state.lock().customers.get_mut(&customer_id) {
            record.version += 1;
        }
    }

    // ==================== Inspection ====================

    pub fn customer(&self, id: CustomerId) -> Option<CustomerRecord> {
        self.state.lock().customers.get(&id).cloned()
    }

    pub fn notifications(&self) -> Vec<NotificationEvent> {
        self.state.lock().notifications.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn checkpoint(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_successful_run
    }
}

#[async_trait]
impl ConfigurationStore for MemoryStore {
    async fn get_membership_criteria(&self) -> EngineResult<MembershipCriteria> {
        self.state.lock().criteria.clone().ok_or_else(|| {
            EngineError::ConfigUnavailable("membership criteria not configured".to_string())
        })
    }
}

#[async_trait]
impl AggregationReader for MemoryStore {
    async fn get_facts(
        &self,
        customer_id: CustomerId,
        window: RevenueWindow,
    ) -> EngineResult<CustomerFacts> {
        let state = self.state.lock();

        if state.failing_aggregations.contains(&customer_id) {
            return Err(EngineError::AggregationReadFailure {
                customer_id,
                reason: "injected failure".to_string(),
            });
        }

        let completed = state
            .reservations
            .get(&customer_id)
            .map(|list| list.iter().filter(|r| r.completed).collect::<Vec<_>>())
            .unwrap_or_default();

        let payments = state
            .payments
            .get(&customer_id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        Ok(CustomerFacts {
            last_visit_date: completed.iter().map(|r| r.date).max(),
            total_visits: completed.len() as u32,
            annual_revenue: payments
                .iter()
                .filter(|p| window.contains(p.date))
                .map(|p| p.amount)
                .sum(),
            total_revenue: payments.iter().map(|p| p.amount).sum(),
        })
    }
}

#[async_trait]
impl CustomerRepository for MemoryStore {
    async fn list_ids(&self) -> EngineResult<Vec<CustomerId>> {
        let mut ids: Vec<_> = self.state.lock().customers.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn get(&self, id: CustomerId) -> EngineResult<Option<CustomerRecord>> {
        Ok(self.state.lock().customers.get(&id).cloned())
    }

    async fn update(&self, update: &CustomerUpdate) -> EngineResult<()> {
        let mut state = self.state.lock();
        let record = state
            .customers
            .get_mut(&update.id)
            .ok_or(EngineError::CustomerNotFound(update.id))?;

        if record.version != update.expected_version {
            return Err(EngineError::PersistConflict {
                customer_id: update.id,
                expected_version: update.expected_version,
            });
        }

        record.status = update.status;
        record.tier = update.tier;
        record.facts = update.facts.clone();
        record.version += 1;
        state.writes += 1;

        Ok(())
    }
}

#[async_trait]
impl PackageRepository for MemoryStore {
    async fn list_active_expiring_on(&self, date: NaiveDate) -> EngineResult<Vec<PackagePurchase>> {
        Ok(self
            .state
            .lock()
            .packages
            .iter()
            .filter(|p| p.active && p.purchase.remaining_sessions > 0)
            .filter(|p| p.purchase.expiry_date == date)
            .map(|p| p.purchase.clone())
            .collect())
    }

    async fn list_active_low_sessions(&self, threshold: u32) -> EngineResult<Vec<PackagePurchase>> {
        Ok(self
            .state
            .lock()
            .packages
            .iter()
            .filter(|p| p.active)
            .filter(|p| (1..=threshold).contains(&p.purchase.remaining_sessions))
            .map(|p| p.purchase.clone())
            .collect())
    }
}

#[async_trait]
impl NotificationSink for MemoryStore {
    async fn create(&self, event: &NotificationEvent) -> EngineResult<()> {
        let mut state = self.state.lock();
        if state.failing_sink {
            return Err(EngineError::NotificationSinkFailure(
                "sink unavailable".to_string(),
            ));
        }
        state.notifications.push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertLedger for MemoryStore {
    async fn claim(&self, key: &AlertKey) -> EngineResult<bool> {
        Ok(self.state.lock().claimed_alerts.insert(*key))
    }

    async fn release(&self, key: &AlertKey) -> EngineResult<()> {
        self.state.lock().claimed_alerts.remove(key);
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn last_successful_run(&self) -> EngineResult<Option<DateTime<Utc>>> {
        Ok(self.state.lock().last_successful_run)
    }

    async fn record_successful_run(&self, finished_at: DateTime<Utc>) -> EngineResult<()> {
        self.state.lock().last_successful_run = Some(finished_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_facts_only_count_completed_visits() {
        let store = MemoryStore::new();
        store.add_customer(1);
        store.add_reservation(1, date(2026, 9, 1), true);
        store.add_reservation(1, date(2026, 10, 1), false);
        store.add_reservation(1, date(2026, 8, 1), true);

        let facts = store
            .get_facts(1, RevenueWindow::trailing_year(date(2026, 10, 19)))
            .await
            .unwrap();

        assert_eq!(facts.total_visits, 2);
        assert_eq!(facts.last_visit_date, Some(date(2026, 9, 1)));
    }

    #[tokio::test]
    async fn test_annual_revenue_uses_window() {
        let store = MemoryStore::new();
        store.add_customer(1);
        store.add_payment(1, date(2024, 1, 1), Decimal::from(1_000));
        store.add_payment(1, date(2025, 10, 19), Decimal::from(200));
        store.add_payment(1, date(2026, 10, 19), Decimal::from(30));

        let facts = store
            .get_facts(1, RevenueWindow::trailing_year(date(2026, 10, 19)))
            .await
            .unwrap();

        assert_eq!(facts.annual_revenue, Decimal::from(230));
        assert_eq!(facts.total_revenue, Decimal::from(1_230));
    }

    #[tokio::test]
    async fn test_update_rejects_stale_version() {
        let store = MemoryStore::new();
        store.add_customer(9);
        store.bump_version(9);

        let update = CustomerUpdate {
            id: 9,
            expected_version: 0,
            status: None,
            tier: MembershipTier::Gold,
            facts: CustomerFacts::never_visited(),
        };
        let err = store.update(&update).await.unwrap_err();
        assert!(matches!(err, EngineError::PersistConflict { customer_id: 9, .. }));

        let fresh = CustomerUpdate {
            expected_version: 1,
            ..update
        };
        store.update(&fresh).await.unwrap();
        assert_eq!(store.customer(9).unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_ledger_claims_once() {
        let store = MemoryStore::new();
        let key = AlertKey {
            package_id: 3,
            threshold: crate::domain::AlertThreshold::LowSessions,
            date: date(2026, 10, 19),
        };
        assert!(store.claim(&key).await.unwrap());
        assert!(!store.claim(&key).await.unwrap());
        store.release(&key).await.unwrap();
        assert!(store.claim(&key).await.unwrap());
    }
}
