//! Ports the engine consumes and produces through.
//!
//! Postgres implementations live in `crate::database`, in-memory ones in
//! [`memory`].

pub mod clock;
pub mod memory;

pub use clock::{Clock, FixedClock, SystemClock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use crate::domain::{
    AlertKey, CustomerFacts, CustomerId, CustomerRecord, CustomerUpdate, MembershipCriteria,
    NotificationEvent, PackagePurchase, RevenueWindow,
};
use crate::utils::error::EngineResult;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    async fn get_membership_criteria(&self) -> EngineResult<MembershipCriteria>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait AggregationReader: Send + Sync {
    async fn get_facts(
        &self,
        customer_id: CustomerId,
        window: RevenueWindow,
    ) -> EngineResult<CustomerFacts>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn list_ids(&self) -> EngineResult<Vec<CustomerId>>;

    async fn get(&self, id: CustomerId) -> EngineResult<Option<CustomerRecord>>;

    /// Applies the update only if the stored version still equals
    /// `expected_version`; otherwise returns `EngineError::PersistConflict`.
    async fn update(&self, update: &CustomerUpdate) -> EngineResult<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PackageRepository: Send + Sync {
    /// Active packages with sessions left that expire exactly on `date`
    async fn list_active_expiring_on(&self, date: NaiveDate) -> EngineResult<Vec<PackagePurchase>>;

    /// Active packages with `1..=threshold` sessions left
    async fn list_active_low_sessions(&self, threshold: u32) -> EngineResult<Vec<PackagePurchase>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn create(&self, event: &NotificationEvent) -> EngineResult<()>;
}

/// Remembers which package alerts were already raised
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AlertLedger: Send + Sync {
    /// Returns `true` if the key was not claimed before
    async fn claim(&self, key: &AlertKey) -> EngineResult<bool>;

    async fn release(&self, key: &AlertKey) -> EngineResult<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn last_successful_run(&self) -> EngineResult<Option<DateTime<Utc>>>;

    async fn record_successful_run(&self, finished_at: DateTime<Utc>) -> EngineResult<()>;
}

/// Every collaborator the engine talks to, as shared trait objects
#[derive(Clone)]
pub struct Ports {
    pub config: Arc<dyn ConfigurationStore>,
    pub aggregation: Arc<dyn AggregationReader>,
    pub customers: Arc<dyn CustomerRepository>,
    pub packages: Arc<dyn PackageRepository>,
    pub sink: Arc<dyn NotificationSink>,
    pub ledger: Arc<dyn AlertLedger>,
    pub checkpoint: Arc<dyn CheckpointStore>,
    pub clock: Arc<dyn Clock>,
}

impl Ports {
    /// Wires every port to one backing store
    pub fn from_store<S>(store: Arc<S>, clock: Arc<dyn Clock>) -> Self
    where
        S: ConfigurationStore
            + AggregationReader
            + CustomerRepository
            + PackageRepository
            + NotificationSink
            + AlertLedger
            + CheckpointStore
            + 'static,
    {
        Self {
            config: store.clone(),
            aggregation: store.clone(),
            customers: store.clone(),
            packages: store.clone(),
            sink: store.clone(),
            ledger: store.clone(),
            checkpoint: store,
            clock,
        }
    }
}
