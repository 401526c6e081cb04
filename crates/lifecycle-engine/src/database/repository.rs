use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use super::{CustomerRow, DbPool, PackageRow, RevenueAggregateRow, VisitAggregateRow};
use crate::domain::{
    AlertKey, CustomerFacts, CustomerId, CustomerRecord, CustomerUpdate, MembershipCriteria,
    NotificationEvent, PackagePurchase, RevenueWindow,
};
use crate::store::{
    AggregationReader, AlertLedger, CheckpointStore, ConfigurationStore, CustomerRepository,
    NotificationSink, PackageRepository,
};
use crate::utils::error::{EngineError, EngineResult};

const CRITERIA_KEY: &str = "membership_criteria";
const CHECKPOINT_NAME: &str = "membership_batch";

/// PostgreSQL implementation of every engine port
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

// ==================== Configuration ====================

#[async_trait]
impl ConfigurationStore for Repository {
    async fn get_membership_criteria(&self) -> EngineResult<MembershipCriteria> {
        let value: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT value FROM system_settings WHERE key = $1")
                .bind(CRITERIA_KEY)
                .fetch_optional(self.pool.get_pool())
                .await
                .map_err(|e| EngineError::ConfigUnavailable(e.to_string()))?;

        let value = value.ok_or_else(|| {
            EngineError::ConfigUnavailable(format!("setting '{}' is missing", CRITERIA_KEY))
        })?;

        MembershipCriteria::from_json(value)
    }
}

// ==================== Aggregation ====================

#[async_trait]
impl AggregationReader for Repository {
    async fn get_facts(
        &self,
        customer_id: CustomerId,
        window: RevenueWindow,
    ) -> EngineResult<CustomerFacts> {
        let read_failure = |e: sqlx::Error| EngineError::AggregationReadFailure {
            customer_id,
            reason: e.to_string(),
        };

        let visits = sqlx::query_as::<_, VisitAggregateRow>(
            r#"SELECT MAX(reservation_date) AS last_visit_date,
                      COUNT(*) AS total_visits
               FROM reservations
               WHERE customer_id = $1 AND status = 'completed'"#,
        )
        .bind(customer_id)
        .fetch_one(self.pool.get_pool())
        .await
        .map_err(read_failure)?;

        let revenue = sqlx::query_as::<_, RevenueAggregateRow>(
            r#"SELECT COALESCE(SUM(amount) FILTER (
                          WHERE payment_date BETWEEN $2 AND $3), 0) AS annual_revenue,
                      COALESCE(SUM(amount), 0) AS total_revenue
               FROM payments
               WHERE customer_id = $1"#,
        )
        .bind(customer_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_one(self.pool.get_pool())
        .await
        .map_err(read_failure)?;

        let total_visits = u32::try_from(visits.total_visits).map_err(|_| {
            EngineError::AggregationReadFailure {
                customer_id,
                reason: format!("visit count {} out of range", visits.total_visits),
            }
        })?;

        Ok(CustomerFacts {
            last_visit_date: visits.last_visit_date,
            total_visits,
            annual_revenue: revenue.annual_revenue,
            total_revenue: revenue.total_revenue,
        })
    }
}

// ==================== Customers ====================

#[async_trait]
impl CustomerRepository for Repository {
    async fn list_ids(&self) -> EngineResult<Vec<CustomerId>> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM customers ORDER BY id")
            .fetch_all(self.pool.get_pool())
            .await?;

        Ok(ids)
    }

    async fn get(&self, id: CustomerId) -> EngineResult<Option<CustomerRecord>> {
        let row = sqlx::query_as::<_, CustomerRow>(
            r#"SELECT id, status, membership_tier, last_visit_date, total_visits,
                      annual_revenue, total_revenue, version
               FROM customers
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        row.map(CustomerRecord::try_from).transpose()
    }

    async fn update(&self, update: &CustomerUpdate) -> EngineResult<()> {
        let total_visits = i32::try_from(update.facts.total_visits).map_err(|_| {
            EngineError::InvalidStoredValue(format!(
                "visit count {} does not fit the customers table",
                update.facts.total_visits
            ))
        })?;

        // Dropping the transaction on any early return rolls it back
        let mut transaction = self.pool.get_pool().begin().await?;

        let result = sqlx::query(
            r#"UPDATE customers
               SET status = $3,
                   membership_tier = $4,
                   last_visit_date = $5,
                   total_visits = $6,
                   annual_revenue = $7,
                   total_revenue = $8,
                   version = version + 1,
                   updated_at = now()
               WHERE id = $1 AND version = $2"#,
        )
        .bind(update.id)
        .bind(update.expected_version)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.tier.as_str())
        .bind(update.facts.last_visit_date)
        .bind(total_visits)
        .bind(update.facts.annual_revenue)
        .bind(update.facts.total_revenue)
        .execute(&mut *transaction)
        .await?;

        if result.rows_affected() == 0 {
            transaction.rollback().await?;
            return Err(EngineError::PersistConflict {
                customer_id: update.id,
                expected_version: update.expected_version,
            });
        }

        transaction.commit().await?;
        debug!(customer_id = update.id, "Customer classification persisted");

        Ok(())
    }
}

// ==================== Packages ====================

#[async_trait]
impl PackageRepository for Repository {
    async fn list_active_expiring_on(&self, date: NaiveDate) -> EngineResult<Vec<PackagePurchase>> {
        let rows = sqlx::query_as::<_, PackageRow>(
            r#"SELECT id, customer_id, package_name, expiry_date, remaining_sessions
               FROM package_purchases
               WHERE status = 'active'
                 AND remaining_sessions > 0
                 AND expiry_date = $1
               ORDER BY id"#,
        )
        .bind(date)
        .fetch_all(self.pool.get_pool())
        .await?;

        rows.into_iter().map(PackagePurchase::try_from).collect()
    }

    async fn list_active_low_sessions(&self, threshold: u32) -> EngineResult<Vec<PackagePurchase>> {
        let threshold = i32::try_from(threshold).unwrap_or(i32::MAX);

        let rows = sqlx::query_as::<_, PackageRow>(
            r#"SELECT id, customer_id, package_name, expiry_date, remaining_sessions
               FROM package_purchases
               WHERE status = 'active'
                 AND remaining_sessions BETWEEN 1 AND $1
               ORDER BY id"#,
        )
        .bind(threshold)
        .fetch_all(self.pool.get_pool())
        .await?;

        rows.into_iter().map(PackagePurchase::try_from).collect()
    }
}

// ==================== Notifications ====================

#[async_trait]
impl NotificationSink for Repository {
    async fn create(&self, event: &NotificationEvent) -> EngineResult<()> {
        sqlx::query(
            r#"INSERT INTO notifications
               (type, priority, target_user_id, related_entity_id, title, message, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(event.kind.as_str())
        .bind(event.priority.as_str())
        .bind(event.target_user_id)
        .bind(event.related_entity_id)
        .bind(&event.title)
        .bind(&event.message)
        .bind(event.created_at)
        .execute(self.pool.get_pool())
        .await
        .map_err(|e| EngineError::NotificationSinkFailure(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl AlertLedger for Repository {
    async fn claim(&self, key: &AlertKey) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"INSERT INTO package_alert_log (package_id, threshold, alert_date)
               VALUES ($1, $2, $3)
               ON CONFLICT (package_id, threshold, alert_date) DO NOTHING"#,
        )
        .bind(key.package_id)
        .bind(key.threshold.to_string())
        .bind(key.date)
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &AlertKey) -> EngineResult<()> {
        sqlx::query(
            r#"DELETE FROM package_alert_log
               WHERE package_id = $1 AND threshold = $2 AND alert_date = $3"#,
        )
        .bind(key.package_id)
        .bind(key.threshold.to_string())
        .bind(key.date)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }
}

// ==================== Checkpoint ====================

#[async_trait]
impl CheckpointStore for Repository {
    async fn last_successful_run(&self) -> EngineResult<Option<DateTime<Utc>>> {
        let last = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT last_success_at FROM engine_checkpoints WHERE name = $1",
        )
        .bind(CHECKPOINT_NAME)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(last)
    }

    async fn record_successful_run(&self, finished_at: DateTime<Utc>) -> EngineResult<()> {
        sqlx::query(
            r#"INSERT INTO engine_checkpoints (name, last_success_at)
               VALUES ($1, $2)
               ON CONFLICT (name)
               DO UPDATE SET last_success_at = EXCLUDED.last_success_at"#,
        )
        .bind(CHECKPOINT_NAME)
        .bind(finished_at)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }
}
