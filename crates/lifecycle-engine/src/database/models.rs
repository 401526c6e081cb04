use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{
    CustomerFacts, CustomerId, CustomerRecord, CustomerStatus, MembershipTier, PackagePurchase,
};
use crate::utils::error::EngineError;

/// Payload of the `payment_recorded` NOTIFY channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub customer_id: CustomerId,
    pub operation: String, // INSERT, UPDATE
}

#[derive(Debug, Clone, FromRow)]
pub struct CustomerRow {
    pub id: i64,
    pub status: Option<String>,
    pub membership_tier: String,
    pub last_visit_date: Option<NaiveDate>,
    pub total_visits: i32,
    pub annual_revenue: Decimal,
    pub total_revenue: Decimal,
    pub version: i64,
}

impl TryFrom<CustomerRow> for CustomerRecord {
    type Error = EngineError;

    fn try_from(row: CustomerRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .as_deref()
            .map(str::parse::<CustomerStatus>)
            .transpose()
            .map_err(EngineError::InvalidStoredValue)?;

        let tier = row
            .membership_tier
            .parse::<MembershipTier>()
            .map_err(EngineError::InvalidStoredValue)?;

        let total_visits = u32::try_from(row.total_visits).map_err(|_| {
            EngineError::InvalidStoredValue(format!(
                "customer {} has negative total_visits {}",
                row.id, row.total_visits
            ))
        })?;

        Ok(CustomerRecord {
            id: row.id,
            status,
            tier,
            facts: CustomerFacts {
                last_visit_date: row.last_visit_date,
                total_visits,
                annual_revenue: row.annual_revenue,
                total_revenue: row.total_revenue,
            },
            version: row.version,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct VisitAggregateRow {
    pub last_visit_date: Option<NaiveDate>,
    pub total_visits: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct RevenueAggregateRow {
    pub annual_revenue: Decimal,
    pub total_revenue: Decimal,
}

#[derive(Debug, Clone, FromRow)]
pub struct PackageRow {
    pub id: i64,
    pub customer_id: i64,
    pub package_name: String,
    pub expiry_date: NaiveDate,
    pub remaining_sessions: i32,
}

impl TryFrom<PackageRow> for PackagePurchase {
    type Error = EngineError;

    fn try_from(row: PackageRow) -> Result<Self, Self::Error> {
        let remaining_sessions = u32::try_from(row.remaining_sessions).map_err(|_| {
            EngineError::InvalidStoredValue(format!(
                "package {} has negative remaining_sessions",
                row.id
            ))
        })?;

        Ok(PackagePurchase {
            id: row.id,
            customer_id: row.customer_id,
            package_name: row.package_name,
            expiry_date: row.expiry_date,
            remaining_sessions,
        })
    }
}
