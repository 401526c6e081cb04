use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::customer::CustomerId;

pub type PackageId = i64;

/// A prepaid session package. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagePurchase {
    pub id: PackageId,
    pub customer_id: CustomerId,
    pub package_name: String,
    pub expiry_date: NaiveDate,
    pub remaining_sessions: u32,
}

impl PackagePurchase {
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date < today
    }

    pub fn days_until_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry_date - today).num_days()
    }
}
