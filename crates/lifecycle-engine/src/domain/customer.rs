// ============================================================================
// Lifecycle Engine - Customer Snapshot
// File: crates/lifecycle-engine/src/domain/customer.rs
// Description: Immutable customer values read and written by the engine
// ============================================================================

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::membership::MembershipTier;

pub type CustomerId = i64;

/// Activity status derived from recency of the last completed visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    Active,
    Inactive,
    Dormant,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::Active => "active",
            CustomerStatus::Inactive => "inactive",
            CustomerStatus::Dormant => "dormant",
        }
    }
}

impl fmt::Display for CustomerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CustomerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CustomerStatus::Active),
            "inactive" => Ok(CustomerStatus::Inactive),
            "dormant" => Ok(CustomerStatus::Dormant),
            other => Err(format!("unknown customer status '{}'", other)),
        }
    }
}

/// Aggregated facts about a customer, computed from reservations and payments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerFacts {
    /// Date of the most recent completed reservation, `None` if never visited
    pub last_visit_date: Option<NaiveDate>,
    pub total_visits: u32,
    pub annual_revenue: Decimal,
    pub total_revenue: Decimal,
}

impl CustomerFacts {
    pub fn never_visited() -> Self {
        Self {
            last_visit_date: None,
            total_visits: 0,
            annual_revenue: Decimal::ZERO,
            total_revenue: Decimal::ZERO,
        }
    }
}

/// Output of the classifiers for one customer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// `None` for customers without any completed visit
    pub status: Option<CustomerStatus>,
    pub tier: MembershipTier,
}

/// Stored customer row as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerRecord {
    pub id: CustomerId,
    pub status: Option<CustomerStatus>,
    pub tier: MembershipTier,
    pub facts: CustomerFacts,
    /// Optimistic concurrency token, bumped on every write
    pub version: i64,
}

impl CustomerRecord {
    pub fn classification(&self) -> Classification {
        Classification {
            status: self.status,
            tier: self.tier,
        }
    }

    /// True when the stored row already reflects the given facts and classification
    pub fn matches(&self, facts: &CustomerFacts, classification: &Classification) -> bool {
        self.facts == *facts && self.classification() == *classification
    }
}

/// Write request for a single customer row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerUpdate {
    pub id: CustomerId,
    pub expected_version: i64,
    pub status: Option<CustomerStatus>,
    pub tier: MembershipTier,
    pub facts: CustomerFacts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            CustomerStatus::Active,
            CustomerStatus::Inactive,
            CustomerStatus::Dormant,
        ] {
            assert_eq!(status.as_str().parse::<CustomerStatus>(), Ok(status));
        }
        assert!("new".parse::<CustomerStatus>().is_err());
    }

    #[test]
    fn test_record_matches_ignores_version() {
        let record = CustomerRecord {
            id: 1,
            status: Some(CustomerStatus::Active),
            tier: MembershipTier::Silver,
            facts: CustomerFacts::never_visited(),
            version: 42,
        };
        let classification = Classification {
            status: Some(CustomerStatus::Active),
            tier: MembershipTier::Silver,
        };
        assert!(record.matches(&CustomerFacts::never_visited(), &classification));

        let other = Classification {
            tier: MembershipTier::Gold,
            ..classification
        };
        assert!(!record.matches(&CustomerFacts::never_visited(), &other));
    }
}
