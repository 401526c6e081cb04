//! Pure classification of customer facts into status and tier

pub mod lifecycle;
pub mod tier;

pub use lifecycle::{classify_status, days_since};
pub use tier::classify_tier;

use chrono::NaiveDate;

use crate::domain::{Classification, CustomerFacts, MembershipCriteria};

pub fn classify(
    facts: &CustomerFacts,
    criteria: &MembershipCriteria,
    today: NaiveDate,
) -> Classification {
    Classification {
        status: classify_status(days_since(facts.last_visit_date, today)),
        tier: classify_tier(facts.annual_revenue, facts.total_visits, criteria),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CustomerStatus, MembershipTier};
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn facts(days_ago: Option<i64>, revenue: i64, visits: u32) -> CustomerFacts {
        CustomerFacts {
            last_visit_date: days_ago.map(|d| today() - Duration::days(d)),
            total_visits: visits,
            annual_revenue: Decimal::from(revenue),
            total_revenue: Decimal::from(revenue),
        }
    }

    #[test]
    fn test_inactive_silver_scenario() {
        let result = classify(
            &facts(Some(45), 6_000_000, 15),
            &MembershipCriteria::source_defaults(),
            today(),
        );
        assert_eq!(result.status, Some(CustomerStatus::Inactive));
        assert_eq!(result.tier, MembershipTier::Silver);
    }

    #[test]
    fn test_active_platinum_scenario() {
        let result = classify(
            &facts(Some(10), 25_000_000, 120),
            &MembershipCriteria::source_defaults(),
            today(),
        );
        assert_eq!(result.status, Some(CustomerStatus::Active));
        assert_eq!(result.tier, MembershipTier::Platinum);
    }

    #[test]
    fn test_never_visited_scenario() {
        let result = classify(
            &CustomerFacts::never_visited(),
            &MembershipCriteria::source_defaults(),
            today(),
        );
        assert_eq!(result.status, None);
        assert_eq!(result.tier, MembershipTier::Bronze);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let input = facts(Some(91), 11_000_000, 45);
        let criteria = MembershipCriteria::source_defaults();
        assert_eq!(
            classify(&input, &criteria, today()),
            classify(&input, &criteria, today())
        );
    }
}
