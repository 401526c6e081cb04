use rust_decimal::Decimal;

use crate::domain::{MembershipCriteria, MembershipTier};

/// First tier (highest first) whose revenue floor and visit band admit the
/// customer; bronze when nothing matches.
pub fn classify_tier(
    annual_revenue: Decimal,
    total_visits: u32,
    criteria: &MembershipCriteria,
) -> MembershipTier {
    criteria
        .tiers()
        .iter()
        .find(|threshold| threshold.admits(annual_revenue, total_visits))
        .map(|threshold| threshold.tier)
        .unwrap_or(MembershipTier::LOWEST)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn won(amount: i64) -> Decimal {
        Decimal::from(amount)
    }

    #[test]
    fn test_source_bands() {
        let criteria = MembershipCriteria::source_defaults();
        assert_eq!(classify_tier(won(0), 0, &criteria), MembershipTier::Bronze);
        assert_eq!(classify_tier(won(6_000_000), 15, &criteria), MembershipTier::Silver);
        assert_eq!(classify_tier(won(12_000_000), 40, &criteria), MembershipTier::Gold);
        assert_eq!(classify_tier(won(25_000_000), 120, &criteria), MembershipTier::Platinum);
    }

    #[test]
    fn test_revenue_without_visits_falls_back_to_bronze() {
        let criteria = MembershipCriteria::source_defaults();
        assert_eq!(classify_tier(won(50_000_000), 5, &criteria), MembershipTier::Bronze);
    }

    #[test]
    fn test_monotonic_in_revenue_for_fixed_visits() {
        let criteria = MembershipCriteria::source_defaults();
        for visits in [0, 10, 15, 30, 50, 99, 100, 250] {
            let mut previous = MembershipTier::LOWEST;
            for revenue in (0..=30).map(|m| won(m * 1_000_000)) {
                let tier = classify_tier(revenue, visits, &criteria);
                assert!(
                    tier >= previous,
                    "tier dropped at revenue {} visits {}",
                    revenue,
                    visits
                );
                previous = tier;
            }
        }
    }

    #[test]
    fn test_monotonic_in_visits_when_revenue_clears_every_floor() {
        let criteria = MembershipCriteria::source_defaults();
        let revenue = won(25_000_000);
        let mut previous = MembershipTier::LOWEST;
        for visits in 0..=200 {
            let tier = classify_tier(revenue, visits, &criteria);
            assert!(tier >= previous, "tier dropped at {} visits", visits);
            previous = tier;
        }
    }

    #[test]
    fn test_monotonic_in_visits_within_a_band() {
        let criteria = MembershipCriteria::source_defaults();
        let revenue = won(6_000_000);
        let mut previous = MembershipTier::LOWEST;
        for visits in 0..=30 {
            let tier = classify_tier(revenue, visits, &criteria);
            assert!(tier >= previous, "tier dropped at {} visits", visits);
            previous = tier;
        }
        assert_eq!(previous, MembershipTier::Silver);
    }
}
