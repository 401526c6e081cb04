// ============================================================================
// Lifecycle Engine - Membership Criteria
// File: crates/lifecycle-engine/src/domain/membership.rs
// Description: Tier thresholds loaded once per batch run
// ============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::utils::error::{EngineError, EngineResult};

/// Membership level, ordered by rank (bronze lowest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl MembershipTier {
    pub const LOWEST: MembershipTier = MembershipTier::Bronze;

    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipTier::Bronze => "bronze",
            MembershipTier::Silver => "silver",
            MembershipTier::Gold => "gold",
            MembershipTier::Platinum => "platinum",
        }
    }
}

impl Default for MembershipTier {
    fn default() -> Self {
        MembershipTier::LOWEST
    }
}

impl fmt::Display for MembershipTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MembershipTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bronze" => Ok(MembershipTier::Bronze),
            "silver" => Ok(MembershipTier::Silver),
            "gold" => Ok(MembershipTier::Gold),
            "platinum" => Ok(MembershipTier::Platinum),
            other => Err(format!("unknown membership tier '{}'", other)),
        }
    }
}

/// Thresholds as stored in the configuration store (`tierName -> thresholds`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSpec {
    pub min_annual_revenue: Decimal,
    #[serde(default)]
    pub min_visits: u32,
    #[serde(default)]
    pub max_visits: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierThreshold {
    pub tier: MembershipTier,
    pub min_annual_revenue: Decimal,
    pub min_visits: u32,
    /// Inclusive upper bound, `None` means unbounded
    pub max_visits: Option<u32>,
}

impl TierThreshold {
    pub fn admits(&self, annual_revenue: Decimal, total_visits: u32) -> bool {
        annual_revenue >= self.min_annual_revenue
            && total_visits >= self.min_visits
            && self.max_visits.map_or(true, |max| total_visits <= max)
    }
}

/// Validated tier list, highest tier first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipCriteria {
    tiers: Vec<TierThreshold>,
}

impl MembershipCriteria {
    pub fn new(mut tiers: Vec<TierThreshold>) -> EngineResult<Self> {
        if tiers.is_empty() {
            return Err(EngineError::ConfigUnavailable(
                "membership criteria are empty".to_string(),
            ));
        }

        for threshold in &tiers {
            if threshold.min_annual_revenue.is_sign_negative() {
                return Err(EngineError::ConfigUnavailable(format!(
                    "tier {} has a negative minimum revenue",
                    threshold.tier
                )));
            }
            if let Some(max) = threshold.max_visits {
                if max < threshold.min_visits {
                    return Err(EngineError::ConfigUnavailable(format!(
                        "tier {} has max visits {} below min visits {}",
                        threshold.tier, max, threshold.min_visits
                    )));
                }
            }
        }

        tiers.sort_by(|a, b| b.tier.cmp(&a.tier));
        if tiers.windows(2).any(|pair| pair[0].tier == pair[1].tier) {
            return Err(EngineError::ConfigUnavailable(
                "membership criteria list a tier twice".to_string(),
            ));
        }

        Ok(Self { tiers })
    }

    /// Build from the `tierName -> thresholds` mapping kept by the configuration store
    pub fn from_mapping(mapping: BTreeMap<String, ThresholdSpec>) -> EngineResult<Self> {
        let tiers = mapping
            .into_iter()
            .map(|(name, spec)| {
                let tier = name
                    .parse::<MembershipTier>()
                    .map_err(EngineError::ConfigUnavailable)?;
                Ok(TierThreshold {
                    tier,
                    min_annual_revenue: spec.min_annual_revenue,
                    min_visits: spec.min_visits,
                    max_visits: spec.max_visits,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;

        Self::new(tiers)
    }

    pub fn from_json(value: serde_json::Value) -> EngineResult<Self> {
        let mapping: BTreeMap<String, ThresholdSpec> = serde_json::from_value(value)
            .map_err(|e| EngineError::ConfigUnavailable(format!("malformed criteria: {}", e)))?;
        Self::from_mapping(mapping)
    }

    pub fn to_mapping(&self) -> BTreeMap<String, ThresholdSpec> {
        self.tiers
            .iter()
            .map(|t| {
                (
                    t.tier.as_str().to_string(),
                    ThresholdSpec {
                        min_annual_revenue: t.min_annual_revenue,
                        min_visits: t.min_visits,
                        max_visits: t.max_visits,
                    },
                )
            })
            .collect()
    }

    /// The bands the membership program launched with
    pub fn source_defaults() -> Self {
        let tiers = vec![
            TierThreshold {
                tier: MembershipTier::Platinum,
                min_annual_revenue: Decimal::from(20_000_000),
                min_visits: 100,
                max_visits: None,
            },
            TierThreshold {
                tier: MembershipTier::Gold,
                min_annual_revenue: Decimal::from(10_000_000),
                min_visits: 31,
                max_visits: Some(99),
            },
            TierThreshold {
                tier: MembershipTier::Silver,
                min_annual_revenue: Decimal::from(5_000_000),
                min_visits: 11,
                max_visits: Some(30),
            },
            TierThreshold {
                tier: MembershipTier::Bronze,
                min_annual_revenue: Decimal::ZERO,
                min_visits: 0,
                max_visits: Some(10),
            },
        ];
        Self { tiers }
    }

    /// Thresholds ordered highest tier first
    pub fn tiers(&self) -> &[TierThreshold] {
        &self.tiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_sorts_highest_first() {
        let criteria = MembershipCriteria::from_json(json!({
            "bronze": { "minAnnualRevenue": 0, "minVisits": 0, "maxVisits": 10 },
            "platinum": { "minAnnualRevenue": 20000000, "minVisits": 100 },
            "silver": { "minAnnualRevenue": 5000000, "minVisits": 11, "maxVisits": 30 },
            "gold": { "minAnnualRevenue": 10000000, "minVisits": 31, "maxVisits": 99 }
        }))
        .unwrap();

        let order: Vec<_> = criteria.tiers().iter().map(|t| t.tier).collect();
        assert_eq!(
            order,
            vec![
                MembershipTier::Platinum,
                MembershipTier::Gold,
                MembershipTier::Silver,
                MembershipTier::Bronze
            ]
        );
        assert_eq!(criteria, MembershipCriteria::source_defaults());
    }

    #[test]
    fn test_unknown_tier_name_is_config_error() {
        let err = MembershipCriteria::from_json(json!({
            "diamond": { "minAnnualRevenue": 1 }
        }))
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_empty_and_inverted_bands_rejected() {
        assert!(MembershipCriteria::from_json(json!({})).is_err());
        assert!(MembershipCriteria::from_json(json!({
            "silver": { "minAnnualRevenue": 5, "minVisits": 30, "maxVisits": 11 }
        }))
        .is_err());
    }

    #[test]
    fn test_mapping_round_trip_preserves_bands() {
        let defaults = MembershipCriteria::source_defaults();
        let rebuilt = MembershipCriteria::from_mapping(defaults.to_mapping()).unwrap();
        assert_eq!(rebuilt, defaults);
    }

    #[test]
    fn test_threshold_admits_inclusive_bounds() {
        let criteria = MembershipCriteria::source_defaults();
        let silver = &criteria.tiers()[2];
        assert!(silver.admits(Decimal::from(5_000_000), 11));
        assert!(silver.admits(Decimal::from(5_000_000), 30));
        assert!(!silver.admits(Decimal::from(5_000_000), 31));
        assert!(!silver.admits(Decimal::from(4_999_999), 20));
    }
}
