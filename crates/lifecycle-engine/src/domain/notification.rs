// ============================================================================
// Lifecycle Engine - Notification Events
// File: crates/lifecycle-engine/src/domain/notification.rs
// Description: Write-only output of the engine plus alert dedup keys
// ============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::package::PackageId;

pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StatusChanged,
    TierChanged,
    PackageExpiring,
    PackageLowSessions,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::StatusChanged => "status_changed",
            NotificationKind::TierChanged => "tier_changed",
            NotificationKind::PackageExpiring => "package_expiring",
            NotificationKind::PackageLowSessions => "package_low_sessions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
            NotificationPriority::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub target_user_id: UserId,
    /// Customer id for status/tier events, package id for package alerts
    pub related_entity_id: i64,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Which threshold a package alert was raised for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "days", rename_all = "snake_case")]
pub enum AlertThreshold {
    ExpiresIn(u32),
    LowSessions,
}

impl fmt::Display for AlertThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertThreshold::ExpiresIn(days) => write!(f, "expires_in_{}d", days),
            AlertThreshold::LowSessions => f.write_str("low_sessions"),
        }
    }
}

/// Dedup key: one alert per package, threshold and calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub package_id: PackageId,
    pub threshold: AlertThreshold,
    pub date: NaiveDate,
}
