use chrono::{DateTime, Days, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::NotificationConfig;
use crate::domain::{
    AlertKey, AlertThreshold, NotificationEvent, NotificationKind, NotificationPriority,
    PackagePurchase,
};
use crate::store::{AlertLedger, NotificationSink, PackageRepository};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertScanSummary {
    pub sent: usize,
    pub deduplicated: usize,
    pub failed: usize,
}

/// Raises package expiry and low-session alerts, at most once per
/// package, threshold and day.
pub struct PackageAlertScanner {
    packages: Arc<dyn PackageRepository>,
    ledger: Arc<dyn AlertLedger>,
    sink: Arc<dyn NotificationSink>,
    config: NotificationConfig,
}

impl PackageAlertScanner {
    pub fn new(
        packages: Arc<dyn PackageRepository>,
        ledger: Arc<dyn AlertLedger>,
        sink: Arc<dyn NotificationSink>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            packages,
            ledger,
            sink,
            config,
        }
    }

    pub async fn scan(&self, today: NaiveDate, now: DateTime<Utc>) -> AlertScanSummary {
        let mut summary = AlertScanSummary::default();

        let mut offsets = self.config.expiry_alert_days.clone();
        offsets.sort_unstable();
        offsets.dedup();

        for days in offsets {
            let Some(expiry_date) = today.checked_add_days(Days::new(u64::from(days))) else {
                continue;
            };

            let packages = match self.packages.list_active_expiring_on(expiry_date).await {
                Ok(packages) => packages,
                Err(e) => {
                    error!(expiry_date = %expiry_date, "Failed to list expiring packages: {}", e);
                    summary.failed += 1;
                    continue;
                }
            };

            for package in packages.iter().filter(|p| p.remaining_sessions > 0) {
                let key = AlertKey {
                    package_id: package.id,
                    threshold: AlertThreshold::ExpiresIn(days),
                    date: today,
                };
                let event = self.expiry_event(package, days, now);
                self.emit(key, event, &mut summary).await;
            }
        }

        let threshold = self.config.low_session_threshold;
        match self.packages.list_active_low_sessions(threshold).await {
            Ok(packages) => {
                for package in packages
                    .iter()
                    .filter(|p| p.remaining_sessions > 0 && !p.is_expired(today))
                {
                    let key = AlertKey {
                        package_id: package.id,
                        threshold: AlertThreshold::LowSessions,
                        date: today,
                    };
                    let event = self.low_sessions_event(package, now);
                    self.emit(key, event, &mut summary).await;
                }
            }
            Err(e) => {
                error!("Failed to list low-session packages: {}", e);
                summary.failed += 1;
            }
        }

        summary
    }

    async fn emit(&self, key: AlertKey, event: NotificationEvent, summary: &mut AlertScanSummary) {
        match self.ledger.claim(&key).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(package_id = key.package_id, threshold = %key.threshold, "Alert already raised today");
                summary.deduplicated += 1;
                return;
            }
            Err(e) => {
                error!(package_id = key.package_id, "Failed to claim alert key: {}", e);
                summary.failed += 1;
                return;
            }
        }

        if let Err(e) = self.sink.create(&event).await {
            warn!(
                package_id = key.package_id,
                threshold = %key.threshold,
                "Failed to create package alert: {}",
                e
            );
            summary.failed += 1;

            // Unclaim so the next run retries the alert
            if let Err(e) = self.ledger.release(&key).await {
                error!(package_id = key.package_id, "Failed to release alert key: {}", e);
            }
            return;
        }

        summary.sent += 1;
    }

    fn expiry_event(
        &self,
        package: &PackagePurchase,
        days: u32,
        now: DateTime<Utc>,
    ) -> NotificationEvent {
        let (priority, when) = match days {
            0 => (NotificationPriority::Urgent, "today".to_string()),
            1..=3 => (NotificationPriority::High, format!("in {} days", days)),
            _ => (NotificationPriority::Normal, format!("in {} days", days)),
        };

        NotificationEvent {
            kind: NotificationKind::PackageExpiring,
            priority,
            target_user_id: self.config.recipient_user_id,
            related_entity_id: package.id,
            title: format!("Package expires {}", when),
            message: format!(
                "Package '{}' of customer #{} expires on {} with {} session(s) left.",
                package.package_name,
                package.customer_id,
                package.expiry_date,
                package.remaining_sessions
            ),
            created_at: now,
        }
    }

    fn low_sessions_event(&self, package: &PackagePurchase, now: DateTime<Utc>) -> NotificationEvent {
        let priority = if package.remaining_sessions <= 1 {
            NotificationPriority::High
        } else {
            NotificationPriority::Normal
        };

        NotificationEvent {
            kind: NotificationKind::PackageLowSessions,
            priority,
            target_user_id: self.config.recipient_user_id,
            related_entity_id: package.id,
            title: format!("{} session(s) left", package.remaining_sessions),
            message: format!(
                "Package '{}' of customer #{} has {} session(s) left (expires {}).",
                package.package_name,
                package.customer_id,
                package.remaining_sessions,
                package.expiry_date
            ),
            created_at: now,
        }
    }
}
