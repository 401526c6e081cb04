use chrono::NaiveDate;

use crate::domain::CustomerStatus;

/// Last day (inclusive) a customer still counts as active
pub const ACTIVE_MAX_DAYS: i64 = 30;
/// Last day (inclusive) a customer still counts as inactive
pub const INACTIVE_MAX_DAYS: i64 = 90;

pub fn days_since(last_visit: Option<NaiveDate>, today: NaiveDate) -> Option<i64> {
    last_visit.map(|date| (today - date).num_days())
}

/// Status from days since the last completed visit.
///
/// `None` (never visited) stays unclassified. A visit dated after `today`
/// counts as a visit today.
pub fn classify_status(days_since_last_visit: Option<i64>) -> Option<CustomerStatus> {
    let days = days_since_last_visit?.max(0);

    let status = if days <= ACTIVE_MAX_DAYS {
        CustomerStatus::Active
    } else if days <= INACTIVE_MAX_DAYS {
        CustomerStatus::Inactive
    } else {
        CustomerStatus::Dormant
    };

    Some(status)
}
