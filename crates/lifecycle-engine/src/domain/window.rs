use chrono::{Months, NaiveDate};

/// Inclusive date range used to compute annual revenue.
///
/// Every aggregation reader uses the trailing-year rule: from the same
/// calendar day twelve months ago through today. Feb 29 clamps to Feb 28.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevenueWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl RevenueWindow {
    pub fn trailing_year(today: NaiveDate) -> Self {
        let start = today
            .checked_sub_months(Months::new(12))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_trailing_year_is_inclusive() {
        let window = RevenueWindow::trailing_year(date(2026, 10, 19));
        assert_eq!(window.start, date(2025, 10, 19));
        assert!(window.contains(date(2025, 10, 19)));
        assert!(window.contains(date(2026, 10, 19)));
        assert!(!window.contains(date(2025, 10, 18)));
        assert!(!window.contains(date(2026, 10, 20)));
    }

    #[test]
    fn test_trailing_year_from_leap_day() {
        let window = RevenueWindow::trailing_year(date(2028, 2, 29));
        assert_eq!(window.start, date(2027, 2, 28));
    }

    #[test]
    fn test_window_ignores_calendar_year_boundary() {
        let window = RevenueWindow::trailing_year(date(2026, 1, 5));
        assert!(window.contains(date(2025, 6, 1)));
    }
}
