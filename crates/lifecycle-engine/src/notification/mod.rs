//! Notification trigger: classification change events and package alerts

pub mod alerts;
pub mod events;

pub use alerts::{AlertScanSummary, PackageAlertScanner};
pub use events::change_events;
