pub mod settings;

pub use settings::{DatabaseConfig, LoggingConfig, NotificationConfig, SchedulerConfig, Settings};
