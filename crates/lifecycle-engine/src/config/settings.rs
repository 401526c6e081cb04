use anyhow::Result;
use chrono::FixedOffset;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::database::listener::PAYMENT_CHANNEL;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_seconds: u64,
    /// NOTIFY channel fired when a payment is recorded. The bundled
    /// migration's trigger only notifies `payment_recorded`; another name
    /// needs an externally managed trigger and `run_migrations = false`.
    #[serde(default = "default_listen_channel")]
    pub listen_channel: String,
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_iteration_timeout")]
    pub iteration_timeout_seconds: u64,
    /// Extra attempts after the first failed aggregation read
    #[serde(default = "default_aggregation_retries")]
    pub aggregation_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Offset of the business time zone, e.g. 540 for KST
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_queue_capacity")]
    pub on_demand_queue_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotificationConfig {
    /// Staff account that receives engine notifications
    #[serde(default = "default_recipient")]
    pub recipient_user_id: i64,
    #[serde(default = "default_expiry_alert_days")]
    pub expiry_alert_days: Vec<u32>,
    #[serde(default = "default_low_session_threshold")]
    pub low_session_threshold: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
}

fn default_pool_max_size() -> u32 {
    10
}

fn default_pool_timeout() -> u64 {
    30
}

fn default_listen_channel() -> String {
    PAYMENT_CHANNEL.to_string()
}

fn default_run_migrations() -> bool {
    true
}

fn default_interval_hours() -> u64 {
    24
}

fn default_worker_concurrency() -> usize {
    8
}

fn default_iteration_timeout() -> u64 {
    30
}

fn default_aggregation_retries() -> u32 {
    2
}

fn default_retry_backoff() -> u64 {
    200
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_recipient() -> i64 {
    1
}

fn default_expiry_alert_days() -> Vec<u32> {
    vec![0, 3, 7]
}

fn default_low_session_threshold() -> u32 {
    3
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_prefix() -> String {
    "lifecycle".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            worker_concurrency: default_worker_concurrency(),
            iteration_timeout_seconds: default_iteration_timeout(),
            aggregation_retries: default_aggregation_retries(),
            retry_backoff_ms: default_retry_backoff(),
            utc_offset_minutes: 0,
            on_demand_queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            recipient_user_id: default_recipient(),
            expiry_alert_days: default_expiry_alert_days(),
            low_session_threshold: default_low_session_threshold(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            file_prefix: default_log_prefix(),
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }

    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_secs(self.iteration_timeout_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn business_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Load from environment first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            // Example: APP__DATABASE__URL=postgres://...
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("notification.expiry_alert_days")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;

        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            anyhow::bail!("database.url must be set");
        }

        if self.database.listen_channel.is_empty() {
            anyhow::bail!("database.listen_channel must be set");
        }

        if self.database.run_migrations && self.database.listen_channel != PAYMENT_CHANNEL {
            anyhow::bail!(
                "database.listen_channel '{}' does not match the migration trigger channel '{}'",
                self.database.listen_channel,
                PAYMENT_CHANNEL
            );
        }

        if self.scheduler.interval_hours == 0 {
            anyhow::bail!("scheduler.interval_hours must be at least 1");
        }

        if self.scheduler.worker_concurrency == 0 {
            anyhow::bail!("scheduler.worker_concurrency must be at least 1");
        }

        if self.scheduler.iteration_timeout_seconds == 0 {
            anyhow::bail!("scheduler.iteration_timeout_seconds must be at least 1");
        }

        if self.scheduler.business_offset().is_none() {
            anyhow::bail!(
                "scheduler.utc_offset_minutes out of range: {}",
                self.scheduler.utc_offset_minutes
            );
        }

        if self.notification.expiry_alert_days.is_empty() {
            anyhow::bail!("notification.expiry_alert_days must list at least one day");
        }

        Ok(())
    }
}
