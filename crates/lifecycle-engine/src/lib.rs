//! Customer lifecycle and membership classification engine.
//!
//! Periodically reclassifies every customer's lifecycle status and membership
//! tier from visit and payment history, persists changes with optimistic
//! concurrency and raises change and package alerts.

pub mod classifier;
pub mod config;
pub mod database;
pub mod domain;
pub mod notification;
pub mod store;
pub mod utils;
pub mod worker;

pub use config::Settings;
pub use utils::error::{EngineError, EngineResult};
pub use worker::{LifecycleEngine, RunState, RunSummary, Scheduler, SchedulerHandle};
