use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use lifecycle_engine::config::Settings;
use lifecycle_engine::database::{DbPool, PaymentListener, Repository};
use lifecycle_engine::store::{Ports, SystemClock};
use lifecycle_engine::utils::logger::init_logger;
use lifecycle_engine::utils::metrics::Metrics;
use lifecycle_engine::worker::{LifecycleEngine, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging; the guard flushes the file writer on exit
    let _log_guard = init_logger(&settings.logging)?;
    info!("🚀 Starting Lifecycle Engine...");
    info!("✅ Configuration loaded");

    // Initialize database pool
    let db_pool = DbPool::new(&settings.database).await?;
    info!("✅ Database connection established");

    if settings.database.run_migrations {
        db_pool.migrate().await?;
    }

    let offset = settings
        .scheduler
        .business_offset()
        .ok_or_else(|| anyhow::anyhow!("invalid scheduler.utc_offset_minutes"))?;

    let repository = Arc::new(Repository::new(db_pool.clone()));
    let ports = Ports::from_store(repository, Arc::new(SystemClock::new(offset)));
    let metrics = Metrics::new();

    let engine = Arc::new(LifecycleEngine::new(
        ports,
        &settings.scheduler,
        &settings.notification,
        metrics.clone(),
    ));

    let scheduler = Scheduler::new(engine, &settings.scheduler);
    let handle = scheduler.handle();

    // Payment-triggered recomputes are best effort; batches run without them
    let listener = PaymentListener::new(
        settings.database.clone(),
        settings.database.listen_channel.clone(),
    );
    let payments = match listener.start(handle.subscribe()).await {
        Ok(payments) => Some(payments),
        Err(e) => {
            warn!("Payment listener unavailable, on-demand recomputes disabled: {}", e);
            None
        }
    };

    let running = tokio::spawn(scheduler.run(payments));

    // Graceful shutdown signal
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
    handle.shutdown();

    if let Err(e) = running.await {
        error!("Scheduler task failed: {}", e);
    }

    metrics.log_summary();
    db_pool.close().await;
    info!("Lifecycle Engine stopped");

    Ok(())
}
