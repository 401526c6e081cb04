pub mod batch;
pub mod engine;
pub mod processor;
pub mod queue;
pub mod scheduler;

pub use batch::{AbortReason, BatchConfig, BatchRunner, FailedCustomer, RunState, RunSummary};
pub use engine::LifecycleEngine;
pub use processor::{CustomerProcessor, ProcessorConfig, RecomputeOutcome};
pub use queue::{RecomputeQueue, RecomputeTask, TaskPriority};
pub use scheduler::{next_run_delay, Scheduler, SchedulerHandle};

use tokio::sync::watch;

pub(crate) fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Resolves once shutdown is signalled. A dropped sender never resolves.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
