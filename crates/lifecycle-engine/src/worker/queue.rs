use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

use crate::domain::CustomerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
}

/// Request to recompute one customer outside the batch cadence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecomputeTask {
    pub customer_id: CustomerId,
    pub priority: TaskPriority,
    pub retry_count: u32,
}

impl RecomputeTask {
    pub fn new(customer_id: CustomerId, priority: TaskPriority) -> Self {
        Self {
            customer_id,
            priority,
            retry_count: 0,
        }
    }
}

/// Bounded priority queue of on-demand recomputes, one entry per customer
pub struct RecomputeQueue {
    queue: Mutex<VecDeque<RecomputeTask>>,
    max_size: usize,
    notify: Notify,
}

impl RecomputeQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            max_size: max_size.max(1),
            notify: Notify::new(),
        }
    }

    /// Enqueue task (sorted by priority). Returns `false` if it was dropped.
    pub async fn enqueue(&self, task: RecomputeTask) -> bool {
        let mut queue = self.queue.lock().await;

        // Check if customer already in queue
        if let Some(pos) = queue.iter().position(|t| t.customer_id == task.customer_id) {
            if queue[pos].priority >= task.priority {
                return true;
            }
            queue.remove(pos);
        }

        // Check max size
        if queue.len() >= self.max_size {
            match queue.back() {
                Some(last) if last.priority < task.priority => {
                    queue.pop_back();
                }
                _ => return false,
            }
        }

        // Insert based on priority, FIFO within the same priority
        let insert_pos = queue
            .iter()
            .position(|t| t.priority < task.priority)
            .unwrap_or(queue.len());

        queue.insert(insert_pos, task);
        drop(queue);

        self.notify.notify_one();
        true
    }

    /// Dequeue next task
    pub async fn dequeue(&self) -> Option<RecomputeTask> {
        let mut queue = self.queue.lock().await;
        queue.pop_front()
    }

    /// Waits until a task is available
    pub async fn next(&self) -> RecomputeTask {
        loop {
            if let Some(task) = self.dequeue().await {
                return task;
            }
            self.notify.notified().await;
        }
    }

    /// Get queue size
    pub async fn size(&self) -> usize {
        let queue = self.queue.lock().await;
        queue.len()
    }
}
