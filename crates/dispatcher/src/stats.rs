use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// 任务管理器的运行计数，每个实例独立持有
#[derive(Debug, Default)]
pub struct TaskManagerStats {
    tasks_created: AtomicU64,
    tasks_invoked: AtomicU64,
    concurrent_task_invocations_skipped: AtomicU64,
    tasks_closed: AtomicU64,
    tasks_archived: AtomicU64,
    tasks_moved_to_retry: AtomicU64,
    tasks_returned_to_queue: AtomicU64,
}

/// 计数快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub tasks_created: u64,
    pub tasks_invoked: u64,
    pub concurrent_task_invocations_skipped: u64,
    pub tasks_closed: u64,
    pub tasks_archived: u64,
    pub tasks_moved_to_retry: u64,
    pub tasks_returned_to_queue: u64,
}

impl TaskManagerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tasks_created: self.tasks_created.load(Ordering::Relaxed),
            tasks_invoked: self.tasks_invoked.load(Ordering::Relaxed),
            concurrent_task_invocations_skipped: self
                .concurrent_task_invocations_skipped
                .load(Ordering::Relaxed),
            tasks_closed: self.tasks_closed.load(Ordering::Relaxed),
            tasks_archived: self.tasks_archived.load(Ordering::Relaxed),
            tasks_moved_to_retry: self.tasks_moved_to_retry.load(Ordering::Relaxed),
            tasks_returned_to_queue: self.tasks_returned_to_queue.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_created(&self) {
        self.tasks_created.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("scheduler_tasks_created_total").increment(1);
    }

    pub(crate) fn record_invoked(&self) {
        self.tasks_invoked.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("scheduler_tasks_invoked_total").increment(1);
    }

    pub(crate) fn record_invocation_skipped(&self) {
        self.concurrent_task_invocations_skipped
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!("scheduler_concurrent_task_invocations_skipped_total").increment(1);
    }

    pub(crate) fn record_closed(&self) {
        self.tasks_closed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("scheduler_tasks_closed_total").increment(1);
    }

    pub(crate) fn record_archived(&self) {
        self.tasks_archived.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("scheduler_tasks_archived_total").increment(1);
    }

    pub(crate) fn record_moved_to_retry(&self) {
        self.tasks_moved_to_retry.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("scheduler_tasks_moved_to_retry_total").increment(1);
    }

    pub(crate) fn record_returned_to_queue(&self) {
        self.tasks_returned_to_queue.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("scheduler_tasks_returned_to_queue_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = TaskManagerStats::default();
        stats.record_created();
        stats.record_created();
        stats.record_invocation_skipped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tasks_created, 2);
        assert_eq!(snapshot.concurrent_task_invocations_skipped, 1);
        assert_eq!(snapshot.tasks_invoked, 0);
    }
}
