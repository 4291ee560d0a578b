//! 调度周期
//!
//! 每个周期依次完成：注册 Labourer、回收到期的重试任务、归档已完成的任务、
//! 处理过期任务、在并发容量内调用排队任务。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use scheduler_core::{
    config::DispatcherConfig,
    models::{row_i64, row_string, ClosedTaskStatus, EcoStatus, Labourer},
    SchedulerError, SchedulerResult,
};

use crate::retry_service::RetryPolicy;
use crate::task_manager::{InvocationOutcome, TaskManager};

/// 单个 Labourer 在一个周期内的处理结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub labourer_id: String,
    pub health: i32,
    pub average_duration: i64,
    pub returned_from_retry: usize,
    pub archived: usize,
    pub retried: usize,
    pub abandoned: usize,
    pub invoked: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct TaskScheduler {
    manager: Arc<TaskManager>,
    retry_policy: RetryPolicy,
    config: DispatcherConfig,
}

impl TaskScheduler {
    pub fn new(manager: Arc<TaskManager>, config: DispatcherConfig) -> Self {
        let retry_policy = RetryPolicy::new(manager.config().retry.clone());
        Self {
            manager,
            retry_policy,
            config,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    /// 执行一个完整的调度周期
    pub async fn run_cycle(&self) -> SchedulerResult<Vec<CycleReport>> {
        let labourers = self.manager.register_labourers().await?;
        let mut reports = Vec::with_capacity(labourers.len());

        for mut labourer in labourers {
            let average = self.manager.get_average_labourer_duration(&labourer).await?;
            labourer.max_duration = average;

            let report = self.process_labourer(&labourer, average).await?;
            info!(
                "Labourer {} 周期完成: 调用 {}，跳过 {}，归档 {}，重试 {}，放弃 {}",
                report.labourer_id,
                report.invoked,
                report.skipped,
                report.archived,
                report.retried,
                report.abandoned
            );
            reports.push(report);
        }

        Ok(reports)
    }

    async fn process_labourer(
        &self,
        labourer: &Labourer,
        average_duration: i64,
    ) -> SchedulerResult<CycleReport> {
        let health = labourer.health().unwrap_or(EcoStatus::Moderate.code());
        let mut report = CycleReport {
            labourer_id: labourer.id.clone(),
            health,
            average_duration,
            ..Default::default()
        };

        report.returned_from_retry = self.requeue_due_retries(labourer).await?;
        report.archived = self.archive_completed(labourer).await?;
        self.scavenge_expired(labourer, &mut report).await?;

        if health <= EcoStatus::Bad.code() {
            warn!("Labourer {} 健康状态为 {}，本周期不调用任务", labourer.id, health);
            return Ok(report);
        }

        let capacity = self.invocation_capacity(labourer).await?;
        if capacity == 0 {
            debug!("Labourer {} 没有剩余并发容量", labourer.id);
            return Ok(report);
        }

        let tasks = self.manager.get_next_for_labourer(labourer, capacity).await?;
        for task in tasks {
            match self.manager.invoke_task(labourer, None, Some(task)).await {
                Ok(InvocationOutcome::Invoked { .. }) => report.invoked += 1,
                Ok(InvocationOutcome::Skipped { .. }) => report.skipped += 1,
                Err(SchedulerError::TaskNotFound { task_id }) => {
                    debug!("任务 {} 已不在活动表中，跳过调用", task_id);
                }
                Err(SchedulerError::InvalidTask(reason)) => {
                    warn!("Labourer {} 跳过无效任务: {}", labourer.id, reason);
                    report.failed += 1;
                }
                Err(e) => {
                    error!("Labourer {} 调用任务失败: {}", labourer.id, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn requeue_due_retries(&self, labourer: &Labourer) -> SchedulerResult<usize> {
        let due = self
            .manager
            .get_tasks_to_retry_for_labourer(labourer, None)
            .await?;
        let count = due.len();
        for retry_row in due {
            self.manager.return_task_to_queue(labourer, retry_row).await?;
        }
        Ok(count)
    }

    async fn archive_completed(&self, labourer: &Labourer) -> SchedulerResult<usize> {
        let task_id_field = self.manager.field_map().task_id().to_string();
        let mut archived = 0;

        for task in self.manager.get_completed_tasks_for_labourer(labourer).await? {
            let Some(task_id) = row_string(&task, &task_id_field) else {
                self.manager.warn_invalid(labourer, &task);
                continue;
            };
            match self
                .manager
                .archive_task_with_status(&task_id, ClosedTaskStatus::Completed)
                .await
            {
                Ok(()) => archived += 1,
                // 其他实例已经归档
                Err(SchedulerError::TaskNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(archived)
    }

    async fn scavenge_expired(
        &self,
        labourer: &Labourer,
        report: &mut CycleReport,
    ) -> SchedulerResult<()> {
        let fields = self.manager.field_map().clone();
        let max_attempts = i64::from(labourer.effective_max_attempts());

        for task in self.manager.get_expired_tasks_for_labourer(labourer).await? {
            let Some(task_id) = row_string(&task, fields.task_id()) else {
                self.manager.warn_invalid(labourer, &task);
                continue;
            };
            let attempts = row_i64(&task, fields.attempts()).unwrap_or(0);

            if attempts >= max_attempts {
                warn!(
                    "任务 {} 已尝试 {} 次，达到上限 {}，归档为失败",
                    task_id, attempts, max_attempts
                );
                match self
                    .manager
                    .archive_task_with_status(&task_id, ClosedTaskStatus::Failed)
                    .await
                {
                    Ok(()) => report.abandoned += 1,
                    // 其他实例已经处理
                    Err(SchedulerError::TaskNotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
            } else {
                let delay = self.retry_policy.delay_for_task(&task, fields.attempts());
                self.manager.retry_task(labourer, task, delay).await?;
                report.retried += 1;
            }
        }

        Ok(())
    }

    /// 本周期还可以发出的调用数
    async fn invocation_capacity(&self, labourer: &Labourer) -> SchedulerResult<usize> {
        let per_cycle = self.config.max_invocations_per_cycle as usize;
        match labourer.max_simultaneous_invocations {
            Some(max_simultaneous) => {
                let running = self
                    .manager
                    .get_count_of_running_tasks_for_labourer(labourer)
                    .await?;
                let free = u64::from(max_simultaneous).saturating_sub(running) as usize;
                Ok(free.min(per_cycle))
            }
            None => Ok(per_cycle),
        }
    }

    /// 按固定间隔循环执行，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.schedule_interval_seconds));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("调度周期执行失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("调度器循环收到关闭信号");
                    break;
                }
            }
        }
    }
}
