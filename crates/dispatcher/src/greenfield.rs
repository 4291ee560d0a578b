//! Greenfield 虚拟时钟
//!
//! 每个 Labourer 的任务按 greenfield 排序，不需要集中加锁：
//!
//! - 排队中: `greenfield < start`
//! - 运行中: `greenfield >= expired`
//! - 已过期（已调用但未关闭且超时）: `start <= greenfield < expired`
//!
//! 已完成（带 `completed_at`）但尚未归档的任务不计入运行中与已过期。

use serde_json::Value;

use scheduler_core::{
    models::{fields, row_i64, Comparison, Labourer, Query, Row, SortOrder},
    SchedulerError, SchedulerResult,
};

use crate::task_manager::TaskManager;

/// 某一时刻的队列分区边界
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreenfieldWindow {
    pub start: i64,
    pub invoked: i64,
    pub expired: i64,
}

impl GreenfieldWindow {
    /// 根据当前时间计算窗口
    pub fn compute(now: i64, invocation_delta: i64, labourer: &Labourer) -> Self {
        let invoked = now + invocation_delta;
        Self {
            start: now,
            invoked,
            expired: invoked - labourer.duration - labourer.cooldown,
        }
    }

    /// 已注册的 Labourer 使用注册时的窗口
    pub fn of_registered(labourer: &Labourer) -> Option<Self> {
        labourer.cycle().map(|c| Self {
            start: c.start,
            invoked: c.invoked,
            expired: c.expired,
        })
    }

    pub fn is_queued(&self, greenfield: i64) -> bool {
        greenfield < self.start
    }

    pub fn is_running(&self, greenfield: i64) -> bool {
        greenfield >= self.expired
    }

    pub fn is_expired(&self, greenfield: i64) -> bool {
        self.start <= greenfield && greenfield < self.expired
    }
}

impl TaskManager {
    /// 未注册时排队边界退化为当前时间
    fn queue_start(&self, labourer: &Labourer) -> i64 {
        labourer.start().unwrap_or_else(|| self.clock.now())
    }

    fn registered_window(&self, labourer: &Labourer) -> SchedulerResult<GreenfieldWindow> {
        GreenfieldWindow::of_registered(labourer).ok_or_else(|| {
            SchedulerError::LabourerNotRegistered {
                id: labourer.id.clone(),
            }
        })
    }

    /// 未注册时按当前时间计算窗口，供健康评估使用
    pub(crate) fn window_for(&self, labourer: &Labourer) -> GreenfieldWindow {
        GreenfieldWindow::of_registered(labourer).unwrap_or_else(|| {
            GreenfieldWindow::compute(
                self.clock.now(),
                self.config.greenfield_invocation_delta,
                labourer,
            )
        })
    }

    fn labourer_query(&self, labourer: &Labourer) -> Query {
        Query::new().where_eq(self.fields.labourer_id(), labourer.id.clone())
    }

    fn queued_query(&self, labourer: &Labourer) -> Query {
        self.labourer_query(labourer).filter(
            self.fields.greenfield(),
            Comparison::Lt(Value::from(self.queue_start(labourer))),
        )
    }

    fn open_query(&self, labourer: &Labourer) -> Query {
        self.labourer_query(labourer).filter(
            self.fields.resolve(fields::COMPLETED_AT),
            Comparison::NotExists,
        )
    }

    fn running_query(&self, window: GreenfieldWindow, labourer: &Labourer) -> Query {
        self.open_query(labourer).filter(
            self.fields.greenfield(),
            Comparison::Ge(Value::from(window.expired)),
        )
    }

    async fn edge_greenfield(&self, labourer: &Labourer, order: SortOrder) -> SchedulerResult<i64> {
        let query = self
            .queued_query(labourer)
            .sort_by(self.fields.greenfield(), order)
            .max_items(1);
        let rows = self.store.query(&self.config.tables.tasks, &query).await?;

        Ok(rows
            .first()
            .and_then(|row| row_i64(row, self.fields.greenfield()))
            .unwrap_or(self.config.greenfield_task_step))
    }

    /// 排队任务中最小的 greenfield，没有排队任务时返回步长
    pub async fn get_oldest_greenfield_for_labourer(
        &self,
        labourer: &Labourer,
    ) -> SchedulerResult<i64> {
        self.edge_greenfield(labourer, SortOrder::Ascending).await
    }

    /// 排队任务中最大的 greenfield，没有排队任务时返回步长
    pub async fn get_newest_greenfield_for_labourer(
        &self,
        labourer: &Labourer,
    ) -> SchedulerResult<i64> {
        self.edge_greenfield(labourer, SortOrder::Descending).await
    }

    /// 按 greenfield 升序取出下一批排队任务
    pub async fn get_next_for_labourer(
        &self,
        labourer: &Labourer,
        count: usize,
    ) -> SchedulerResult<Vec<Row>> {
        let query = self
            .queued_query(labourer)
            .sort_by(self.fields.greenfield(), SortOrder::Ascending)
            .max_items(count);
        let mut rows = self.store.query(&self.config.tables.tasks, &query).await?;
        rows.truncate(count);
        Ok(rows)
    }

    pub async fn get_length_of_queue_for_labourer(
        &self,
        labourer: &Labourer,
    ) -> SchedulerResult<u64> {
        self.store
            .count(&self.config.tables.tasks, &self.queued_query(labourer))
            .await
    }

    /// 只查询数量，不读取任务内容
    pub async fn get_count_of_running_tasks_for_labourer(
        &self,
        labourer: &Labourer,
    ) -> SchedulerResult<u64> {
        let window = self.registered_window(labourer)?;
        self.store
            .count(&self.config.tables.tasks, &self.running_query(window, labourer))
            .await
    }

    pub async fn get_running_tasks_for_labourer(
        &self,
        labourer: &Labourer,
    ) -> SchedulerResult<Vec<Row>> {
        let window = self.registered_window(labourer)?;
        self.store
            .query(&self.config.tables.tasks, &self.running_query(window, labourer))
            .await
    }

    /// 已调用、未关闭且超过预期时长的任务
    pub async fn get_expired_tasks_for_labourer(
        &self,
        labourer: &Labourer,
    ) -> SchedulerResult<Vec<Row>> {
        let window = self.registered_window(labourer)?;
        let query = self
            .open_query(labourer)
            .filter(
                self.fields.greenfield(),
                Comparison::Ge(Value::from(window.start)),
            )
            .filter(
                self.fields.greenfield(),
                Comparison::Lt(Value::from(window.expired)),
            )
            .sort_by(self.fields.greenfield(), SortOrder::Ascending);

        self.store.query(&self.config.tables.tasks, &query).await
    }

    /// 已标记完成、仍留在活动表中等待归档的任务
    pub async fn get_completed_tasks_for_labourer(
        &self,
        labourer: &Labourer,
    ) -> SchedulerResult<Vec<Row>> {
        let query = self
            .labourer_query(labourer)
            .filter(self.fields.resolve(fields::COMPLETED_AT), Comparison::Exists);
        self.store.query(&self.config.tables.tasks, &query).await
    }

    /// 健康评估使用的运行中任务数，未注册时按当前时间计算窗口
    pub(crate) async fn count_running_in_window(
        &self,
        labourer: &Labourer,
    ) -> SchedulerResult<u64> {
        let window = self.window_for(labourer);
        self.store
            .count(&self.config.tables.tasks, &self.running_query(window, labourer))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::models::LabourerCycle;

    #[test]
    fn test_window_partitions() {
        let mut labourer = Labourer::new("some_function", "arn");
        labourer.duration = 300;
        labourer.cooldown = 60;

        let window = GreenfieldWindow::compute(1_000, 10_000, &labourer);
        assert_eq!(window.invoked, 11_000);
        assert_eq!(window.expired, 11_000 - 360);

        assert!(window.is_queued(999));
        assert!(!window.is_queued(1_000));
        assert!(window.is_expired(1_000));
        assert!(window.is_expired(window.expired - 1));
        assert!(window.is_running(window.expired));
        assert!(window.is_running(window.invoked));
    }

    #[test]
    fn test_partitions_are_disjoint() {
        let labourer = Labourer::new("some_function", "arn");
        let window = GreenfieldWindow::compute(5_000, 31_557_600, &labourer);

        for greenfield in [0, 4_999, 5_000, window.expired - 1, window.expired, window.invoked] {
            let hits = [
                window.is_queued(greenfield),
                window.is_running(greenfield),
                window.is_expired(greenfield),
            ]
            .iter()
            .filter(|hit| **hit)
            .count();
            assert_eq!(hits, 1, "greenfield {greenfield}");
        }
    }

    #[test]
    fn test_registered_window() {
        let labourer = Labourer::new("some_function", "arn").with_cycle(LabourerCycle {
            start: 10,
            invoked: 110,
            expired: 50,
            health: 4,
            max_attempts: 3,
        });
        let window = GreenfieldWindow::of_registered(&labourer).unwrap();
        assert_eq!(window.start, 10);
        assert_eq!(window.expired, 50);

        assert!(GreenfieldWindow::of_registered(&Labourer::new("x", "arn")).is_none());
    }
}
