//! 执行时长估算
//!
//! 关闭任务的实际时长为 `completed_at - (greenfield - invocation_delta)`，
//! 失败任务的每次尝试按 `max_duration` 计入，以此惩罚不稳定的 Labourer。

use serde_json::Value;

use scheduler_core::{
    models::{fields, row_i64, ClosedTaskStatus, Comparison, Labourer, Query, Row},
    SchedulerResult,
};

use crate::task_manager::TaskManager;
use crate::task_store::FieldMap;

/// 根据历史任务计算平均时长，没有历史时返回 `max_duration`
pub fn average_duration(
    closed: &[Row],
    failed: &[Row],
    field_map: &FieldMap,
    invocation_delta: i64,
    max_duration: i64,
) -> i64 {
    let completed_at_field = field_map.resolve(fields::COMPLETED_AT);

    let mut total: i64 = 0;
    let mut count: i64 = 0;
    for task in closed {
        let completed_at = row_i64(task, completed_at_field);
        let greenfield = row_i64(task, field_map.greenfield());
        if let (Some(completed_at), Some(greenfield)) = (completed_at, greenfield) {
            total += completed_at - (greenfield - invocation_delta);
            count += 1;
        }
    }

    let failed_attempts: i64 = failed
        .iter()
        .map(|task| row_i64(task, field_map.attempts()).unwrap_or(0))
        .sum();
    total += failed_attempts * max_duration;
    count += failed_attempts;

    if count == 0 {
        return max_duration;
    }
    (total as f64 / count as f64).round_ties_even() as i64
}

impl TaskManager {
    fn closed_with_status_query(&self, labourer: &Labourer, status: ClosedTaskStatus) -> Query {
        let since = self.clock.now() - self.config.duration_history_seconds;
        Query::new()
            .where_eq(
                self.fields.resolve(fields::LABOURER_ID_TASK_STATUS),
                status.composite(&labourer.id),
            )
            .filter(
                self.fields.resolve(fields::CLOSED_AT),
                Comparison::Ge(Value::from(since)),
            )
    }

    /// 历史窗口内成功关闭的任务
    pub async fn get_closed_tasks_for_labourer(
        &self,
        labourer: &Labourer,
    ) -> SchedulerResult<Vec<Row>> {
        let query = self.closed_with_status_query(labourer, ClosedTaskStatus::Completed);
        self.store
            .query(&self.config.tables.closed_tasks, &query)
            .await
    }

    /// 历史窗口内失败归档的任务
    pub async fn get_failed_tasks_for_labourer(
        &self,
        labourer: &Labourer,
    ) -> SchedulerResult<Vec<Row>> {
        let query = self.closed_with_status_query(labourer, ClosedTaskStatus::Failed);
        self.store
            .query(&self.config.tables.closed_tasks, &query)
            .await
    }

    pub async fn get_average_labourer_duration(&self, labourer: &Labourer) -> SchedulerResult<i64> {
        let closed = self.get_closed_tasks_for_labourer(labourer).await?;
        let failed = self.get_failed_tasks_for_labourer(labourer).await?;

        Ok(average_duration(
            &closed,
            &failed,
            &self.fields,
            self.config.greenfield_invocation_delta,
            labourer.max_duration,
        ))
    }

    pub fn get_max_labourer_duration(&self, labourer: &Labourer) -> i64 {
        labourer.max_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    const DELTA: i64 = 31_557_600;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn closed_task(started: i64, completed: i64) -> Row {
        row(json!({"greenfield": started + DELTA, "completed_at": completed}))
    }

    #[test]
    fn test_average_duration_mixed_history() {
        let fields = FieldMap::default();
        let closed = vec![
            closed_task(1000, 1500),
            closed_task(2000, 2300),
            closed_task(3000, 3300),
        ];
        let failed = vec![
            row(json!({"attempts": 3})),
            row(json!({"attempts": 4})),
            row(json!({"attempts": 3})),
        ];

        // (500 + 300 + 300 + 10 * 900) / 13
        assert_eq!(average_duration(&closed, &failed, &fields, DELTA, 900), 777);
    }

    #[test]
    fn test_average_duration_without_history() {
        let fields = FieldMap::default();
        assert_eq!(average_duration(&[], &[], &fields, DELTA, 900), 900);
    }

    #[test]
    fn test_average_duration_only_closed() {
        let fields = FieldMap::default();
        let closed = vec![closed_task(0, 100), closed_task(0, 200)];
        assert_eq!(average_duration(&closed, &[], &fields, DELTA, 900), 150);
    }

    #[test]
    fn test_average_duration_uses_field_names() {
        let mut mapping = HashMap::new();
        mapping.insert("completed_at".to_string(), "done".to_string());
        let fields = FieldMap::new(&mapping);
        let closed = vec![row(json!({"greenfield": DELTA, "done": 60}))];

        assert_eq!(average_duration(&closed, &[], &fields, DELTA, 900), 60);
    }
}
