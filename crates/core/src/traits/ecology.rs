use std::sync::Weak;

use async_trait::async_trait;

use crate::models::Labourer;
use crate::SchedulerResult;

/// 任务队列的只读视图，供健康评估反向查询
#[async_trait]
pub trait TaskQueueInspector: Send + Sync {
    /// 正在运行的任务数
    async fn count_running_tasks(&self, labourer: &Labourer) -> SchedulerResult<u64>;

    /// 排队中的任务数
    async fn count_queued_tasks(&self, labourer: &Labourer) -> SchedulerResult<u64>;
}

/// 健康状态提供者
#[async_trait]
pub trait EcologyClient: Send + Sync {
    /// 返回 Labourer 的健康状态码（见 [`crate::models::EcoStatus`]）
    async fn get_labourer_status(&self, labourer: &Labourer) -> SchedulerResult<i32>;

    /// 登记任务管理器，之后可以通过它查询队列情况
    fn register_task_manager(&self, manager: Weak<dyn TaskQueueInspector>);
}
