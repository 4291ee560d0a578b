use thiserror::Error;

/// 调度器错误类型定义
///
/// 条件写入失败（并发调用同一任务）不属于错误，
/// 由 [`crate::models::ConditionalWrite::PreconditionFailed`] 表示。
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("无效的参数: {0}")]
    InvalidArgument(String),

    #[error("无效的任务负载: {0}")]
    InvalidPayload(String),

    #[error("无效的任务: {0}")]
    InvalidTask(String),

    #[error("任务未找到: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Labourer未找到: {id}")]
    LabourerNotFound { id: String },

    #[error("Labourer尚未注册: {id}")]
    LabourerNotRegistered { id: String },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}
