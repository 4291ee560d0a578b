//! 任务调度核心
//!
//! 负责 Labourer 注册、基于 greenfield 的任务排队、
//! 条件写入保证的单次调用、重试与归档，以及时长和健康评估。

pub mod duration_estimator;
pub mod ecology;
pub mod greenfield;
pub mod labourer_registry;
pub mod retry_service;
pub mod scheduler;
pub mod stats;
pub mod task_manager;
pub mod task_store;

pub use ecology::CapacityEcology;
pub use greenfield::GreenfieldWindow;
pub use labourer_registry::LabourerRegistry;
pub use retry_service::RetryPolicy;
pub use scheduler::{CycleReport, TaskScheduler};
pub use stats::{StatsSnapshot, TaskManagerStats};
pub use task_manager::{InvocationClaim, InvocationOutcome, TaskManager};
pub use task_store::{construct_payload, jsonify_payload, FieldMap};
