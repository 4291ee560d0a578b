use async_trait::async_trait;

use crate::models::{ConditionalWrite, Query, Row, UpdateRequest};
use crate::SchedulerResult;

/// 表存储接口
///
/// 抽象了任务所需的键值存储能力：整行写入、原子条件更新、
/// 按主键删除以及范围查询。所有实现都必须保证 `update`
/// 的条件检查与写入是一次原子操作，这是多个调度实例之间
/// 唯一的互斥手段。
///
/// # 线程安全
///
/// 此trait要求实现 `Send + Sync`，以便在多个调度任务之间共享。
#[async_trait]
pub trait TableStore: Send + Sync {
    /// 写入整行（主键相同则覆盖）
    async fn put(&self, table: &str, row: &Row) -> SchedulerResult<()>;

    /// 条件更新
    ///
    /// 前置条件不满足时返回 [`ConditionalWrite::PreconditionFailed`]，
    /// 其他失败（连接、序列化等）通过 `Err` 返回。
    async fn update(&self, table: &str, request: &UpdateRequest)
        -> SchedulerResult<ConditionalWrite>;

    /// 按主键删除，行不存在时不报错
    async fn delete(&self, table: &str, key: &Row) -> SchedulerResult<()>;

    /// 范围查询
    async fn query(&self, table: &str, query: &Query) -> SchedulerResult<Vec<Row>>;

    /// 仅返回匹配的行数，不物化数据行
    async fn count(&self, table: &str, query: &Query) -> SchedulerResult<u64>;
}
