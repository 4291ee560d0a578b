use async_trait::async_trait;

use crate::SchedulerResult;

/// 远程调用接口
///
/// 调用是“发出即忘”的：实现只负责把请求交给传输层，
/// 不等待被调用的工作完成，也不返回执行结果。
#[async_trait]
pub trait LabourerInvoker: Send + Sync {
    async fn invoke(&self, function_identifier: &str, payload: Vec<u8>) -> SchedulerResult<()>;
}
