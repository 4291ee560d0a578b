//! 表存储实现
//!
//! - [`InMemoryTableStore`]: 单进程内存存储，适用于嵌入式部署与测试
//! - [`SqliteTableStore`]: 基于 SQLite 的持久化存储
//!
//! 两者的每张表都只以一个哈希主键字段标识行。

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryTableStore;
pub use sqlite::SqliteTableStore;

use serde_json::Value;

use scheduler_core::{models::Row, SchedulerError, SchedulerResult};

/// 从行中取出主键的字符串形式
pub(crate) fn row_key(row: &Row, hash_key: &str) -> SchedulerResult<String> {
    match row.get(hash_key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(SchedulerError::InvalidArgument(format!(
            "主键字段 {hash_key} 的类型不受支持: {other}"
        ))),
        None => Err(SchedulerError::InvalidArgument(format!(
            "缺少主键字段 {hash_key}"
        ))),
    }
}
