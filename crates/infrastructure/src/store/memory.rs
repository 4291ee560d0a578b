use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use scheduler_core::{
    models::{ConditionalWrite, Query, Row, UpdateRequest},
    traits::TableStore,
    SchedulerResult,
};

use super::row_key;

/// 内存表存储
///
/// 条件更新在写锁内完成检查与写入，因此对同一进程内的
/// 多个任务管理器同样是原子的。克隆共享同一份数据。
#[derive(Debug, Clone)]
pub struct InMemoryTableStore {
    hash_key: String,
    tables: Arc<RwLock<HashMap<String, BTreeMap<String, Row>>>>,
}

impl InMemoryTableStore {
    pub fn new(hash_key: impl Into<String>) -> Self {
        Self {
            hash_key: hash_key.into(),
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 表中全部行（按主键排序）
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn put(&self, table: &str, row: &Row) -> SchedulerResult<()> {
        let key = row_key(row, &self.hash_key)?;
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(key, row.clone());
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        request: &UpdateRequest,
    ) -> SchedulerResult<ConditionalWrite> {
        let key = row_key(&request.key, &self.hash_key)?;
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();

        let current = rows.get(&key);
        if !request.preconditions_hold(current) {
            debug!("表 {} 中 {} 的前置条件不满足", table, key);
            return Ok(ConditionalWrite::PreconditionFailed);
        }

        let updated = request.apply(current.cloned());
        rows.insert(key, updated);
        Ok(ConditionalWrite::Applied)
    }

    async fn delete(&self, table: &str, key: &Row) -> SchedulerResult<()> {
        let key = row_key(key, &self.hash_key)?;
        if let Some(rows) = self.tables.write().await.get_mut(table) {
            rows.remove(&key);
        }
        Ok(())
    }

    async fn query(&self, table: &str, query: &Query) -> SchedulerResult<Vec<Row>> {
        let tables = self.tables.read().await;
        let rows = tables
            .get(table)
            .map(|rows| query.apply(rows.values().cloned()))
            .unwrap_or_default();
        Ok(rows)
    }

    async fn count(&self, table: &str, query: &Query) -> SchedulerResult<u64> {
        let tables = self.tables.read().await;
        let count = tables
            .get(table)
            .map(|rows| rows.values().filter(|row| query.matches(row)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }
}
