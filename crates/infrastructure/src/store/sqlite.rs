//! SQLite 表存储
//!
//! 所有逻辑表共用一张物理表 `table_rows`，行以 JSON 文本保存在 `body` 列，
//! 查询条件通过 `json_extract` 翻译为 SQL。条件更新采用比较并交换：
//! 只有在 `body` 仍等于读取时的内容时才写入。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use scheduler_core::{
    config::DatabaseConfig,
    models::{Comparison, Condition, ConditionalWrite, Query, Row, SortOrder, UpdateRequest},
    traits::TableStore,
    SchedulerError, SchedulerResult,
};

use super::row_key;

/// 比较并交换失败后重新读取的最大次数
const MAX_CAS_ATTEMPTS: usize = 8;

pub struct SqliteTableStore {
    pool: SqlitePool,
    hash_key: String,
}

impl SqliteTableStore {
    pub fn new(pool: SqlitePool, hash_key: impl Into<String>) -> Self {
        Self {
            pool,
            hash_key: hash_key.into(),
        }
    }

    /// 按配置创建连接池并初始化表结构
    pub async fn connect(config: &DatabaseConfig, hash_key: &str) -> SchedulerResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        let store = Self::new(pool, hash_key);
        store.migrate().await?;
        info!("SQLite 表存储已就绪");
        Ok(store)
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS table_rows (
                table_name TEXT NOT NULL,
                row_key TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (table_name, row_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn read_body(&self, table: &str, key: &str) -> SchedulerResult<Option<String>> {
        let body = sqlx::query_scalar::<_, String>(
            "SELECT body FROM table_rows WHERE table_name = ? AND row_key = ?",
        )
        .bind(table)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(body)
    }

    fn filtered<'a>(select: &str, table: &'a str, query: &Query) -> QueryBuilder<'a, Sqlite> {
        let mut builder = QueryBuilder::new(select);
        builder.push(" FROM table_rows WHERE table_name = ");
        builder.push_bind(table);
        for condition in &query.conditions {
            push_condition(&mut builder, condition);
        }
        builder
    }
}

/// `$."field"` 形式的 JSON 路径
fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

fn push_value(builder: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => {
                builder.push_bind(i);
            }
            None => {
                builder.push_bind(n.as_f64().unwrap_or_default());
            }
        },
        Value::String(s) => {
            builder.push_bind(s.clone());
        }
        Value::Bool(b) => {
            builder.push_bind(*b);
        }
        Value::Null => {
            builder.push("NULL");
        }
        other => {
            builder.push_bind(other.to_string());
        }
    }
}

fn push_condition(builder: &mut QueryBuilder<'_, Sqlite>, condition: &Condition) {
    let path = json_path(&condition.field);
    match &condition.comparison {
        Comparison::Exists => {
            builder.push(" AND json_type(body, ");
            builder.push_bind(path);
            builder.push(") IS NOT NULL");
        }
        Comparison::NotExists => {
            builder.push(" AND json_type(body, ");
            builder.push_bind(path);
            builder.push(") IS NULL");
        }
        Comparison::Between(low, high) => {
            builder.push(" AND json_extract(body, ");
            builder.push_bind(path);
            builder.push(") BETWEEN ");
            push_value(builder, low);
            builder.push(" AND ");
            push_value(builder, high);
        }
        Comparison::Eq(value)
        | Comparison::Lt(value)
        | Comparison::Le(value)
        | Comparison::Gt(value)
        | Comparison::Ge(value) => {
            builder.push(" AND json_extract(body, ");
            builder.push_bind(path);
            builder.push(") ");
            builder.push(condition.comparison.operator());
            builder.push(" ");
            push_value(builder, value);
        }
    }
}

fn parse_row(body: &str) -> SchedulerResult<Row> {
    Ok(serde_json::from_str::<Row>(body)?)
}

#[async_trait]
impl TableStore for SqliteTableStore {
    async fn put(&self, table: &str, row: &Row) -> SchedulerResult<()> {
        let key = row_key(row, &self.hash_key)?;
        let body = serde_json::to_string(row)?;

        sqlx::query(
            r#"
            INSERT INTO table_rows (table_name, row_key, body) VALUES (?, ?, ?)
            ON CONFLICT(table_name, row_key) DO UPDATE SET body = excluded.body
            "#,
        )
        .bind(table)
        .bind(&key)
        .bind(&body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        request: &UpdateRequest,
    ) -> SchedulerResult<ConditionalWrite> {
        let key = row_key(&request.key, &self.hash_key)?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current_body = self.read_body(table, &key).await?;
            let current = current_body.as_deref().map(parse_row).transpose()?;
            if !request.preconditions_hold(current.as_ref()) {
                debug!("表 {} 中 {} 的前置条件不满足", table, key);
                return Ok(ConditionalWrite::PreconditionFailed);
            }

            let new_body = serde_json::to_string(&request.apply(current))?;
            let affected = match &current_body {
                Some(old_body) => sqlx::query(
                    "UPDATE table_rows SET body = ? WHERE table_name = ? AND row_key = ? AND body = ?",
                )
                .bind(&new_body)
                .bind(table)
                .bind(&key)
                .bind(old_body)
                .execute(&self.pool)
                .await?
                .rows_affected(),
                None => sqlx::query(
                    r#"
                    INSERT INTO table_rows (table_name, row_key, body) VALUES (?, ?, ?)
                    ON CONFLICT(table_name, row_key) DO NOTHING
                    "#,
                )
                .bind(table)
                .bind(&key)
                .bind(&new_body)
                .execute(&self.pool)
                .await?
                .rows_affected(),
            };

            if affected == 1 {
                return Ok(ConditionalWrite::Applied);
            }
            debug!("表 {} 中 {} 被并发修改，重新读取", table, key);
        }

        Err(SchedulerError::DatabaseOperation(format!(
            "表 {table} 中 {key} 的条件更新连续冲突 {MAX_CAS_ATTEMPTS} 次"
        )))
    }

    async fn delete(&self, table: &str, key: &Row) -> SchedulerResult<()> {
        let key = row_key(key, &self.hash_key)?;
        sqlx::query("DELETE FROM table_rows WHERE table_name = ? AND row_key = ?")
            .bind(table)
            .bind(&key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(&self, table: &str, query: &Query) -> SchedulerResult<Vec<Row>> {
        let mut builder = Self::filtered("SELECT body", table, query);

        if let Some(field) = &query.sort_by {
            builder.push(" ORDER BY json_extract(body, ");
            builder.push_bind(json_path(field));
            builder.push(match query.order {
                SortOrder::Ascending => ") ASC",
                SortOrder::Descending => ") DESC",
            });
        }
        if let Some(max_items) = query.max_items {
            builder.push(" LIMIT ");
            builder.push_bind(max_items as i64);
        }

        let bodies = builder
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?;
        bodies.iter().map(|body| parse_row(body)).collect()
    }

    async fn count(&self, table: &str, query: &Query) -> SchedulerResult<u64> {
        let mut builder = Self::filtered("SELECT COUNT(*)", table, query);
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
