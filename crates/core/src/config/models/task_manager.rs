use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{fields, DEFAULT_MAX_ATTEMPTS};

/// 任务管理器配置
///
/// # 字段说明
///
/// - `greenfield_task_step`: 相邻排队任务之间的 greenfield 间隔
/// - `greenfield_invocation_delta`: 被调用任务的 greenfield 相对当前时间的偏移
/// - `max_attempts`: 未单独配置时的最大尝试次数
/// - `duration_history_seconds`: 估算平均时长时回看的归档历史窗口
/// - `tables`: 活动/归档/重试三张表的表名
/// - `required_fields`: 任务必填的逻辑字段
/// - `field_names`: 逻辑字段名到物理列名的映射，未映射的字段原样使用
/// - `labourers`: Labourer 静态配置，键为 Labourer ID
/// - `retry`: 重试延迟策略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskManagerConfig {
    pub greenfield_task_step: i64,
    pub greenfield_invocation_delta: i64,
    pub max_attempts: u32,
    pub duration_history_seconds: i64,
    pub tables: TableNames,
    pub required_fields: Vec<String>,
    pub field_names: HashMap<String, String>,
    pub labourers: BTreeMap<String, Map<String, Value>>,
    pub retry: RetryConfig,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            greenfield_task_step: 1000,
            greenfield_invocation_delta: 31_557_600, // 一年
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            duration_history_seconds: 3600,
            tables: TableNames::default(),
            required_fields: vec![
                fields::TASK_ID.to_string(),
                fields::LABOURER_ID.to_string(),
                fields::CREATED_AT.to_string(),
            ],
            field_names: HashMap::new(),
            labourers: BTreeMap::new(),
            retry: RetryConfig::default(),
        }
    }
}

impl TaskManagerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.greenfield_task_step <= 0 {
            return Err(anyhow::anyhow!("greenfield_task_step必须大于0"));
        }

        if self.greenfield_invocation_delta <= 0 {
            return Err(anyhow::anyhow!("greenfield_invocation_delta必须大于0"));
        }

        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }

        if self.duration_history_seconds <= 0 {
            return Err(anyhow::anyhow!("时长历史窗口必须大于0"));
        }

        if self.required_fields.is_empty() {
            return Err(anyhow::anyhow!("必填字段列表不能为空"));
        }

        self.tables.validate()?;
        self.retry.validate()?;

        for (id, attrs) in &self.labourers {
            if id.is_empty() {
                return Err(anyhow::anyhow!("Labourer ID不能为空"));
            }
            if let Some(max_attempts) = attrs.get("max_attempts") {
                if max_attempts.as_u64().unwrap_or(0) == 0 {
                    return Err(anyhow::anyhow!(
                        "Labourer {} 的最大尝试次数必须是正整数",
                        id
                    ));
                }
            }
        }

        Ok(())
    }
}

/// 三张任务表的表名
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TableNames {
    pub tasks: String,
    pub closed_tasks: String,
    pub retry_tasks: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            tasks: "tasks".to_string(),
            closed_tasks: "closed_tasks".to_string(),
            retry_tasks: "retry_tasks".to_string(),
        }
    }
}

impl TableNames {
    pub fn validate(&self) -> anyhow::Result<()> {
        let names = [&self.tasks, &self.closed_tasks, &self.retry_tasks];
        if names.iter().any(|n| n.is_empty()) {
            return Err(anyhow::anyhow!("表名不能为空"));
        }
        if self.tasks == self.closed_tasks
            || self.tasks == self.retry_tasks
            || self.closed_tasks == self.retry_tasks
        {
            return Err(anyhow::anyhow!("活动表、归档表和重试表必须互不相同"));
        }
        Ok(())
    }
}

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 基础重试间隔（秒）
    pub base_interval_seconds: u64,
    /// 最大重试间隔（秒）
    pub max_interval_seconds: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_interval_seconds: 60,  // 1分钟
            max_interval_seconds: 3600, // 1小时
            backoff_multiplier: 2.0,    // 指数退避倍数
            jitter_factor: 0.1,         // 10%的随机抖动
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_interval_seconds == 0 {
            return Err(anyhow::anyhow!("基础重试间隔必须大于0"));
        }
        if self.max_interval_seconds < self.base_interval_seconds {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础重试间隔"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动系数必须在0.0到1.0之间"));
        }
        Ok(())
    }
}
