//! 任务生命周期管理
//!
//! 任务在三张表之间移动：活动表、重试表与关闭表。
//! 多个调度进程之间没有共享内存，唯一的互斥点是
//! [`TaskManager::mark_task_invoked`] 的条件更新。

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use scheduler_core::{
    config::TaskManagerConfig,
    models::{
        fields, row_string, ClosedTaskStatus, Comparison, Condition, ConditionalWrite, Labourer,
        Query, Row, SortOrder, UpdateRequest,
    },
    traits::{Clock, EcologyClient, LabourerInvoker, SystemClock, TableStore, TaskQueueInspector},
    SchedulerError, SchedulerResult,
};

use crate::labourer_registry::LabourerRegistry;
use crate::stats::{StatsSnapshot, TaskManagerStats};
use crate::task_store::{construct_payload, jsonify_payload, payload_bytes, FieldMap};

/// `mark_task_invoked` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationClaim {
    /// 本实例取得了调用权
    Claimed,
    /// 其他实例已经抢先调用
    AlreadyClaimed,
}

/// `invoke_task` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Invoked { task_id: String },
    /// 并发调用被跳过，没有发出任何请求
    Skipped { task_id: String },
}

impl InvocationOutcome {
    pub fn task_id(&self) -> &str {
        match self {
            InvocationOutcome::Invoked { task_id } | InvocationOutcome::Skipped { task_id } => {
                task_id
            }
        }
    }

    pub fn is_invoked(&self) -> bool {
        matches!(self, InvocationOutcome::Invoked { .. })
    }
}

/// 任务管理器
pub struct TaskManager {
    pub(crate) store: Arc<dyn TableStore>,
    invoker: Arc<dyn LabourerInvoker>,
    ecology: Arc<dyn EcologyClient>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: TaskManagerConfig,
    pub(crate) fields: FieldMap,
    required_fields: Vec<String>,
    registry: LabourerRegistry,
    registered: RwLock<HashMap<String, Labourer>>,
    stats: TaskManagerStats,
}

impl TaskManager {
    pub fn new(
        config: TaskManagerConfig,
        store: Arc<dyn TableStore>,
        invoker: Arc<dyn LabourerInvoker>,
        ecology: Arc<dyn EcologyClient>,
    ) -> SchedulerResult<Self> {
        let fields = FieldMap::new(&config.field_names);
        let required_fields = config
            .required_fields
            .iter()
            .map(|name| fields.resolve(name).to_string())
            .collect();
        let registry = LabourerRegistry::from_config(&config)?;

        Ok(Self {
            store,
            invoker,
            ecology,
            clock: Arc::new(SystemClock),
            config,
            fields,
            required_fields,
            registry,
            registered: RwLock::new(HashMap::new()),
            stats: TaskManagerStats::default(),
        })
    }

    /// 替换时间来源
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    pub fn field_map(&self) -> &FieldMap {
        &self.fields
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ---------------------------------------------------------------
    // Labourer
    // ---------------------------------------------------------------

    /// 静态配置中的 Labourer，按 id 排序
    pub fn get_labourers(&self) -> Vec<Labourer> {
        self.registry.labourers()
    }

    /// 计算本周期的动态属性，并向健康状态提供者登记自身
    pub async fn register_labourers(self: &Arc<Self>) -> SchedulerResult<Vec<Labourer>> {
        let weak: Weak<TaskManager> = Arc::downgrade(self);
        let inspector: Weak<dyn TaskQueueInspector> = weak;
        self.ecology.register_task_manager(inspector);

        let labourers = self
            .registry
            .register(self.clock.as_ref(), self.ecology.as_ref())
            .await?;

        {
            let mut registered = self
                .registered
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            registered.clear();
            for labourer in &labourers {
                registered.insert(labourer.id.clone(), labourer.clone());
            }
        }

        info!("已注册 {} 个 Labourer", labourers.len());
        Ok(labourers)
    }

    /// 按 id 获取 Labourer，优先返回最近一次注册的结果
    pub fn get_labourer(&self, id: &str) -> SchedulerResult<Labourer> {
        let registered = self
            .registered
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(labourer) = registered.get(id) {
            return Ok(labourer.clone());
        }

        self.registry
            .find(id)
            .cloned()
            .ok_or_else(|| SchedulerError::LabourerNotFound { id: id.to_string() })
    }

    // ---------------------------------------------------------------
    // 任务
    // ---------------------------------------------------------------

    fn task_key(&self, task_id: Value) -> Row {
        let mut key = Row::new();
        key.insert(self.fields.task_id().to_string(), task_id);
        key
    }

    fn task_id_of(&self, task: &Row) -> SchedulerResult<String> {
        row_string(task, self.fields.task_id()).ok_or_else(|| {
            SchedulerError::InvalidTask(format!("任务缺少字段 {}", self.fields.task_id()))
        })
    }

    /// 检查必填字段是否齐全
    pub fn is_valid_task(&self, task: &Row) -> bool {
        self.required_fields
            .iter()
            .all(|field| matches!(task.get(field), Some(value) if !value.is_null()))
    }

    /// 创建任务并放入队尾
    pub async fn create_task(
        &self,
        labourer: &Labourer,
        payload: Option<Value>,
        extra: Row,
    ) -> SchedulerResult<Row> {
        let task_id = Uuid::new_v4().to_string();
        self.create_task_with_id(labourer, &task_id, payload, extra)
            .await
    }

    /// 使用调用方提供的 task_id 创建任务
    pub async fn create_task_with_id(
        &self,
        labourer: &Labourer,
        task_id: &str,
        payload: Option<Value>,
        extra: Row,
    ) -> SchedulerResult<Row> {
        let payload = construct_payload(payload.as_ref(), &extra)?;
        let newest = self.get_newest_greenfield_for_labourer(labourer).await?;
        let now = self.clock.now();

        let mut task = Row::new();
        task.insert(self.fields.task_id().to_string(), Value::from(task_id));
        task.insert(
            self.fields.labourer_id().to_string(),
            Value::from(labourer.id.clone()),
        );
        task.insert(
            self.fields.resolve(fields::CREATED_AT).to_string(),
            Value::from(now),
        );
        task.insert(
            self.fields.greenfield().to_string(),
            Value::from(newest + self.config.greenfield_task_step),
        );
        task.insert(self.fields.attempts().to_string(), Value::from(0));
        task.insert(self.fields.payload().to_string(), Value::from(payload));

        if !self.is_valid_task(&task) {
            return Err(SchedulerError::InvalidTask(format!(
                "任务 {task_id} 缺少必填字段"
            )));
        }

        self.store.put(&self.config.tables.tasks, &task).await?;
        self.stats.record_created();
        debug!("为 Labourer {} 创建任务 {}", labourer.id, task_id);

        Ok(task)
    }

    /// 按 id 读取活动表中的任务
    pub async fn get_task_by_id(
        &self,
        task_id: &str,
        labourer_id: Option<&str>,
    ) -> SchedulerResult<Option<Row>> {
        let mut query = Query::new().where_eq(self.fields.task_id(), task_id);
        if let Some(labourer_id) = labourer_id {
            query = query.where_eq(self.fields.labourer_id(), labourer_id);
        }

        let rows = self
            .store
            .query(&self.config.tables.tasks, &query.max_items(1))
            .await?;
        Ok(rows.into_iter().next())
    }

    /// 调用任务，`task_id` 与 `task` 必须且只能提供一个
    pub async fn invoke_task(
        &self,
        labourer: &Labourer,
        task_id: Option<&str>,
        task: Option<Row>,
    ) -> SchedulerResult<InvocationOutcome> {
        let task = match (task_id, task) {
            (Some(_), Some(_)) => {
                return Err(SchedulerError::InvalidArgument(
                    "task_id 与 task 不能同时提供".to_string(),
                ))
            }
            (None, None) => {
                return Err(SchedulerError::InvalidArgument(
                    "必须提供 task_id 或 task".to_string(),
                ))
            }
            (Some(task_id), None) => self
                .get_task_by_id(task_id, Some(&labourer.id))
                .await?
                .ok_or_else(|| SchedulerError::TaskNotFound {
                    task_id: task_id.to_string(),
                })?,
            (None, Some(task)) => task,
        };

        if !self.is_valid_task(&task) {
            return Err(SchedulerError::InvalidTask(format!(
                "任务缺少必填字段: {:?}",
                self.required_fields
            )));
        }
        let task_id = self.task_id_of(&task)?;

        match self.mark_task_invoked(labourer, &task).await? {
            InvocationClaim::Claimed => {}
            InvocationClaim::AlreadyClaimed => {
                self.stats.record_invocation_skipped();
                info!(
                    "任务 {} 已被其他调度实例调用，跳过本次调用",
                    task_id
                );
                return Ok(InvocationOutcome::Skipped { task_id });
            }
        }

        let payload = payload_bytes(&task, self.fields.payload())?;
        self.invoker.invoke(&labourer.arn, payload).await?;
        self.stats.record_invoked();
        debug!("已调用 Labourer {} 处理任务 {}", labourer.id, task_id);

        Ok(InvocationOutcome::Invoked { task_id })
    }

    /// 以条件更新抢占调用权：attempts 加一，greenfield 推到 `now + delta`
    ///
    /// 条件总是包含任务当前的 greenfield，缺少 greenfield 的任务无法
    /// 作为互斥依据，返回 [`SchedulerError::InvalidTask`]。活动表中已经
    /// 没有该任务时返回 [`SchedulerError::TaskNotFound`]。
    pub async fn mark_task_invoked(
        &self,
        labourer: &Labourer,
        task: &Row,
    ) -> SchedulerResult<InvocationClaim> {
        let task_id_field = self.fields.task_id();
        let greenfield_field = self.fields.greenfield();
        let attempts_field = self.fields.attempts();

        let task_id = task.get(task_id_field).cloned().ok_or_else(|| {
            SchedulerError::InvalidTask(format!("任务缺少字段 {task_id_field}"))
        })?;
        let greenfield = task
            .get(greenfield_field)
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| {
                SchedulerError::InvalidTask(format!(
                    "任务 {task_id} 缺少字段 {greenfield_field}，无法抢占调用权"
                ))
            })?;
        let now = self.clock.now();

        let mut request = UpdateRequest::new(self.task_key(task_id.clone()))
            .set(
                greenfield_field,
                now + self.config.greenfield_invocation_delta,
            )
            .increment(attempts_field, 1)
            .condition(Condition::new(task_id_field, Comparison::Exists))
            .condition(Condition::eq(greenfield_field, greenfield));
        if let Some(attempts) = task.get(attempts_field) {
            request = request.condition(Condition::eq(attempts_field, attempts.clone()));
        }

        match self.store.update(&self.config.tables.tasks, &request).await? {
            ConditionalWrite::Applied => {
                debug!("Labourer {} 取得任务调用权", labourer.id);
                Ok(InvocationClaim::Claimed)
            }
            ConditionalWrite::PreconditionFailed => {
                let task_id = self.task_id_of(task)?;
                if self.get_task_by_id(&task_id, None).await?.is_none() {
                    return Err(SchedulerError::TaskNotFound { task_id });
                }
                Ok(InvocationClaim::AlreadyClaimed)
            }
        }
    }

    /// 标记任务完成
    pub async fn close_task(&self, task_id: &str, labourer_id: &str) -> SchedulerResult<()> {
        let request = UpdateRequest::new(self.task_key(Value::from(task_id)))
            .set(
                self.fields.resolve(fields::COMPLETED_AT),
                self.clock.now(),
            )
            .condition(Condition::new(self.fields.task_id(), Comparison::Exists))
            .condition(Condition::eq(self.fields.labourer_id(), labourer_id));

        match self.store.update(&self.config.tables.tasks, &request).await? {
            ConditionalWrite::Applied => {
                self.stats.record_closed();
                debug!("任务 {} 已完成", task_id);
                Ok(())
            }
            ConditionalWrite::PreconditionFailed => Err(SchedulerError::TaskNotFound {
                task_id: task_id.to_string(),
            }),
        }
    }

    /// 以完成状态归档任务
    pub async fn archive_task(&self, task_id: &str) -> SchedulerResult<()> {
        self.archive_task_with_status(task_id, ClosedTaskStatus::Completed)
            .await
    }

    /// 将任务移入关闭表并从活动表删除
    pub async fn archive_task_with_status(
        &self,
        task_id: &str,
        status: ClosedTaskStatus,
    ) -> SchedulerResult<()> {
        let task = self
            .get_task_by_id(task_id, None)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        let labourer_id = row_string(&task, self.fields.labourer_id()).ok_or_else(|| {
            SchedulerError::InvalidTask(format!("任务 {task_id} 缺少 labourer_id"))
        })?;
        let key = self.task_key(
            task.get(self.fields.task_id())
                .cloned()
                .unwrap_or_else(|| Value::from(task_id)),
        );

        let mut closed = jsonify_payload(task, self.fields.payload())?;
        closed.insert(
            self.fields
                .resolve(fields::LABOURER_ID_TASK_STATUS)
                .to_string(),
            Value::from(status.composite(&labourer_id)),
        );
        let closed_at_field = self.fields.resolve(fields::CLOSED_AT);
        if !closed.contains_key(closed_at_field) {
            closed.insert(closed_at_field.to_string(), Value::from(self.clock.now()));
        }

        self.store
            .put(&self.config.tables.closed_tasks, &closed)
            .await?;
        self.store.delete(&self.config.tables.tasks, &key).await?;
        self.stats.record_archived();
        info!("任务 {} 已归档，状态 {:?}", task_id, status);

        Ok(())
    }

    /// 写入重试表，`desired_launch_time = now + delay`
    pub async fn move_task_to_retry_table(
        &self,
        task: Row,
        delay_seconds: i64,
    ) -> SchedulerResult<Row> {
        let mut retry_row = jsonify_payload(task, self.fields.payload())?;
        retry_row.insert(
            self.fields.resolve(fields::DESIRED_LAUNCH_TIME).to_string(),
            Value::from(self.clock.now() + delay_seconds),
        );

        self.store
            .put(&self.config.tables.retry_tasks, &retry_row)
            .await?;
        self.stats.record_moved_to_retry();
        Ok(retry_row)
    }

    /// 移入重试表并从活动表删除
    pub async fn retry_task(
        &self,
        labourer: &Labourer,
        task: Row,
        delay_seconds: i64,
    ) -> SchedulerResult<Row> {
        let task_id = task.get(self.fields.task_id()).cloned().ok_or_else(|| {
            SchedulerError::InvalidTask(format!("任务缺少字段 {}", self.fields.task_id()))
        })?;

        let retry_row = self.move_task_to_retry_table(task, delay_seconds).await?;
        self.store
            .delete(&self.config.tables.tasks, &self.task_key(task_id.clone()))
            .await?;
        info!(
            "Labourer {} 的任务 {} 将在 {} 秒后重试",
            labourer.id, task_id, delay_seconds
        );

        Ok(retry_row)
    }

    /// 已到重试时间的任务，按 desired_launch_time 升序
    pub async fn get_tasks_to_retry_for_labourer(
        &self,
        labourer: &Labourer,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<Row>> {
        let launch_field = self.fields.resolve(fields::DESIRED_LAUNCH_TIME);
        let mut query = Query::new()
            .where_eq(self.fields.labourer_id(), labourer.id.clone())
            .filter(launch_field, Comparison::Le(Value::from(self.clock.now())))
            .sort_by(launch_field, SortOrder::Ascending);
        if let Some(limit) = limit {
            query = query.max_items(limit);
        }

        let mut rows = self
            .store
            .query(&self.config.tables.retry_tasks, &query)
            .await?;
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    /// 把重试表中的任务放回队尾
    pub async fn return_task_to_queue(
        &self,
        labourer: &Labourer,
        retry_row: Row,
    ) -> SchedulerResult<Row> {
        let task_id = retry_row
            .get(self.fields.task_id())
            .cloned()
            .ok_or_else(|| {
                SchedulerError::InvalidTask(format!("任务缺少字段 {}", self.fields.task_id()))
            })?;
        let newest = self.get_newest_greenfield_for_labourer(labourer).await?;

        let mut task = retry_row;
        task.remove(self.fields.resolve(fields::DESIRED_LAUNCH_TIME));
        task.insert(
            self.fields.greenfield().to_string(),
            Value::from(newest + self.config.greenfield_task_step),
        );

        self.store.put(&self.config.tables.tasks, &task).await?;
        self.store
            .delete(&self.config.tables.retry_tasks, &self.task_key(task_id.clone()))
            .await?;
        self.stats.record_returned_to_queue();
        debug!("任务 {} 已从重试表回到 Labourer {} 的队列", task_id, labourer.id);

        Ok(task)
    }

    pub(crate) fn warn_invalid(&self, labourer: &Labourer, task: &Row) {
        warn!(
            "Labourer {} 的任务缺少必填字段 {:?}: {:?}",
            labourer.id,
            self.required_fields,
            task.get(self.fields.task_id())
        );
    }
}

#[async_trait]
impl TaskQueueInspector for TaskManager {
    async fn count_running_tasks(&self, labourer: &Labourer) -> SchedulerResult<u64> {
        self.count_running_in_window(labourer).await
    }

    async fn count_queued_tasks(&self, labourer: &Labourer) -> SchedulerResult<u64> {
        self.get_length_of_queue_for_labourer(labourer).await
    }
}
