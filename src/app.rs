use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::info;

use scheduler_core::{config::AppConfig, models::Labourer, traits::TableStore};
use scheduler_dispatcher::{CapacityEcology, FieldMap, TaskManager, TaskScheduler};
use scheduler_infrastructure::{HttpLabourerInvoker, InMemoryTableStore, SqliteTableStore};

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

/// 应用组件装配
pub struct Application {
    config: AppConfig,
    manager: Arc<TaskManager>,
}

impl Application {
    pub async fn new(config: AppConfig, backend: StoreBackend) -> Result<Self> {
        let hash_key = FieldMap::new(&config.task_manager.field_names)
            .task_id()
            .to_string();

        let store: Arc<dyn TableStore> = match backend {
            StoreBackend::Sqlite => {
                info!("使用SQLite存储: {}", config.database.url);
                Arc::new(
                    SqliteTableStore::connect(&config.database, &hash_key)
                        .await
                        .context("初始化SQLite存储失败")?,
                )
            }
            StoreBackend::Memory => {
                info!("使用内存存储，进程退出后数据不会保留");
                Arc::new(InMemoryTableStore::new(hash_key))
            }
        };

        let invoker =
            Arc::new(HttpLabourerInvoker::new(&config.invoker).context("创建HTTP调用器失败")?);
        let ecology = Arc::new(CapacityEcology::new());

        let manager = TaskManager::new(config.task_manager.clone(), store, invoker, ecology)
            .context("创建任务管理器失败")?;

        Ok(Self {
            config,
            manager: Arc::new(manager),
        })
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    pub fn scheduler(&self) -> TaskScheduler {
        TaskScheduler::new(self.manager.clone(), self.config.dispatcher.clone())
    }

    /// 注册本周期的 Labourer 并返回指定的一个
    pub async fn labourer(&self, id: &str) -> Result<Labourer> {
        self.manager
            .register_labourers()
            .await
            .context("注册Labourer失败")?;
        self.manager
            .get_labourer(id)
            .with_context(|| format!("未知的Labourer: {id}"))
    }

    /// 运行调度循环直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if !self.config.dispatcher.enabled {
            return Err(anyhow::anyhow!("调度器被禁用，请检查配置"));
        }

        info!(
            "调度器启动，间隔 {} 秒",
            self.config.dispatcher.schedule_interval_seconds
        );
        self.scheduler().run(shutdown_rx).await;
        info!("调度器已停止");
        Ok(())
    }
}
