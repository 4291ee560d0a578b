//! 基于并发容量的健康评估

use std::sync::{RwLock, Weak};

use async_trait::async_trait;
use tracing::debug;

use scheduler_core::{
    models::{EcoStatus, Labourer},
    traits::{EcologyClient, TaskQueueInspector},
    SchedulerResult,
};

/// 根据运行中任务占 `max_simultaneous_invocations` 的比例给出健康状态
///
/// | 负载 | 状态 |
/// |---|---|
/// | 未限制并发 | Excellent |
/// | `< 25%` | Excellent |
/// | `< 50%` | Good |
/// | `< 75%` | Moderate |
/// | `< 100%` | Poor |
/// | `>= 100%` | Bad |
#[derive(Default)]
pub struct CapacityEcology {
    manager: RwLock<Option<Weak<dyn TaskQueueInspector>>>,
}

impl CapacityEcology {
    pub fn new() -> Self {
        Self::default()
    }

    fn inspector(&self) -> Option<std::sync::Arc<dyn TaskQueueInspector>> {
        self.manager
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

/// 由运行数与并发上限计算状态
pub fn status_for_load(running: u64, max_simultaneous: u32) -> EcoStatus {
    if max_simultaneous == 0 {
        return EcoStatus::Bad;
    }
    let load = running as f64 / max_simultaneous as f64;
    if load >= 1.0 {
        EcoStatus::Bad
    } else if load >= 0.75 {
        EcoStatus::Poor
    } else if load >= 0.5 {
        EcoStatus::Moderate
    } else if load >= 0.25 {
        EcoStatus::Good
    } else {
        EcoStatus::Excellent
    }
}

#[async_trait]
impl EcologyClient for CapacityEcology {
    async fn get_labourer_status(&self, labourer: &Labourer) -> SchedulerResult<i32> {
        let Some(max_simultaneous) = labourer.max_simultaneous_invocations else {
            return Ok(EcoStatus::Excellent.code());
        };
        let Some(inspector) = self.inspector() else {
            debug!("尚未登记任务管理器，Labourer {} 使用中等健康状态", labourer.id);
            return Ok(EcoStatus::Moderate.code());
        };

        let running = inspector.count_running_tasks(labourer).await?;
        let status = status_for_load(running, max_simultaneous);
        debug!(
            "Labourer {} 运行中 {}/{}，健康状态 {:?}",
            labourer.id, running, max_simultaneous, status
        );
        Ok(status.code())
    }

    fn register_task_manager(&self, manager: Weak<dyn TaskQueueInspector>) {
        *self
            .manager
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(manager);
    }
}
