//! Labourer 注册表
//!
//! 从静态配置构造 Labourer，并在每个调度周期计算其动态属性。

use scheduler_core::{
    config::TaskManagerConfig,
    models::{Labourer, LabourerCycle},
    traits::{Clock, EcologyClient},
    SchedulerError, SchedulerResult,
};
use tracing::debug;

/// 配置中声明的 Labourer 集合（按 id 排序）
#[derive(Debug, Clone)]
pub struct LabourerRegistry {
    labourers: Vec<Labourer>,
    default_max_attempts: u32,
    invocation_delta: i64,
}

impl LabourerRegistry {
    pub fn from_config(config: &TaskManagerConfig) -> SchedulerResult<Self> {
        let mut labourers = Vec::with_capacity(config.labourers.len());
        for (id, attrs) in &config.labourers {
            let labourer = Labourer::from_config(id, attrs).map_err(|e| {
                SchedulerError::Configuration(format!("Labourer {id} 配置无效: {e}"))
            })?;
            labourers.push(labourer);
        }

        Ok(Self {
            labourers,
            default_max_attempts: config.max_attempts,
            invocation_delta: config.greenfield_invocation_delta,
        })
    }

    /// 静态配置中的全部 Labourer（未注册，不含周期属性）
    pub fn labourers(&self) -> Vec<Labourer> {
        self.labourers.clone()
    }

    pub fn find(&self, id: &str) -> Option<&Labourer> {
        self.labourers.iter().find(|l| l.id == id)
    }

    /// 以给定时刻与健康状态计算周期属性
    pub fn cycle_for(&self, labourer: &Labourer, now: i64, health: i32) -> LabourerCycle {
        let start = now;
        let invoked = start + self.invocation_delta;
        let expired = invoked - labourer.duration - labourer.cooldown;

        LabourerCycle {
            start,
            invoked,
            expired,
            health,
            max_attempts: labourer.max_attempts.unwrap_or(self.default_max_attempts),
        }
    }

    /// 重新读取时间与健康状态，返回注册后的 Labourer
    pub async fn register(
        &self,
        clock: &dyn Clock,
        ecology: &dyn EcologyClient,
    ) -> SchedulerResult<Vec<Labourer>> {
        let mut registered = Vec::with_capacity(self.labourers.len());

        for labourer in &self.labourers {
            let health = ecology.get_labourer_status(labourer).await?;
            let cycle = self.cycle_for(labourer, clock.now(), health);
            debug!(
                "注册 Labourer {}: start={}, expired={}, health={}",
                labourer.id, cycle.start, cycle.expired, cycle.health
            );
            registered.push(labourer.clone().with_cycle(cycle));
        }

        Ok(registered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> TaskManagerConfig {
        let mut config = TaskManagerConfig::default();
        config.labourers.insert(
            "some_function".to_string(),
            json!({"arn": "arn:some_function", "foo": "bar", "duration": 300, "cooldown": 60})
                .as_object()
                .cloned()
                .unwrap(),
        );
        config.labourers.insert(
            "another_function".to_string(),
            json!({"arn": "arn:another", "max_attempts": 5})
                .as_object()
                .cloned()
                .unwrap(),
        );
        config
    }

    #[test]
    fn test_labourers_sorted_with_custom_attributes() {
        let registry = LabourerRegistry::from_config(&config()).unwrap();
        let labourers = registry.labourers();

        assert_eq!(labourers.len(), 2);
        assert_eq!(labourers[0].id, "another_function");
        assert_eq!(labourers[1].id, "some_function");
        assert_eq!(labourers[1].custom_attr("foo"), Some(&json!("bar")));
        assert!(!labourers[1].is_registered());
    }

    #[test]
    fn test_cycle_for() {
        let registry = LabourerRegistry::from_config(&config()).unwrap();
        let labourer = registry.find("some_function").unwrap().clone();
        let cycle = registry.cycle_for(&labourer, 1_000, 4);

        assert_eq!(cycle.start, 1_000);
        assert_eq!(cycle.invoked, 1_000 + 31_557_600);
        assert_eq!(cycle.expired, cycle.invoked - 300 - 60);
        assert_eq!(cycle.max_attempts, 3);

        let another = registry.find("another_function").unwrap().clone();
        assert_eq!(registry.cycle_for(&another, 1_000, 4).max_attempts, 5);
    }

    #[test]
    fn test_invalid_labourer_config() {
        let mut config = config();
        config.labourers.insert(
            "broken".to_string(),
            json!({"duration": "soon"}).as_object().cloned().unwrap(),
        );
        assert!(matches!(
            LabourerRegistry::from_config(&config),
            Err(SchedulerError::Configuration(_))
        ));
    }
}
