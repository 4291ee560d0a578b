use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub schedule_interval_seconds: u64,
    /// 未配置并发上限的 Labourer 每周期最多调用的任务数
    pub max_invocations_per_cycle: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule_interval_seconds: 10,
            max_invocations_per_cycle: 100,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.schedule_interval_seconds == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }

        if self.max_invocations_per_cycle == 0 {
            return Err(anyhow::anyhow!("每周期最大调用数必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokerConfig {
    /// 单次HTTP调用的超时时间（秒）
    pub request_timeout_seconds: u64,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
        }
    }
}

impl InvokerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("调用超时时间必须大于0"));
        }
        Ok(())
    }
}
