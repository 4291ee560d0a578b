use rand::Rng;

use scheduler_core::{
    config::RetryConfig,
    models::{row_i64, Row},
};

/// 重试延迟策略：指数退避加随机抖动
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// 第 `attempts` 次尝试失败后的等待时间（秒）
    pub fn delay_for_attempt(&self, attempts: u32) -> i64 {
        let base_interval = self.config.base_interval_seconds as f64;
        let multiplier = self.config.backoff_multiplier;
        let max_interval = self.config.max_interval_seconds as f64;
        let jitter_factor = self.config.jitter_factor;

        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exponential_interval = base_interval * multiplier.powi(exponent);
        let capped_interval = exponential_interval.min(max_interval);

        // 随机抖动避免多个实例同时重试
        let jitter = capped_interval * jitter_factor * (rand::rng().random::<f64>() - 0.5) * 2.0;
        let final_interval = (capped_interval + jitter)
            .max(base_interval)
            .min(max_interval);

        final_interval.round() as i64
    }

    /// 按任务已有的尝试次数计算延迟
    pub fn delay_for_task(&self, task: &Row, attempts_field: &str) -> i64 {
        let attempts = row_i64(task, attempts_field).unwrap_or(0).max(0);
        self.delay_for_attempt(attempts.min(u32::MAX as i64) as u32)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
