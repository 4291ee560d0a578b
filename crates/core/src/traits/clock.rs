use chrono::Utc;

/// 时间来源
///
/// 每个决策点都会重新读取时间，测试中可替换为可控的实现。
pub trait Clock: Send + Sync {
    /// 当前 Unix 时间（秒）
    fn now(&self) -> i64;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}
