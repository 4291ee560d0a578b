use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 默认预估执行时长（秒）
pub const DEFAULT_DURATION: i64 = 900;
/// 默认冷却时间（秒）
pub const DEFAULT_COOLDOWN: i64 = 300;
/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

fn default_duration() -> i64 {
    DEFAULT_DURATION
}

fn default_cooldown() -> i64 {
    DEFAULT_COOLDOWN
}

/// Labourer（工作函数类型）
///
/// 表示一类可被远程调用的工作函数，包含静态配置属性以及
/// 每个调度周期由注册步骤计算的动态属性。
///
/// # 字段说明
///
/// - `id`: Labourer 的稳定标识
/// - `arn`: 调用目标标识（函数名、URL 等）
/// - `duration`: 预估执行时长（秒）
/// - `max_duration`: 最大执行时长（秒），由平均时长估算回写
/// - `cooldown`: 执行窗口之后的空闲缓冲（秒）
/// - `max_attempts`: 配置的最大尝试次数（未配置时使用全局默认值）
/// - `max_simultaneous_invocations`: 最大并发调用数
/// - `custom`: 配置中声明的其他自定义属性，原样保留
///
/// 动态属性（`start`、`invoked`、`expired`、`health`）只能通过
/// [`Labourer::with_cycle`] 整体替换，注册之后只读。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Labourer {
    pub id: String,
    #[serde(default)]
    pub arn: String,
    #[serde(default = "default_duration")]
    pub duration: i64,
    #[serde(default = "default_duration")]
    pub max_duration: i64,
    #[serde(default = "default_cooldown")]
    pub cooldown: i64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub max_simultaneous_invocations: Option<u32>,
    #[serde(flatten)]
    pub custom: Map<String, Value>,
    #[serde(skip)]
    cycle: Option<LabourerCycle>,
}

/// 单个调度周期内的 Labourer 动态属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabourerCycle {
    /// 周期开始时间（秒）
    pub start: i64,
    /// 本周期被调用任务将获得的 greenfield
    pub invoked: i64,
    /// 小于该值（且不小于 `start`）的已调用任务视为过期
    pub expired: i64,
    /// 健康状态（见 [`EcoStatus`]）
    pub health: i32,
    /// 本周期生效的最大尝试次数
    pub max_attempts: u32,
}

impl Labourer {
    /// 创建新的 Labourer，其余属性使用默认值
    pub fn new(id: impl Into<String>, arn: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            arn: arn.into(),
            duration: DEFAULT_DURATION,
            max_duration: DEFAULT_DURATION,
            cooldown: DEFAULT_COOLDOWN,
            max_attempts: None,
            max_simultaneous_invocations: None,
            custom: Map::new(),
            cycle: None,
        }
    }

    /// 从配置条目构建 Labourer，保留所有自定义属性
    pub fn from_config(id: &str, attrs: &Map<String, Value>) -> serde_json::Result<Self> {
        let mut attrs = attrs.clone();
        attrs.insert("id".to_string(), Value::String(id.to_string()));
        serde_json::from_value(Value::Object(attrs))
    }

    /// 替换本周期的动态属性
    pub fn with_cycle(mut self, cycle: LabourerCycle) -> Self {
        self.cycle = Some(cycle);
        self
    }

    pub fn cycle(&self) -> Option<&LabourerCycle> {
        self.cycle.as_ref()
    }

    pub fn is_registered(&self) -> bool {
        self.cycle.is_some()
    }

    pub fn start(&self) -> Option<i64> {
        self.cycle.map(|c| c.start)
    }

    pub fn invoked(&self) -> Option<i64> {
        self.cycle.map(|c| c.invoked)
    }

    pub fn expired(&self) -> Option<i64> {
        self.cycle.map(|c| c.expired)
    }

    pub fn health(&self) -> Option<i32> {
        self.cycle.map(|c| c.health)
    }

    /// 生效的最大尝试次数：周期值 > 配置值 > 默认值
    pub fn effective_max_attempts(&self) -> u32 {
        self.cycle
            .map(|c| c.max_attempts)
            .or(self.max_attempts)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    /// 读取自定义属性
    pub fn custom_attr(&self, name: &str) -> Option<&Value> {
        self.custom.get(name)
    }
}

/// Labourer 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EcoStatus {
    Bad = 0,
    Poor = 1,
    Moderate = 2,
    Good = 3,
    Excellent = 4,
}

impl EcoStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(EcoStatus::Bad),
            1 => Some(EcoStatus::Poor),
            2 => Some(EcoStatus::Moderate),
            3 => Some(EcoStatus::Good),
            4 => Some(EcoStatus::Excellent),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_config_keeps_custom_attributes() {
        let attrs = json!({"foo": "bar", "arn": "123", "max_simultaneous_invocations": 10});
        let labourer = Labourer::from_config("some_lambda", attrs.as_object().unwrap()).unwrap();

        assert_eq!(labourer.id, "some_lambda");
        assert_eq!(labourer.arn, "123");
        assert_eq!(labourer.custom_attr("foo"), Some(&json!("bar")));
        assert_eq!(labourer.max_simultaneous_invocations, Some(10));
        assert_eq!(labourer.duration, DEFAULT_DURATION);
        assert!(!labourer.is_registered());
    }

    #[test]
    fn test_effective_max_attempts_fallback() {
        let mut labourer = Labourer::new("lambda", "arn");
        assert_eq!(labourer.effective_max_attempts(), DEFAULT_MAX_ATTEMPTS);

        labourer.max_attempts = Some(5);
        assert_eq!(labourer.effective_max_attempts(), 5);

        let labourer = labourer.with_cycle(LabourerCycle {
            start: 1,
            invoked: 2,
            expired: 0,
            health: 2,
            max_attempts: 7,
        });
        assert_eq!(labourer.effective_max_attempts(), 7);
        assert_eq!(labourer.health(), Some(2));
    }

    #[test]
    fn test_eco_status_codes() {
        assert_eq!(EcoStatus::Moderate.code(), 2);
        assert_eq!(EcoStatus::from_code(4), Some(EcoStatus::Excellent));
        assert_eq!(EcoStatus::from_code(9), None);
    }
}
