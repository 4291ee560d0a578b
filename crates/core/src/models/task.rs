//! 任务行模型
//!
//! 任务以 JSON 对象（[`Row`]）的形式持久化，键为物理列名。
//! 逻辑字段名与物理列名之间的映射由调度器在初始化时构建。

use serde_json::{Map, Value};

/// 存储层的一行数据
pub type Row = Map<String, Value>;

/// 任务的逻辑字段名
pub mod fields {
    pub const TASK_ID: &str = "task_id";
    pub const LABOURER_ID: &str = "labourer_id";
    pub const CREATED_AT: &str = "created_at";
    pub const GREENFIELD: &str = "greenfield";
    pub const ATTEMPTS: &str = "attempts";
    pub const PAYLOAD: &str = "payload";
    pub const COMPLETED_AT: &str = "completed_at";
    pub const CLOSED_AT: &str = "closed_at";
    pub const DESIRED_LAUNCH_TIME: &str = "desired_launch_time";
    pub const LABOURER_ID_TASK_STATUS: &str = "labourer_id_task_status";
}

/// 归档任务的终态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedTaskStatus {
    /// 失败或在达到最大尝试次数后被放弃
    Failed = 0,
    /// 成功完成
    Completed = 1,
}

impl ClosedTaskStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// 归档表中的组合状态字段值：`{labourer_id}_{status_code}`
    pub fn composite(self, labourer_id: &str) -> String {
        format!("{}_{}", labourer_id, self.code())
    }
}

/// 宽松地读取整数字段，兼容数字与数字字符串
pub fn row_i64(row: &Row, field: &str) -> Option<i64> {
    value_as_i64(row.get(field)?)
}

/// 宽松地读取字符串字段，数字会被转换为字符串
pub fn row_string(row: &Row, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_i64_accepts_strings_and_numbers() {
        let row = json!({"a": 5, "b": "1551962375", "c": 2.6, "d": "x"});
        let row = row.as_object().unwrap();

        assert_eq!(row_i64(row, "a"), Some(5));
        assert_eq!(row_i64(row, "b"), Some(1551962375));
        assert_eq!(row_i64(row, "c"), Some(3));
        assert_eq!(row_i64(row, "d"), None);
        assert_eq!(row_i64(row, "missing"), None);
    }

    #[test]
    fn test_closed_status_composite() {
        assert_eq!(
            ClosedTaskStatus::Completed.composite("some_lambda"),
            "some_lambda_1"
        );
        assert_eq!(ClosedTaskStatus::Failed.composite("x"), "x_0");
    }
}
