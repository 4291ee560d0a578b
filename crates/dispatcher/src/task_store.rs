//! 任务行适配
//!
//! 负责逻辑字段名到物理列名的解析，以及任务负载的 JSON 编码。
//! 负载统一以 `", "` 与 `": "` 作为分隔符序列化，键按字典序排列，
//! 保证不同实例写出的字符串完全一致。

use std::collections::HashMap;
use std::io;

use serde::Serialize;
use serde_json::{ser::Formatter, Value};

use scheduler_core::{
    models::{fields, Row},
    SchedulerError, SchedulerResult,
};

/// 逻辑字段名到物理列名的映射，初始化时构建一次
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    physical: HashMap<String, String>,
}

impl FieldMap {
    pub fn new(mapping: &HashMap<String, String>) -> Self {
        Self {
            physical: mapping.clone(),
        }
    }

    /// 解析物理列名，未配置的字段原样返回
    pub fn resolve<'a>(&'a self, logical: &'a str) -> &'a str {
        self.physical
            .get(logical)
            .map(String::as_str)
            .unwrap_or(logical)
    }

    pub fn task_id(&self) -> &str {
        self.resolve(fields::TASK_ID)
    }

    pub fn labourer_id(&self) -> &str {
        self.resolve(fields::LABOURER_ID)
    }

    pub fn greenfield(&self) -> &str {
        self.resolve(fields::GREENFIELD)
    }

    pub fn attempts(&self) -> &str {
        self.resolve(fields::ATTEMPTS)
    }

    pub fn payload(&self) -> &str {
        self.resolve(fields::PAYLOAD)
    }
}

/// 与常见 JSON 库默认输出一致的格式：`{"a": 1, "b": [1, 2]}`
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// 序列化为负载字符串
pub fn to_payload_string(value: &Value) -> SchedulerResult<String> {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    value.serialize(&mut serializer)?;
    String::from_utf8(buf).map_err(|e| SchedulerError::Serialization(e.to_string()))
}

/// 合并基础负载与额外属性并序列化为 JSON 字符串
///
/// 基础负载可以是 JSON 对象或 JSON 对象字符串；`None` 与 `null` 视为空对象。
/// 额外属性会覆盖基础负载中的同名键。
pub fn construct_payload(payload: Option<&Value>, extra: &Row) -> SchedulerResult<String> {
    let mut merged = match payload {
        None | Some(Value::Null) => Row::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(SchedulerError::InvalidPayload(format!(
                    "负载字符串必须是JSON对象，实际为: {other}"
                )))
            }
            Err(e) => {
                return Err(SchedulerError::InvalidPayload(format!(
                    "负载字符串不是合法的JSON: {e}"
                )))
            }
        },
        Some(other) => {
            return Err(SchedulerError::InvalidPayload(format!(
                "负载必须是对象或JSON字符串，实际为: {other}"
            )))
        }
    };

    for (key, value) in extra {
        merged.insert(key.clone(), value.clone());
    }

    to_payload_string(&Value::Object(merged))
}

/// 若任务负载是对象则转换为 JSON 字符串，其余情况保持不变
pub fn jsonify_payload(mut task: Row, payload_field: &str) -> SchedulerResult<Row> {
    if let Some(Value::Object(_)) = task.get(payload_field) {
        if let Some(payload) = task.remove(payload_field) {
            task.insert(
                payload_field.to_string(),
                Value::String(to_payload_string(&payload)?),
            );
        }
    }
    Ok(task)
}

/// 远程调用使用的负载字节
pub fn payload_bytes(task: &Row, payload_field: &str) -> SchedulerResult<Vec<u8>> {
    match task.get(payload_field) {
        None | Some(Value::Null) => Ok(b"{}".to_vec()),
        Some(Value::String(raw)) => Ok(raw.clone().into_bytes()),
        Some(other) => Ok(to_payload_string(other)?.into_bytes()),
    }
}
