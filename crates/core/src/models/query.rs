//! 存储查询与条件更新的描述结构
//!
//! 这些结构与具体后端无关：内存实现直接在 Rust 中求值，
//! SQLite 实现将其翻译为 `json_extract` 表达式。

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::{Number, Value};

use super::task::{value_as_i64, Row};

/// 字段比较操作
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Eq(Value),
    Lt(Value),
    Le(Value),
    Gt(Value),
    Ge(Value),
    /// 闭区间 `[low, high]`
    Between(Value, Value),
    Exists,
    NotExists,
}

impl Comparison {
    /// 比较操作符的文本形式
    pub fn operator(&self) -> &'static str {
        match self {
            Comparison::Eq(_) => "=",
            Comparison::Lt(_) => "<",
            Comparison::Le(_) => "<=",
            Comparison::Gt(_) => ">",
            Comparison::Ge(_) => ">=",
            Comparison::Between(_, _) => "between",
            Comparison::Exists => "attribute_exists",
            Comparison::NotExists => "attribute_not_exists",
        }
    }

    /// 判断字段实际值是否满足比较条件
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        match (self, actual) {
            (Comparison::Exists, actual) => actual.is_some(),
            (Comparison::NotExists, actual) => actual.is_none(),
            (_, None) => false,
            (Comparison::Eq(expected), Some(actual)) => {
                compare_values(actual, expected) == Some(Ordering::Equal)
            }
            (Comparison::Lt(bound), Some(actual)) => {
                compare_values(actual, bound) == Some(Ordering::Less)
            }
            (Comparison::Le(bound), Some(actual)) => matches!(
                compare_values(actual, bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            (Comparison::Gt(bound), Some(actual)) => {
                compare_values(actual, bound) == Some(Ordering::Greater)
            }
            (Comparison::Ge(bound), Some(actual)) => matches!(
                compare_values(actual, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            (Comparison::Between(low, high), Some(actual)) => {
                matches!(
                    compare_values(actual, low),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(
                    compare_values(actual, high),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }
        }
    }
}

/// 单个字段条件
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub comparison: Comparison,
}

impl Condition {
    pub fn new(field: impl Into<String>, comparison: Comparison) -> Self {
        Self {
            field: field.into(),
            comparison,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Comparison::Eq(value.into()))
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.comparison.matches(row.get(&self.field))
    }
}

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// 范围查询
///
/// `max_items` 只是给后端的提示，调用方如需严格上限应自行截断。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub conditions: Vec<Condition>,
    pub sort_by: Option<String>,
    pub order: SortOrder,
    pub max_items: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, comparison: Comparison) -> Self {
        self.conditions.push(Condition::new(field, comparison));
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Comparison::Eq(value.into()))
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by = Some(field.into());
        self.order = order;
        self
    }

    pub fn max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }

    /// 在内存中对行集合执行过滤、排序与截断
    pub fn apply<I>(&self, rows: I) -> Vec<Row>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut result: Vec<Row> = rows.into_iter().filter(|r| self.matches(r)).collect();

        if let Some(field) = &self.sort_by {
            result.sort_by(|a, b| {
                let ordering = match (a.get(field), b.get(field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                match self.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(max_items) = self.max_items {
            result.truncate(max_items);
        }

        result
    }
}

/// 条件更新请求
///
/// `conditions` 全部满足时才应用 `set` 与 `increment`，
/// 后端必须以单次原子写入完成检查与更新。
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub key: Row,
    pub set: Row,
    pub increment: BTreeMap<String, i64>,
    pub conditions: Vec<Condition>,
}

impl UpdateRequest {
    pub fn new(key: Row) -> Self {
        Self {
            key,
            set: Row::new(),
            increment: BTreeMap::new(),
            conditions: Vec::new(),
        }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn increment(mut self, field: impl Into<String>, by: i64) -> Self {
        self.increment.insert(field.into(), by);
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// 检查当前行是否满足全部前置条件；行不存在时只有
    /// 无条件或仅包含 `NotExists` 条件的请求可以通过
    pub fn preconditions_hold(&self, current: Option<&Row>) -> bool {
        match current {
            Some(row) => self.conditions.iter().all(|c| c.matches(row)),
            None => self
                .conditions
                .iter()
                .all(|c| c.comparison == Comparison::NotExists),
        }
    }

    /// 将更新应用到行上（行不存在时由主键创建）
    pub fn apply(&self, current: Option<Row>) -> Row {
        let mut row = current.unwrap_or_else(|| self.key.clone());

        for (field, value) in &self.set {
            row.insert(field.clone(), value.clone());
        }

        for (field, by) in &self.increment {
            let base = row.get(field).and_then(value_as_i64).unwrap_or(0);
            row.insert(field.clone(), Value::Number(Number::from(base + by)));
        }

        row
    }
}

/// 条件写入的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalWrite {
    Applied,
    /// 前置条件不满足，未写入任何内容
    PreconditionFailed,
}

impl ConditionalWrite {
    pub fn is_applied(self) -> bool {
        matches!(self, ConditionalWrite::Applied)
    }
}

/// 比较两个 JSON 值
///
/// 数字之间按数值比较；数字与数字字符串之间也按数值比较；
/// 字符串之间按字典序比较；其他组合只判断相等。
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&y.parse::<f64>().ok()?),
        (Value::String(x), Value::Number(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_comparisons() {
        let r = row(json!({"greenfield": 1500, "labourer_id": "a"}));

        assert!(Condition::eq("labourer_id", "a").matches(&r));
        assert!(Condition::new("greenfield", Comparison::Lt(json!(2000))).matches(&r));
        assert!(Condition::new("greenfield", Comparison::Le(json!("1500"))).matches(&r));
        assert!(!Condition::new("greenfield", Comparison::Gt(json!(1500))).matches(&r));
        assert!(Condition::new("greenfield", Comparison::Between(json!(1000), json!(1500))).matches(&r));
        assert!(Condition::new("closed_at", Comparison::NotExists).matches(&r));
        assert!(!Condition::new("closed_at", Comparison::Ge(json!(0))).matches(&r));
    }

    #[test]
    fn test_query_apply_sorts_and_limits() {
        let rows = vec![
            row(json!({"id": "1", "greenfield": 3000})),
            row(json!({"id": "2", "greenfield": 1000})),
            row(json!({"id": "3", "greenfield": 2000})),
            row(json!({"id": "4"})),
        ];

        let query = Query::new()
            .filter("greenfield", Comparison::Exists)
            .sort_by("greenfield", SortOrder::Descending)
            .max_items(2);

        let result = query.apply(rows);
        let ids: Vec<_> = result.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!("1"), json!("3")]);
    }

    #[test]
    fn test_update_request_apply() {
        let current = row(json!({"task_id": "t", "attempts": 1, "greenfield": 10}));
        let request = UpdateRequest::new(row(json!({"task_id": "t"})))
            .set("greenfield", 99)
            .increment("attempts", 1)
            .condition(Condition::eq("greenfield", 10));

        assert!(request.preconditions_hold(Some(&current)));
        let updated = request.apply(Some(current));
        assert_eq!(updated["attempts"], json!(2));
        assert_eq!(updated["greenfield"], json!(99));

        assert!(!request.preconditions_hold(Some(&updated)));
        assert!(!request.preconditions_hold(None));
    }

    #[test]
    fn test_update_without_row_creates_from_key() {
        let request = UpdateRequest::new(row(json!({"task_id": "t"}))).increment("attempts", 1);

        assert!(request.preconditions_hold(None));
        let created = request.apply(None);
        assert_eq!(created, row(json!({"task_id": "t", "attempts": 1})));
    }
}
