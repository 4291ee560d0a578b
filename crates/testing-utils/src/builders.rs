//! Test data builders for labourers and task rows
//!
//! Builders start from sensible defaults so tests only spell out the
//! attributes they care about.

use scheduler_core::models::{Labourer, LabourerCycle, Row};
use serde_json::{json, Value};

/// Builder for creating test Labourer values
pub struct LabourerBuilder {
    labourer: Labourer,
}

impl LabourerBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            labourer: Labourer::new(id, format!("arn:aws:lambda:us-west-2:000000000000:function:{id}")),
        }
    }

    pub fn with_arn(mut self, arn: &str) -> Self {
        self.labourer.arn = arn.to_string();
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.labourer.duration = duration;
        self
    }

    pub fn with_max_duration(mut self, max_duration: i64) -> Self {
        self.labourer.max_duration = max_duration;
        self
    }

    pub fn with_cooldown(mut self, cooldown: i64) -> Self {
        self.labourer.cooldown = cooldown;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.labourer.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_max_simultaneous_invocations(mut self, max: u32) -> Self {
        self.labourer.max_simultaneous_invocations = Some(max);
        self
    }

    pub fn with_custom_attr(mut self, name: &str, value: Value) -> Self {
        self.labourer.custom.insert(name.to_string(), value);
        self
    }

    /// Register the labourer as of `now` with the given invocation delta
    pub fn registered_at(mut self, now: i64, invocation_delta: i64, health: i32) -> Self {
        let invoked = now + invocation_delta;
        let expired = invoked - self.labourer.duration - self.labourer.cooldown;
        let max_attempts = self.labourer.effective_max_attempts();
        self.labourer = self.labourer.with_cycle(LabourerCycle {
            start: now,
            invoked,
            expired,
            health,
            max_attempts,
        });
        self
    }

    pub fn build(self) -> Labourer {
        self.labourer
    }
}

/// Builder for task rows using the default column names
pub struct TaskRowBuilder {
    row: Row,
}

impl TaskRowBuilder {
    pub fn new(task_id: &str, labourer_id: &str) -> Self {
        let mut row = Row::new();
        row.insert("task_id".to_string(), json!(task_id));
        row.insert("labourer_id".to_string(), json!(labourer_id));
        row.insert("created_at".to_string(), json!(1_000));
        row.insert("attempts".to_string(), json!(0));
        row.insert("payload".to_string(), json!("{}"));
        Self { row }
    }

    pub fn with_greenfield(self, greenfield: i64) -> Self {
        self.with("greenfield", json!(greenfield))
    }

    pub fn with_attempts(self, attempts: i64) -> Self {
        self.with("attempts", json!(attempts))
    }

    pub fn with_payload(self, payload: Value) -> Self {
        self.with("payload", payload)
    }

    pub fn with_completed_at(self, completed_at: i64) -> Self {
        self.with("completed_at", json!(completed_at))
    }

    pub fn with_closed_at(self, closed_at: i64) -> Self {
        self.with("closed_at", json!(closed_at))
    }

    pub fn with_desired_launch_time(self, desired_launch_time: i64) -> Self {
        self.with("desired_launch_time", json!(desired_launch_time))
    }

    pub fn without(mut self, field: &str) -> Self {
        self.row.remove(field);
        self
    }

    pub fn with(mut self, field: &str, value: Value) -> Self {
        self.row.insert(field.to_string(), value);
        self
    }

    pub fn build(self) -> Row {
        self.row
    }
}
