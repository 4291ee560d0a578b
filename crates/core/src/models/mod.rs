pub mod labourer;
pub mod query;
pub mod task;

pub use labourer::*;
pub use query::*;
pub use task::{fields, row_i64, row_string, value_as_i64, ClosedTaskStatus, Row};
