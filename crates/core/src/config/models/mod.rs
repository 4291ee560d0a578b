pub mod app_config;
pub mod database;
pub mod dispatcher_invoker;
pub mod observability;
pub mod task_manager;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher_invoker::{DispatcherConfig, InvokerConfig};
pub use observability::ObservabilityConfig;
pub use task_manager::{RetryConfig, TableNames, TaskManagerConfig};
