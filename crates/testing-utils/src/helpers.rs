//! Test helper utilities shared by the integration suites

use std::time::Duration;

use scheduler_core::config::TaskManagerConfig;
use serde_json::json;
use tokio::time::sleep;

/// Fixed "now" used across tests
pub const TEST_NOW: i64 = 1_700_000_000;

/// Task manager configuration with two labourers
///
/// `some_function` is unlimited, `limited_function` allows two
/// simultaneous invocations and a single attempt.
pub fn test_task_manager_config() -> TaskManagerConfig {
    let mut config = TaskManagerConfig::default();
    config.labourers.insert(
        "some_function".to_string(),
        json!({
            "arn": "arn:aws:lambda:us-west-2:000000000000:function:some_function",
            "max_simultaneous_invocations": null,
            "duration": 600,
            "cooldown": 60,
            "some_custom_attr": "value"
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
    );
    config.labourers.insert(
        "limited_function".to_string(),
        json!({
            "arn": "arn:aws:lambda:us-west-2:000000000000:function:limited_function",
            "max_simultaneous_invocations": 2,
            "max_attempts": 1
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
    );
    config
}

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    ///
    /// Useful when a fire-and-forget operation completes in the background.
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        false
    }
}
