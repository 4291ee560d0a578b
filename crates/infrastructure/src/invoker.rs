//! HTTP 调用实现
//!
//! `arn` 被视为目标 URL，负载作为 JSON 请求体 POST 出去。
//! 请求在后台任务中发送，调用方不等待响应。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, Url};
use tracing::{debug, error, warn};

use scheduler_core::{
    config::InvokerConfig, traits::LabourerInvoker, SchedulerError, SchedulerResult,
};

#[derive(Debug, Clone)]
pub struct HttpLabourerInvoker {
    client: Client,
}

impl HttpLabourerInvoker {
    pub fn new(config: &InvokerConfig) -> SchedulerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| SchedulerError::Network(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LabourerInvoker for HttpLabourerInvoker {
    async fn invoke(&self, function_identifier: &str, payload: Vec<u8>) -> SchedulerResult<()> {
        let url = Url::parse(function_identifier).map_err(|e| {
            SchedulerError::InvalidArgument(format!(
                "调用目标 {function_identifier} 不是合法的URL: {e}"
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SchedulerError::InvalidArgument(format!(
                "不支持的调用协议: {}",
                url.scheme()
            )));
        }

        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        let target = function_identifier.to_string();

        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    metrics::counter!("scheduler_http_invocations_total", "result" => "success")
                        .increment(1);
                    debug!("调用 {} 成功: {}", target, response.status());
                }
                Ok(response) => {
                    metrics::counter!("scheduler_http_invocations_total", "result" => "rejected")
                        .increment(1);
                    warn!("调用 {} 被拒绝: {}", target, response.status());
                }
                Err(e) => {
                    metrics::counter!("scheduler_http_invocations_total", "result" => "error")
                        .increment(1);
                    error!("调用 {} 失败: {}", target, e);
                }
            }
        });

        Ok(())
    }
}
