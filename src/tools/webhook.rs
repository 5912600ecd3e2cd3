//! Tenant-defined tools backed by an HTTP webhook.
//!
//! The tool input is POSTed as JSON; a JSON response body is returned as-is,
//! anything else is returned as a string.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::base_tool::{ToolHandler, ToolResult};

#[derive(Debug, Clone)]
pub struct WebhookTool {
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookTool {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            headers: HashMap::new(),
            client,
        })
    }

    /// Builder: add static request headers (e.g. an auth token).
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ToolHandler for WebhookTool {
    async fn invoke(&self, input: Value) -> ToolResult {
        let mut request = self.client.post(&self.url).json(&input);
        for (k, v) in &self.headers {
            request = request.header(k, v);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(format!("webhook returned {}: {}", status, text).into());
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(json) => Ok(json),
            Err(_) => Ok(Value::String(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unreachable_webhook_is_an_error() {
        // Port 9 (discard) on localhost is not expected to speak HTTP.
        let tool = WebhookTool::new("http://127.0.0.1:9/hook", Duration::from_millis(500)).unwrap();
        assert!(tool.invoke(json!({"task": "x"})).await.is_err());
    }

    #[test]
    fn test_builder_keeps_url() {
        let mut headers = HashMap::new();
        headers.insert("X-Token".to_string(), "t".to_string());
        let tool = WebhookTool::new("https://example.test/hook", Duration::from_secs(5))
            .unwrap()
            .with_headers(headers);
        assert_eq!(tool.url(), "https://example.test/hook");
        assert_eq!(tool.headers.len(), 1);
    }
}
