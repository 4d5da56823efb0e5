//! Provider and Tool interfaces (C13 external boundary, §6).
//!
//! No concrete HTTP provider or filesystem/shell tool ships in this
//! crate; both are trait objects the embedding application supplies.
//! Tests exercise the pool and orchestrator against the in-memory stubs
//! below.

use std::collections::HashMap;

use async_trait::async_trait;
use coordination::approval::DangerLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("provider server error: {0}")]
    ServerError(String),
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

/// A chat-capable LM provider. The core wraps calls to `chat` with the
/// circuit breaker and a cancellation token; providers are expected to
/// honour cancellation by aborting in-flight I/O.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    fn is_configured(&self) -> bool;
    async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub metadata: Option<Value>,
}

/// A tool a worker may invoke. The core never introspects `execute`'s
/// internals; it observes only inputs (fingerprinting), outputs
/// (loop/verification heuristics), and timing.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameter_schema(&self) -> Value;
    fn danger_level(&self) -> DangerLevel;
    async fn execute(&self, args: Value) -> ToolResult;
}

/// In-memory provider stub for tests: returns a fixed response and
/// never fails, unless `fail_with` is set.
pub struct StubProvider {
    pub name: String,
    pub default_model: String,
    pub response: String,
    pub fail_with: Option<ProviderError>,
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn chat(&self, _messages: &[ChatMessage]) -> Result<ChatResponse, ProviderError> {
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        Ok(ChatResponse {
            content: self.response.clone(),
            stop_reason: StopReason::EndTurn,
            usage: Usage { input_tokens: 10, output_tokens: 10 },
        })
    }
}

/// In-memory tool stub for tests: records calls and returns a canned result.
pub struct StubTool {
    pub tool_name: String,
    pub danger: DangerLevel,
    pub result: ToolResult,
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        "stub tool for tests"
    }

    fn parameter_schema(&self) -> Value {
        Value::Object(serde_json::Map::new())
    }

    fn danger_level(&self) -> DangerLevel {
        self.danger
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        self.result.clone()
    }
}

/// Named registry of tools available to a worker.
pub type ToolRegistry = HashMap<String, std::sync::Arc<dyn Tool>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_provider_returns_configured_response() {
        let provider = StubProvider {
            name: "stub".to_string(),
            default_model: "stub-1".to_string(),
            response: "hello".to_string(),
            fail_with: None,
        };
        let response = provider.chat(&[]).await.unwrap();
        assert_eq!(response.content, "hello");
    }

    #[tokio::test]
    async fn stub_provider_surfaces_configured_error() {
        let provider = StubProvider {
            name: "stub".to_string(),
            default_model: "stub-1".to_string(),
            response: String::new(),
            fail_with: Some(ProviderError::RateLimited("slow down".to_string())),
        };
        let result = provider.chat(&[]).await;
        assert!(matches!(result, Err(ProviderError::RateLimited(_))));
    }
}
