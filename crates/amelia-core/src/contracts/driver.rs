//! The `Driver` trait — the contract an LLM driver must satisfy (spec §1,
//! §4.6): "the core sees a `Driver.generate(...)` contract only". How text
//! generation, tool calls, or structured outputs reach a model is entirely
//! the driver's concern.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One message in a driver conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverMessage {
    pub role: String,
    pub content: String,
}

/// A single generation request passed to a driver by a pipeline node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Opaque provider session to resume, if any (`PipelineState::driver_session_id`).
    pub session_id: Option<String>,
    pub system_prompt: String,
    pub messages: Vec<DriverMessage>,
    /// Tool names the driver is permitted to call, resolved against the
    /// [`super::ToolRegistry`] by the caller.
    pub tools: Vec<String>,
}

/// A driver's reply: text, any tool calls it made, the (possibly new)
/// session id to carry forward, and token accounting for the token sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub session_id: Option<String>,
    pub text: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub estimated_cost_usd: f64,
}

/// A single tool invocation a driver made mid-generation, as reported back
/// to the node. The core never executes the tool itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
}

/// Errors a driver can raise. Transient failures (rate limits, network)
/// are the driver's responsibility to retry before raising (spec §4.3);
/// anything that reaches the node is treated as terminal for that step.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("driver rate limited: {0}")]
    RateLimited(String),
    #[error("driver call cancelled")]
    Cancelled,
    #[error("driver error: {0}")]
    Other(String),
}

/// Adapter interface for an LLM driver. Implementations wrap a specific
/// provider/SDK and translate its output into [`GenerateResponse`].
///
/// Object-safe: every method returns a concrete or boxed type, so drivers
/// are stored as `Arc<dyn Driver>` in a [`DriverRegistry`].
#[async_trait]
pub trait Driver: Send + Sync {
    /// Human-readable name for this driver (e.g. `"claude-code"`).
    fn name(&self) -> &str;

    /// Run one generation turn, optionally resuming `request.session_id`.
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, DriverError>;
}

/// A named collection of available [`Driver`] implementations, keyed by
/// name, so agents can bind to a driver/model at the profile layer without
/// the core knowing concrete driver types.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, std::sync::Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver. Replaces and returns any driver already
    /// registered under the same name.
    pub fn register(&mut self, driver: std::sync::Arc<dyn Driver>) -> Option<std::sync::Arc<dyn Driver>> {
        let name = driver.name().to_string();
        self.drivers.insert(name, driver)
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn Driver>> {
        self.drivers.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.drivers.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDriver {
        name: String,
    }

    #[async_trait]
    impl Driver for FakeDriver {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(&self, _request: GenerateRequest) -> Result<GenerateResponse, DriverError> {
            Ok(GenerateResponse {
                session_id: None,
                text: "ok".into(),
                tool_calls: vec![],
                input_tokens: 1,
                output_tokens: 1,
                estimated_cost_usd: 0.0,
            })
        }
    }

    #[test]
    fn registry_starts_empty() {
        let registry = DriverRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("anything").is_none());
    }

    #[tokio::test]
    async fn register_and_generate() {
        let mut registry = DriverRegistry::new();
        registry.register(std::sync::Arc::new(FakeDriver {
            name: "fake".into(),
        }));

        let driver = registry.get("fake").expect("driver registered");
        let response = driver
            .generate(GenerateRequest {
                session_id: None,
                system_prompt: "you are a test".into(),
                messages: vec![],
                tools: vec![],
            })
            .await
            .unwrap();
        assert_eq!(response.text, "ok");
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = DriverRegistry::new();
        registry.register(std::sync::Arc::new(FakeDriver { name: "a".into() }));
        let old = registry.register(std::sync::Arc::new(FakeDriver { name: "a".into() }));
        assert!(old.is_some());
        assert_eq!(registry.len(), 1);
    }
}
