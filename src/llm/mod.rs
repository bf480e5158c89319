//! Canonical LLM abstraction layer.
//!
//! Every supported backend speaks its own wire shape; this module defines the
//! provider-neutral message/tool/response model and the [`Llm`] capability
//! trait that the rest of the harness programs against. Adapter selection is
//! a factory keyed by provider identifier.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

mod anthropic;
mod openai;

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A tool-call request produced by the model. Consumed once per turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub id: String,
    /// Namespaced tool name (`<server>_<tool>`).
    pub name: String,
    pub args: serde_json::Value,
}

/// The outcome of dispatching one tool call, fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

/// Message content: plain text, a set of tool-call requests, or a set of
/// tool-call results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    ToolResults(Vec<ToolResult>),
}

/// One entry in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::ToolCalls(calls) }
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self { role: Role::User, content: MessageContent::ToolResults(results) }
    }
}

/// A callable tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    /// Session-unique namespaced name.
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Why the model stopped generating, mapped from each backend's native
/// finish reason. Unknown native reasons map to `Other`, never to `Stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    ToolCalls,
    MaxTokens,
    Other,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Stop => "stop",
            StopReason::ToolCalls => "tool_calls",
            StopReason::MaxTokens => "max_tokens",
            StopReason::Other => "other",
        }
    }
}

/// A normalized model response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub text_content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
}

/// Options for a single `generate` call.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub tools: Vec<Tool>,
}

/// The capability interface every backend adapter implements.
///
/// `generate` drives conversation turns; `evaluate` is the LLM-as-judge
/// entry point and returns the raw response text. Transport, auth, and
/// rate-limit errors propagate unchanged after being traced; adapters do
/// not retry.
#[async_trait]
pub trait Llm: Send + Sync {
    async fn generate(&self, messages: &[Message], options: &GenerateOptions) -> Result<Response>;

    async fn evaluate(&self, messages: &[Message], prompt: &str) -> Result<String>;
}

/// Errors from adapter selection.
#[derive(Debug, thiserror::Error)]
pub enum LlmConfigError {
    #[error("API key is required for provider: {0}")]
    MissingApiKey(String),

    #[error("unsupported LLM provider: '{0}'. Supported providers: anthropic, openai")]
    UnsupportedProvider(String),
}

/// Build the adapter for a provider identifier (case-insensitive).
pub fn create_llm(provider: &str, model: &str, api_key: &str) -> Result<Box<dyn Llm>, LlmConfigError> {
    if api_key.is_empty() {
        return Err(LlmConfigError::MissingApiKey(provider.to_string()));
    }

    match provider.to_lowercase().as_str() {
        "anthropic" => Ok(Box::new(AnthropicAdapter::new(api_key, model))),
        "openai" => Ok(Box::new(OpenAiAdapter::new(api_key, model))),
        _ => Err(LlmConfigError::UnsupportedProvider(provider.to_string())),
    }
}
