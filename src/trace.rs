//! Structured trace sink for LLM and MCP activity.
//!
//! The core emits an event before every outbound request and after every
//! response (or error). Events carry structured fields so traces stay
//! machine-filterable; whether anything is printed is purely a subscriber
//! concern.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// With `trace` enabled everything down to debug level is emitted;
/// otherwise only info and above. `RUST_LOG` overrides both.
pub fn init_tracing(trace: bool) {
    let default = if trace { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // try_init so tests that initialize twice don't panic
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn llm_request(provider: &str, model: &str, message_count: usize, tool_count: usize) {
    tracing::debug!(
        category = "llm_request",
        provider,
        model,
        message_count,
        tool_count,
        "LLM request"
    );
}

pub fn llm_response(provider: &str, model: &str, stop_reason: &str, tool_call_count: usize) {
    tracing::debug!(
        category = "llm_response",
        provider,
        model,
        stop_reason,
        tool_call_count,
        "LLM response"
    );
}

pub fn llm_error(provider: &str, model: &str, operation: &str, error: &anyhow::Error) {
    tracing::error!(
        category = "llm_error",
        provider,
        model,
        operation,
        error = format!("{error:#}"),
        "LLM {operation} failed"
    );
}

pub fn tool_call(server: &str, namespaced_tool: &str, original_tool: &str, args: &serde_json::Value) {
    tracing::debug!(
        category = "mcp_tool_call",
        server,
        namespaced_tool,
        original_tool,
        args = args.to_string(),
        "MCP tool call"
    );
}

pub fn tool_result(
    server: &str,
    namespaced_tool: &str,
    original_tool: &str,
    is_error: bool,
    content_length: usize,
) {
    tracing::debug!(
        category = "mcp_tool_result",
        server,
        namespaced_tool,
        original_tool,
        is_error,
        content_length,
        "MCP tool result"
    );
}

pub fn mcp_error(server: &str, operation: &str, error: &anyhow::Error) {
    tracing::error!(
        category = "mcp_error",
        server,
        operation,
        error = format!("{error:#}"),
        "MCP {operation} failed"
    );
}
