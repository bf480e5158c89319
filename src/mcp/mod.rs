//! MCP server connections, tool discovery, and namespaced routing.
//!
//! Each configured server gets exactly one live connection. Every tool it
//! advertises is registered under the namespaced name `<server>_<tool>`, so
//! tools with colliding names on different servers stay distinct instead of
//! being merged. Dispatch consults the registry to route a model-issued call
//! back to the owning server under the tool's original name.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod channel;

pub use channel::connect;

/// How to reach a tool server. The `type` field discriminates; an unknown
/// or missing kind fails config deserialization before any process or
/// network action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum TransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        env: Option<HashMap<String, String>>,
    },
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::Http { .. } => "http",
        }
    }
}

/// Routing/consistency errors during dispatch.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("tool '{0}' not found on any connected server")]
    ToolNotFound(String),

    #[error("server '{server}' for tool '{tool}' is not connected")]
    ServerNotConnected { server: String, tool: String },
}

/// A tool as discovered on a server, still under its original name.
#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// An opaque bidirectional tool-call channel to one server.
///
/// The wire protocol behind it is not this crate's concern; the production
/// implementation wraps the `rmcp` client, tests substitute scripted fakes.
/// `call_tool` flattens structured output into text (`text` blocks joined
/// with newlines, anything else serialized) and surfaces a tool-level error
/// result as an `Err`.
#[async_trait]
pub trait ToolChannel: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<DiscoveredTool>>;

    async fn call_tool(&self, name: &str, args: &serde_json::Value) -> Result<String>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// One live connection to a configured server.
pub struct ServerConnection {
    pub name: String,
    pub kind: &'static str,
    channel: Box<dyn ToolChannel>,
}

impl ServerConnection {
    pub fn new(name: impl Into<String>, kind: &'static str, channel: Box<dyn ToolChannel>) -> Self {
        Self { name: name.into(), kind, channel }
    }

    pub fn channel(&self) -> &dyn ToolChannel {
        self.channel.as_ref()
    }

    pub fn into_channel(self) -> Box<dyn ToolChannel> {
        self.channel
    }
}

/// Where a namespaced tool routes to. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRegistration {
    pub server_name: String,
    pub original_tool_name: String,
}

/// Session-wide mapping from namespaced tool names to their owning server.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    entries: HashMap<String, ToolRegistration>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a (server, tool) pair and return its namespaced name.
    pub fn register(&mut self, server_name: &str, original_tool_name: &str) -> String {
        let namespaced = format!("{server_name}_{original_tool_name}");
        self.entries.insert(
            namespaced.clone(),
            ToolRegistration {
                server_name: server_name.to_string(),
                original_tool_name: original_tool_name.to_string(),
            },
        );
        namespaced
    }

    /// Route a namespaced name back to its registration.
    pub fn resolve(&self, namespaced_name: &str) -> Result<&ToolRegistration, McpError> {
        self.entries
            .get(namespaced_name)
            .ok_or_else(|| McpError::ToolNotFound(namespaced_name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, namespaced_name: &str) -> bool {
        self.entries.contains_key(namespaced_name)
    }
}
