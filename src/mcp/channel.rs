//! rmcp-backed tool-call channel.
//!
//! Wraps the official MCP Rust SDK: spawns a child process for `stdio`
//! servers or opens a streamable-HTTP connection for `http` servers, runs
//! the capability handshake, and exposes list/call/close behind the
//! [`ToolChannel`] trait.

use std::borrow::Cow;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::{CallToolRequestParam, ClientInfo, Implementation, InitializeRequestParam, RawContent};
use rmcp::service::RunningService;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;
use tokio::process::Command;

use super::{DiscoveredTool, ServerConnection, ToolChannel, TransportConfig};

struct RmcpChannel {
    service: RunningService<RoleClient, InitializeRequestParam>,
}

fn client_info(name: String, version: &str) -> ClientInfo {
    ClientInfo {
        protocol_version: Default::default(),
        capabilities: Default::default(),
        client_info: Implementation {
            name,
            version: version.to_string(),
            ..Default::default()
        },
    }
}

fn build_header_map(headers: &std::collections::HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid HTTP header name: {name}"))?;
        let header_value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid HTTP header value for: {name}"))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Open a connection to one server, run the handshake, and wrap it as a
/// [`ServerConnection`]. Any spawn, handshake, or transport failure
/// propagates; the caller decides whether to abort the whole session.
pub async fn connect(
    server_name: &str,
    config: &TransportConfig,
    client_name: &str,
    client_version: &str,
) -> Result<ServerConnection> {
    let info = client_info(format!("{client_name}-{server_name}"), client_version);

    let service = match config {
        TransportConfig::Stdio { command, args, env } => {
            let mut cmd = Command::new(command);
            cmd.args(args);
            if let Some(env) = env {
                for (key, value) in env {
                    cmd.env(key, value);
                }
            }
            cmd.stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::inherit());

            let transport = TokioChildProcess::new(cmd)
                .with_context(|| format!("failed to spawn MCP server process: {command}"))?;
            info.serve(transport)
                .await
                .with_context(|| format!("MCP handshake with server '{server_name}' failed"))?
        }
        TransportConfig::Http { url, headers } => {
            let mut builder = reqwest::Client::builder();
            if let Some(headers) = headers {
                builder = builder.default_headers(build_header_map(headers)?);
            }
            let http = builder
                .build()
                .context("failed to build HTTP client for MCP transport")?;

            let transport = StreamableHttpClientTransport::with_client(
                http,
                StreamableHttpClientTransportConfig::with_uri(url.clone()),
            );
            info.serve(transport)
                .await
                .with_context(|| format!("MCP handshake with server '{server_name}' failed"))?
        }
    };

    Ok(ServerConnection::new(
        server_name,
        config.kind(),
        Box::new(RmcpChannel { service }),
    ))
}

#[async_trait]
impl ToolChannel for RmcpChannel {
    async fn list_tools(&self) -> Result<Vec<DiscoveredTool>> {
        let listing = self
            .service
            .list_tools(None)
            .await
            .context("tools/list failed")?;

        Ok(listing
            .tools
            .into_iter()
            .map(|tool| {
                let name = tool.name.to_string();
                DiscoveredTool {
                    description: tool
                        .description
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| format!("Tool: {name}")),
                    input_schema: Value::Object(tool.input_schema.as_ref().clone()),
                    name,
                }
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, args: &Value) -> Result<String> {
        let arguments = match args {
            Value::Object(map) => Some(map.clone()),
            Value::Null => None,
            other => bail!("tool arguments must be an object, got: {other}"),
        };

        let result = self
            .service
            .call_tool(CallToolRequestParam { name: Cow::Owned(name.to_string()), arguments })
            .await
            .with_context(|| format!("tools/call '{name}' failed"))?;

        let mut parts = Vec::new();
        for content in &result.content {
            match &content.raw {
                RawContent::Text(text) => parts.push(text.text.clone()),
                other => parts.push(serde_json::to_string(other)?),
            }
        }
        let mut text = parts.join("\n");
        if text.is_empty() {
            text = serde_json::to_string(&result)?;
        }

        // A tool-level error is still a protocol-level success; surface it
        // as an Err so the orchestrator records an error result.
        if result.is_error.unwrap_or_default() {
            bail!("{text}");
        }
        Ok(text)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.service.cancel().await.context("failed to close MCP connection")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_header_map() {
        let mut headers = std::collections::HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        headers.insert("X-Custom".to_string(), "1".to_string());

        let map = build_header_map(&headers).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("authorization").unwrap(), "Bearer abc");
    }

    #[test]
    fn test_build_header_map_rejects_bad_name() {
        let mut headers = std::collections::HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(build_header_map(&headers).is_err());
    }
}
