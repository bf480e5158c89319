//! Harness configuration.
//!
//! Configuration is a JSON file naming the LLM backend and the MCP servers
//! under test. Loading happens in two stages: the raw JSON tree is walked
//! first so every `${env:VAR}` string is resolved from the environment, and
//! only then is the tree deserialized into its typed shape. Server order in
//! the file is preserved and drives connection order.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::mcp::TransportConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config file {path} is not valid JSON: {source}")]
    InvalidJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("environment variable '{0}' referenced in config is not set")]
    MissingEnv(String),

    #[error("config file {path} has an invalid shape: {source}")]
    InvalidShape {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[allow(dead_code)]
    #[serde(default)]
    version: Option<String>,
    #[serde(rename = "mcpClient")]
    mcp_client: ClientSection,
    #[serde(rename = "mcpServers")]
    mcp_servers: IndexMap<String, TransportConfig>,
}

#[derive(Debug, Deserialize)]
struct ClientSection {
    provider: String,
    model: String,
    api_key_env: String,
}

/// LLM backend settings with the API key already resolved.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key: String,
}

/// Fully resolved configuration, ready to hand to the client.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub llm: LlmConfig,
    pub servers: IndexMap<String, TransportConfig>,
}

/// Load and resolve a config file.
///
/// `${env:VAR}` placeholders anywhere in the tree are substituted before
/// deserialization, and `api_key_env` names a second variable holding the
/// API key itself.
pub fn load_config(path: &Path) -> Result<ResolvedConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tree: serde_json::Value =
        serde_json::from_str(&raw).map_err(|source| ConfigError::InvalidJson {
            path: path.to_path_buf(),
            source,
        })?;
    resolve_env_placeholders(&mut tree)?;

    let file: ConfigFile =
        serde_json::from_value(tree).map_err(|source| ConfigError::InvalidShape {
            path: path.to_path_buf(),
            source,
        })?;

    let api_key = std::env::var(&file.mcp_client.api_key_env)
        .map_err(|_| ConfigError::MissingEnv(file.mcp_client.api_key_env.clone()))?;

    Ok(ResolvedConfig {
        llm: LlmConfig {
            provider: file.mcp_client.provider,
            model: file.mcp_client.model,
            api_key,
        },
        servers: file.mcp_servers,
    })
}

/// Replace every string value of the exact form `${env:VAR}` with the value
/// of `VAR`. An unset variable is an error, not an empty string.
fn resolve_env_placeholders(value: &mut serde_json::Value) -> Result<(), ConfigError> {
    match value {
        serde_json::Value::String(s) => {
            if let Some(var) = s.strip_prefix("${env:").and_then(|r| r.strip_suffix('}')) {
                if var.is_empty() {
                    return Ok(());
                }
                let resolved =
                    std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.to_string()))?;
                *s = resolved;
            }
            Ok(())
        }
        serde_json::Value::Array(items) => {
            for item in items {
                resolve_env_placeholders(item)?;
            }
            Ok(())
        }
        serde_json::Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                resolve_env_placeholders(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
