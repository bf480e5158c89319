//! # mcptest
//!
//! A test harness for MCP servers, driven by a tool-using LLM.
//!
//! mcptest connects a real model to the MCP servers named in a config file,
//! sends it natural-language prompts, and lets it call the servers' tools.
//! Assertions are judged by the model against a ledger of the tool calls
//! that actually ran, so a test can check behavior ("a dice tool was
//! called") without pinning exact wire traffic.
//!
//! ## Quick Start
//!
//! A test file is YAML with prompt and assert steps:
//!
//! ```yaml
//! description: Dice rolling
//! steps:
//!   - prompt: Roll a six-sided die
//!   - assert: a dice tool was called and returned a number from 1 to 6
//! ```
//!
//! Driving the harness from code:
//!
//! ```rust,ignore
//! use mcptest::{load_config, TestClient, TestRunner, find_test_files};
//!
//! let config = load_config("mcp.config.json".as_ref())?;
//! let mut client = TestClient::new(config);
//! client.connect().await?;
//!
//! let files = find_test_files("tests".as_ref())?;
//! let results = TestRunner::new(&mut client).run_all(&files).await;
//! client.disconnect().await;
//! ```

pub mod client;
pub mod config;
pub mod llm;
pub mod mcp;
pub mod runner;
pub mod session;
pub mod trace;

// Core types
pub use client::{PromptResponse, TestClient};
pub use config::{load_config, ConfigError, LlmConfig, ResolvedConfig};
pub use session::{AssertionVerdict, PromptOutcome, Session, SessionOptions, ToolExecution};

// Test execution
pub use runner::{find_test_files, load_test_file, StepResult, TestFile, TestResult, TestRunner, TestStep};

// Backends and transports
pub use llm::{create_llm, Llm, Message, Response, StopReason, Tool};
pub use mcp::{ToolChannel, ToolRegistry, TransportConfig};
