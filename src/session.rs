//! Conversation orchestration.
//!
//! A [`Session`] owns the canonical message history and the session-wide
//! tool-execution ledger for one client instance. It drives the
//! request → tool-call → tool-result → follow-up loop (one round of tool
//! dispatch per turn), and evaluates natural-language assertions against
//! the ledger with an LLM-as-judge call.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Serialize;

use crate::llm::{GenerateOptions, Llm, Message, Tool, ToolResult};
use crate::mcp::{self, McpError, ServerConnection, ToolRegistry, TransportConfig};
use crate::trace;

/// Placeholder embedded in the judge prompt when the ledger is empty.
const EMPTY_LEDGER: &str = "(no tools were executed)";

/// Per-session knobs, all with sensible defaults.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub max_tokens: u32,
    pub client_name: String,
    pub client_version: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            client_name: "mcptest-client".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// One dispatched tool call as recorded in the session ledger.
///
/// The ledger is ground truth for assertions: it records what actually ran,
/// independent of whatever the assistant later claimed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolExecution {
    pub server_name: String,
    /// Namespaced name the model used.
    pub tool_name: String,
    pub original_tool_name: String,
    pub result: Option<String>,
}

/// What one completed turn produced.
#[derive(Debug, Clone)]
pub struct PromptOutcome {
    pub text: String,
    pub tool_executions: Vec<ToolExecution>,
}

/// Verdict from an LLM-judged assertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionVerdict {
    pub passed: bool,
    pub reasoning: String,
}

pub struct Session {
    llm: Box<dyn Llm>,
    options: SessionOptions,
    connections: Vec<ServerConnection>,
    tools: Vec<Tool>,
    registry: ToolRegistry,
    messages: Vec<Message>,
    executions: Vec<ToolExecution>,
}

impl Session {
    pub fn new(llm: Box<dyn Llm>, options: SessionOptions) -> Self {
        Self {
            llm,
            options,
            connections: Vec::new(),
            tools: Vec::new(),
            registry: ToolRegistry::new(),
            messages: Vec::new(),
            executions: Vec::new(),
        }
    }

    /// Connect to one server, discover its tools, and merge them into the
    /// session tool list under namespaced names.
    pub async fn connect_to_server(&mut self, name: &str, config: &TransportConfig) -> Result<()> {
        let connection = mcp::connect(
            name,
            config,
            &self.options.client_name,
            &self.options.client_version,
        )
        .await
        .with_context(|| format!("failed to connect to MCP server '{name}'"))?;

        self.register_connection(connection).await
    }

    /// Discover a connection's tools and start tracking it. If discovery
    /// fails, the connection is closed before the error propagates so the
    /// server process is not left running untracked.
    async fn register_connection(&mut self, connection: ServerConnection) -> Result<()> {
        let name = connection.name.clone();
        let discovered = match connection.channel().list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                if let Err(close_err) = connection.into_channel().close().await {
                    trace::mcp_error(&name, "close", &close_err);
                }
                return Err(e.context(format!("failed to list tools on MCP server '{name}'")));
            }
        };

        let mut namespaced_names = Vec::with_capacity(discovered.len());
        for tool in discovered {
            let namespaced = self.registry.register(&name, &tool.name);
            namespaced_names.push(namespaced.clone());
            self.tools.push(Tool {
                name: namespaced,
                description: tool.description,
                input_schema: tool.input_schema,
            });
        }

        tracing::info!(server = %name, tools = ?namespaced_names, "connected to MCP server");
        self.connections.push(connection);
        Ok(())
    }

    /// Connect to every configured server, sequentially, in map order.
    /// Fails fast on the first error; connections already made stay tracked
    /// so [`Session::cleanup`] can close them.
    pub async fn connect_to_servers(
        &mut self,
        servers: &IndexMap<String, TransportConfig>,
    ) -> Result<()> {
        for (name, config) in servers {
            self.connect_to_server(name, config).await?;
        }
        tracing::info!(
            tool_count = self.tools.len(),
            "all servers connected"
        );
        Ok(())
    }

    /// Run one conversation turn.
    ///
    /// At most one round of tool dispatch happens per turn: if the follow-up
    /// response requests further tools, it is still treated as final and only
    /// its text is kept. This keeps the loop bounded and predictable for
    /// assertions.
    pub async fn process_query(&mut self, query: &str) -> Result<PromptOutcome> {
        self.messages.push(Message::user(query));

        let generate_options = GenerateOptions {
            max_tokens: self.options.max_tokens,
            tools: self.tools.clone(),
        };

        let mut response = self.llm.generate(&self.messages, &generate_options).await?;
        let mut turn_executions = Vec::new();

        if !response.tool_calls.is_empty() {
            self.messages.push(Message::tool_calls(response.tool_calls.clone()));

            let mut tool_results = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                // Routing failures are consistency errors and propagate;
                // failures of the tool invocation itself are absorbed below.
                let registration = self.registry.resolve(&call.name)?;
                let connection = self
                    .connections
                    .iter()
                    .find(|c| c.name == registration.server_name)
                    .ok_or_else(|| McpError::ServerNotConnected {
                        server: registration.server_name.clone(),
                        tool: call.name.clone(),
                    })?;

                trace::tool_call(
                    &connection.name,
                    &call.name,
                    &registration.original_tool_name,
                    &call.args,
                );

                let mut execution = ToolExecution {
                    server_name: registration.server_name.clone(),
                    tool_name: call.name.clone(),
                    original_tool_name: registration.original_tool_name.clone(),
                    result: None,
                };

                match connection
                    .channel()
                    .call_tool(&registration.original_tool_name, &call.args)
                    .await
                {
                    Ok(content) => {
                        trace::tool_result(
                            &connection.name,
                            &call.name,
                            &registration.original_tool_name,
                            false,
                            content.len(),
                        );
                        execution.result = Some(content.clone());
                        tool_results.push(ToolResult {
                            tool_call_id: call.id.clone(),
                            content,
                            is_error: false,
                        });
                    }
                    Err(e) => {
                        trace::mcp_error(&connection.name, "tool call", &e);
                        let message = format!("Error calling tool: {e:#}");
                        execution.result = Some(message.clone());
                        tool_results.push(ToolResult {
                            tool_call_id: call.id.clone(),
                            content: message,
                            is_error: true,
                        });
                    }
                }

                turn_executions.push(execution.clone());
                self.executions.push(execution);
            }

            // One user message carrying every result, in dispatch order.
            self.messages.push(Message::tool_results(tool_results));

            response = self.llm.generate(&self.messages, &generate_options).await?;
        }

        if !response.text_content.is_empty() || response.tool_calls.is_empty() {
            self.messages.push(Message::assistant(response.text_content.clone()));
        }

        Ok(PromptOutcome { text: response.text_content, tool_executions: turn_executions })
    }

    /// Judge a natural-language assertion against the execution ledger.
    ///
    /// Never fails: a judge error or an unparseable judge response becomes a
    /// failed verdict, not a harness crash.
    pub async fn evaluate_assertion(&self, assertion: &str) -> AssertionVerdict {
        let prompt = self.build_judgment_prompt(assertion);

        let response_text = match self.llm.evaluate(&self.messages, &prompt).await {
            Ok(text) => text,
            Err(e) => {
                return AssertionVerdict {
                    passed: false,
                    reasoning: format!("Error evaluating assertion: {e:#}"),
                }
            }
        };

        let Some(raw) = first_json_object(&response_text) else {
            return AssertionVerdict {
                passed: false,
                reasoning: "Failed to parse assertion evaluation response".to_string(),
            };
        };

        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(verdict) => AssertionVerdict {
                passed: verdict["passed"].as_bool().unwrap_or(false),
                reasoning: verdict["reasoning"]
                    .as_str()
                    .unwrap_or("No reasoning provided")
                    .to_string(),
            },
            Err(_) => AssertionVerdict {
                passed: false,
                reasoning: "Failed to parse assertion evaluation response".to_string(),
            },
        }
    }

    fn build_judgment_prompt(&self, assertion: &str) -> String {
        let ledger = if self.executions.is_empty() {
            EMPTY_LEDGER.to_string()
        } else {
            self.executions
                .iter()
                .map(|e| {
                    format!(
                        "- {}/{} -> {}",
                        e.server_name,
                        e.original_tool_name,
                        e.result.as_deref().unwrap_or("(no result)")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "You are evaluating test assertions against the conversation history above.\n\n\
             ACTUAL TOOL EXECUTIONS (authoritative record):\n\
             {ledger}\n\n\
             This record is the ground truth for which tools actually ran and what they \
             returned. Trust it over any claims the assistant made in its replies.\n\n\
             ASSERTION TO EVALUATE:\n\
             {assertion}\n\n\
             Please evaluate whether this assertion is TRUE or FALSE.\n\n\
             Respond in this exact JSON format:\n\
             {{\n\
             \"passed\": true/false,\n\
             \"reasoning\": \"Brief explanation of why the assertion passed or failed\"\n\
             }}"
        )
    }

    /// Read-only snapshot of the conversation so far.
    pub fn message_snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// The session-wide execution ledger.
    pub fn executions(&self) -> &[ToolExecution] {
        &self.executions
    }

    /// The merged, namespaced tool list.
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Clear conversation history and the execution ledger together.
    pub fn clear_history(&mut self) {
        self.messages.clear();
        self.executions.clear();
    }

    /// Close every tracked connection exactly once. Individual close errors
    /// are logged and swallowed so the remaining connections still close.
    pub async fn cleanup(&mut self) {
        for connection in self.connections.drain(..) {
            let name = connection.name.clone();
            if let Err(e) = connection.into_channel().close().await {
                trace::mcp_error(&name, "close", &e);
            }
        }
    }
}

/// Extract the first balanced `{...}` region of `text`, aware of JSON
/// strings and escapes. Returns `None` when no balanced object exists.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
