//! High-level test client.
//!
//! [`TestClient`] is the stateful facade the runner and the chat REPL drive:
//! it owns the LLM backend and the session, and enforces the connect /
//! disconnect lifecycle around every operation.

use anyhow::{bail, Result};

use crate::config::ResolvedConfig;
use crate::llm::{self, Message};
use crate::session::{AssertionVerdict, Session, SessionOptions, ToolExecution};

/// What a single prompt turn returned, for display and step records.
#[derive(Debug, Clone)]
pub struct PromptResponse {
    pub text: String,
    pub tool_calls: Vec<ToolExecution>,
    pub messages: Vec<Message>,
}

pub struct TestClient {
    config: ResolvedConfig,
    session: Option<Session>,
    connected: bool,
}

impl TestClient {
    pub fn new(config: ResolvedConfig) -> Self {
        Self { config, session: None, connected: false }
    }

    /// Create the LLM backend and connect to every configured server.
    ///
    /// The session is stored before server connections start, so if a later
    /// server fails the earlier connections are still closed by
    /// [`TestClient::disconnect`].
    pub async fn connect(&mut self) -> Result<()> {
        if self.connected {
            bail!("already connected");
        }

        let backend = llm::create_llm(
            &self.config.llm.provider,
            &self.config.llm.model,
            &self.config.llm.api_key,
        )?;

        self.session = Some(Session::new(backend, SessionOptions::default()));
        let session = self.session.as_mut().ok_or_else(|| anyhow::anyhow!("session missing"))?;
        session.connect_to_servers(&self.config.servers).await?;

        self.connected = true;
        Ok(())
    }

    /// Send one prompt through the conversation loop.
    pub async fn prompt(&mut self, text: &str) -> Result<PromptResponse> {
        let session = self.session_mut()?;
        let outcome = session.process_query(text).await?;
        Ok(PromptResponse {
            text: outcome.text,
            tool_calls: outcome.tool_executions,
            messages: session.message_snapshot(),
        })
    }

    /// Judge an assertion against the session's execution ledger.
    pub async fn assert(&mut self, assertion: &str) -> Result<AssertionVerdict> {
        let session = self.session_mut()?;
        Ok(session.evaluate_assertion(assertion).await)
    }

    /// Reset conversation history and the tool-execution ledger.
    pub fn clear_history(&mut self) -> Result<()> {
        self.session_mut()?.clear_history();
        Ok(())
    }

    /// Snapshot of the conversation so far.
    pub fn messages(&self) -> Result<Vec<Message>> {
        match &self.session {
            Some(session) if self.connected => Ok(session.message_snapshot()),
            _ => bail!("not connected. Call connect() first"),
        }
    }

    /// Close all server connections. Safe to call repeatedly; connections
    /// are closed at most once.
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.cleanup().await;
        }
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        if !self.connected {
            bail!("not connected. Call connect() first");
        }
        self.session
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("not connected. Call connect() first"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use indexmap::IndexMap;

    fn offline_config() -> ResolvedConfig {
        ResolvedConfig {
            llm: LlmConfig {
                provider: "anthropic".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                api_key: "test-key".to_string(),
            },
            servers: IndexMap::new(),
        }
    }

    #[tokio::test]
    async fn test_operations_require_connect() {
        let mut client = TestClient::new(offline_config());
        assert!(!client.is_connected());

        let err = client.prompt("hi").await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
        let err = client.assert("anything").await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
        let err = client.clear_history().unwrap_err();
        assert!(err.to_string().contains("not connected"));
        let err = client.messages().unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn test_connect_with_no_servers_and_double_connect() {
        let mut client = TestClient::new(offline_config());
        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert!(client.messages().unwrap().is_empty());

        let err = client.connect().await.unwrap_err();
        assert!(err.to_string().contains("already connected"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut client = TestClient::new(offline_config());
        client.connect().await.unwrap();

        client.disconnect().await;
        assert!(!client.is_connected());
        client.disconnect().await;
        assert!(!client.is_connected());

        // A fresh connect works after disconnect.
        client.connect().await.unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_connect_rejects_missing_api_key() {
        let mut config = offline_config();
        config.llm.api_key = String::new();
        let mut client = TestClient::new(config);

        let err = client.connect().await.unwrap_err();
        assert!(err.to_string().contains("API key"));
        assert!(!client.is_connected());
    }
}
