//! Anthropic Messages API adapter.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{GenerateOptions, Llm, Message, MessageContent, Response, StopReason, Tool, ToolCall};
use crate::trace;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const EVALUATE_MAX_TOKENS: u32 = 500;

pub struct AnthropicAdapter {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    async fn post_messages(&self, body: Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("anthropic request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("anthropic returned {status}: {detail}"));
        }

        response
            .json()
            .await
            .context("failed to decode anthropic response body")
    }
}

#[async_trait]
impl Llm for AnthropicAdapter {
    async fn generate(&self, messages: &[Message], options: &GenerateOptions) -> Result<Response> {
        let body = json!({
            "model": self.model,
            "max_tokens": options.max_tokens,
            "messages": to_wire_messages(messages),
            "tools": to_wire_tools(&options.tools),
        });

        trace::llm_request("anthropic", &self.model, messages.len(), options.tools.len());

        match self.post_messages(body).await {
            Ok(raw) => {
                let response = parse_response(&raw)?;
                trace::llm_response(
                    "anthropic",
                    &self.model,
                    response.stop_reason.as_str(),
                    response.tool_calls.len(),
                );
                Ok(response)
            }
            Err(e) => {
                trace::llm_error("anthropic", &self.model, "generate", &e);
                Err(e)
            }
        }
    }

    async fn evaluate(&self, messages: &[Message], prompt: &str) -> Result<String> {
        let mut eval_messages = messages.to_vec();
        eval_messages.push(Message::user(prompt));

        let body = json!({
            "model": self.model,
            "max_tokens": EVALUATE_MAX_TOKENS,
            "messages": to_wire_messages(&eval_messages),
            "tools": [],
        });

        trace::llm_request("anthropic", &self.model, eval_messages.len(), 0);

        match self.post_messages(body).await {
            Ok(raw) => {
                trace::llm_response("anthropic", &self.model, "evaluate", 0);
                Ok(text_blocks(&raw).join(" "))
            }
            Err(e) => {
                trace::llm_error("anthropic", &self.model, "evaluate", &e);
                Err(e)
            }
        }
    }
}

/// Convert canonical history into Anthropic message objects.
///
/// Tool calls become `tool_use` content blocks; tool results become
/// `tool_result` blocks carried in a user message.
fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                super::Role::User => "user",
                super::Role::Assistant => "assistant",
            };
            match &msg.content {
                MessageContent::Text(text) => json!({ "role": role, "content": text }),
                MessageContent::ToolCalls(calls) => json!({
                    "role": role,
                    "content": calls.iter().map(|tc| json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": tc.args,
                    })).collect::<Vec<_>>(),
                }),
                MessageContent::ToolResults(results) => json!({
                    "role": role,
                    "content": results.iter().map(|tr| json!({
                        "type": "tool_result",
                        "tool_use_id": tr.tool_call_id,
                        "content": tr.content,
                        "is_error": tr.is_error,
                    })).collect::<Vec<_>>(),
                }),
            }
        })
        .collect()
}

fn to_wire_tools(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })
        })
        .collect()
}

fn text_blocks(raw: &Value) -> Vec<String> {
    raw["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_response(raw: &Value) -> Result<Response> {
    let mut text_content = String::new();
    let mut tool_calls = Vec::new();

    for block in raw["content"].as_array().map(Vec::as_slice).unwrap_or(&[]) {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(text) = block["text"].as_str() {
                    text_content.push_str(text);
                }
            }
            Some("tool_use") => {
                tool_calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    args: block.get("input").cloned().unwrap_or_else(|| json!({})),
                });
            }
            _ => {}
        }
    }

    let stop_reason = match raw["stop_reason"].as_str() {
        Some("end_turn") => StopReason::Stop,
        Some("tool_use") => StopReason::ToolCalls,
        Some("max_tokens") => StopReason::MaxTokens,
        _ => StopReason::Other,
    };

    Ok(Response { text_content: text_content.trim().to_string(), tool_calls, stop_reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolResult;

    #[test]
    fn test_wire_messages_text() {
        let wire = to_wire_messages(&[Message::user("roll the dice")]);
        assert_eq!(wire, vec![json!({ "role": "user", "content": "roll the dice" })]);
    }

    #[test]
    fn test_wire_messages_tool_calls_and_results() {
        let history = vec![
            Message::tool_calls(vec![ToolCall {
                id: "tc1".to_string(),
                name: "dice_roll".to_string(),
                args: json!({"sides": 6}),
            }]),
            Message::tool_results(vec![ToolResult {
                tool_call_id: "tc1".to_string(),
                content: "4".to_string(),
                is_error: false,
            }]),
        ];

        let wire = to_wire_messages(&history);
        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["content"][0]["type"], "tool_use");
        assert_eq!(wire[0]["content"][0]["name"], "dice_roll");
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(wire[1]["content"][0]["type"], "tool_result");
        assert_eq!(wire[1]["content"][0]["tool_use_id"], "tc1");
        assert_eq!(wire[1]["content"][0]["is_error"], false);
    }

    #[test]
    fn test_parse_response_text_only() {
        let raw = json!({
            "content": [{"type": "text", "text": "  You rolled a 4.  "}],
            "stop_reason": "end_turn",
        });
        let response = parse_response(&raw).unwrap();
        assert_eq!(response.text_content, "You rolled a 4.");
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.stop_reason, StopReason::Stop);
    }

    #[test]
    fn test_parse_response_tool_use() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "Rolling now."},
                {"type": "tool_use", "id": "tc1", "name": "dice_roll", "input": {"sides": 6}},
            ],
            "stop_reason": "tool_use",
        });
        let response = parse_response(&raw).unwrap();
        assert_eq!(response.text_content, "Rolling now.");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "dice_roll");
        assert_eq!(response.tool_calls[0].args, json!({"sides": 6}));
        assert_eq!(response.stop_reason, StopReason::ToolCalls);
    }

    #[test]
    fn test_stop_reason_unknown_maps_to_other() {
        let raw = json!({ "content": [], "stop_reason": "pause_turn" });
        assert_eq!(parse_response(&raw).unwrap().stop_reason, StopReason::Other);

        // missing stop_reason is Other too, never Stop
        let raw = json!({ "content": [] });
        assert_eq!(parse_response(&raw).unwrap().stop_reason, StopReason::Other);

        let raw = json!({ "content": [], "stop_reason": "max_tokens" });
        assert_eq!(parse_response(&raw).unwrap().stop_reason, StopReason::MaxTokens);
    }

    #[test]
    fn test_text_blocks_joins_only_text() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "{\"passed\": true,"},
                {"type": "tool_use", "id": "x", "name": "y", "input": {}},
                {"type": "text", "text": "\"reasoning\": \"ok\"}"},
            ],
        });
        assert_eq!(text_blocks(&raw).len(), 2);
    }
}
