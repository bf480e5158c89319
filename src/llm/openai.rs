//! OpenAI Chat Completions API adapter.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{GenerateOptions, Llm, Message, MessageContent, Response, StopReason, Tool, ToolCall};
use crate::trace;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const EVALUATE_MAX_TOKENS: u32 = 500;

pub struct OpenAiAdapter {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    async fn post_completions(&self, body: Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("openai request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("openai returned {status}: {detail}"));
        }

        response
            .json()
            .await
            .context("failed to decode openai response body")
    }
}

#[async_trait]
impl Llm for OpenAiAdapter {
    async fn generate(&self, messages: &[Message], options: &GenerateOptions) -> Result<Response> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": options.max_tokens,
            "messages": to_wire_messages(messages),
        });
        if !options.tools.is_empty() {
            body["tools"] = Value::Array(to_wire_tools(&options.tools));
        }

        trace::llm_request("openai", &self.model, messages.len(), options.tools.len());

        match self.post_completions(body).await {
            Ok(raw) => {
                let response = parse_response(&raw)?;
                trace::llm_response(
                    "openai",
                    &self.model,
                    response.stop_reason.as_str(),
                    response.tool_calls.len(),
                );
                Ok(response)
            }
            Err(e) => {
                trace::llm_error("openai", &self.model, "generate", &e);
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
        });

        trace::llm_request("openai", &self.model, eval_messages.len(), 0);

        match self.post_completions(body).await {
            Ok(raw) => {
                trace::llm_response("openai", &self.model, "evaluate", 0);
                Ok(raw["choices"][0]["message"]["content"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string())
            }
            Err(e) => {
                trace::llm_error("openai", &self.model, "evaluate", &e);
                Err(e)
            }
        }
    }
}

/// Convert canonical history into OpenAI chat messages.
///
/// A tool-result message expands into one `tool`-role message per result,
/// since the Chat Completions API has no combined tool-result message.
fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut wire = Vec::new();

    for msg in messages {
        let role = match msg.role {
            super::Role::User => "user",
            super::Role::Assistant => "assistant",
        };
        match &msg.content {
            MessageContent::Text(text) => wire.push(json!({ "role": role, "content": text })),
            MessageContent::ToolCalls(calls) => wire.push(json!({
                "role": "assistant",
                "tool_calls": calls.iter().map(|tc| json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.args.to_string(),
                    },
                })).collect::<Vec<_>>(),
            })),
            MessageContent::ToolResults(results) => {
                for tr in results {
                    wire.push(json!({
                        "role": "tool",
                        "tool_call_id": tr.tool_call_id,
                        "content": tr.content,
                    }));
                }
            }
        }
    }

    wire
}

fn to_wire_tools(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                },
            })
        })
        .collect()
}

fn parse_response(raw: &Value) -> Result<Response> {
    let choice = &raw["choices"][0];
    let message = &choice["message"];

    let text_content = message["content"].as_str().unwrap_or_default().trim().to_string();

    let mut tool_calls = Vec::new();
    for tc in message["tool_calls"].as_array().map(Vec::as_slice).unwrap_or(&[]) {
        if tc["type"] != "function" {
            continue;
        }
        let arguments = tc["function"]["arguments"].as_str().unwrap_or("{}");
        tool_calls.push(ToolCall {
            id: tc["id"].as_str().unwrap_or_default().to_string(),
            name: tc["function"]["name"].as_str().unwrap_or_default().to_string(),
            args: serde_json::from_str(arguments)
                .with_context(|| format!("invalid tool-call arguments: {arguments}"))?,
        });
    }

    let stop_reason = match choice["finish_reason"].as_str() {
        Some("stop") => StopReason::Stop,
        Some("tool_calls") => StopReason::ToolCalls,
        Some("length") => StopReason::MaxTokens,
        _ => StopReason::Other,
    };

    Ok(Response { text_content, tool_calls, stop_reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolResult;

    #[test]
    fn test_wire_messages_tool_results_expand() {
        let history = vec![Message::tool_results(vec![
            ToolResult { tool_call_id: "a".to_string(), content: "4".to_string(), is_error: false },
            ToolResult { tool_call_id: "b".to_string(), content: "heads".to_string(), is_error: true },
        ])];

        let wire = to_wire_messages(&history);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "a");
        assert_eq!(wire[1]["tool_call_id"], "b");
    }

    #[test]
    fn test_wire_messages_tool_calls_serialize_args() {
        let history = vec![Message::tool_calls(vec![ToolCall {
            id: "tc1".to_string(),
            name: "coin_flip".to_string(),
            args: json!({"count": 2}),
        }])];

        let wire = to_wire_messages(&history);
        assert_eq!(wire[0]["tool_calls"][0]["type"], "function");
        assert_eq!(wire[0]["tool_calls"][0]["function"]["arguments"], r#"{"count":2}"#);
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "tc1",
                        "type": "function",
                        "function": {"name": "dice_roll", "arguments": "{\"sides\":6}"},
                    }],
                },
                "finish_reason": "tool_calls",
            }],
        });
        let response = parse_response(&raw).unwrap();
        assert_eq!(response.text_content, "");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].args, json!({"sides": 6}));
        assert_eq!(response.stop_reason, StopReason::ToolCalls);
    }

    #[test]
    fn test_finish_reason_mapping() {
        let make = |reason: &str| {
            json!({ "choices": [{ "message": {"content": "hi"}, "finish_reason": reason }] })
        };
        assert_eq!(parse_response(&make("stop")).unwrap().stop_reason, StopReason::Stop);
        assert_eq!(parse_response(&make("length")).unwrap().stop_reason, StopReason::MaxTokens);
        assert_eq!(
            parse_response(&make("content_filter")).unwrap().stop_reason,
            StopReason::Other
        );
    }

    #[test]
    fn test_parse_response_rejects_malformed_arguments() {
        let raw = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "tc1",
                        "type": "function",
                        "function": {"name": "dice_roll", "arguments": "not json"},
                    }],
                },
                "finish_reason": "tool_calls",
            }],
        });
        assert!(parse_response(&raw).is_err());
    }
}
