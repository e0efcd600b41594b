//! OpenAI-compatible chat-completions adapter.
//!
//! Targets Azure OpenAI's URL layout (`/openai/deployments/{model}/chat/completions`
//! with an `api-key` header) but speaks the standard chat-completions wire
//! format, so any compatible endpoint works by pointing the base URL at it.

use serde_json::Value;

use maestro_domain::config::ReasonerConfig;
use maestro_domain::error::{Error, Result};
use maestro_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};

use crate::{ChatRequest, ChatResponse, ReasoningProvider, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Adapter for an Azure-OpenAI-style chat completions endpoint.
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    api_version: String,
    deployment: String,
    default_temperature: f32,
    default_max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create the adapter from the reasoner configuration.
    ///
    /// The API key is read from the environment variable named by
    /// `api_key_env`; a missing key is a startup error, not a per-request
    /// surprise.
    pub fn from_config(cfg: &ReasonerConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
            Error::Auth(format!(
                "environment variable '{}' (reasoner API key) not set",
                cfg.api_key_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            id: "reasoner".into(),
            base_url: cfg.endpoint.trim_end_matches('/').to_string(),
            api_key,
            api_version: cfg.api_version.clone(),
            deployment: cfg.deployment.clone(),
            default_temperature: cfg.temperature,
            default_max_tokens: cfg.max_tokens,
            client,
        })
    }

    /// `{base_url}/openai/deployments/{deployment}/chat/completions?api-version={v}`
    fn chat_url(&self, deployment: &str) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.base_url, deployment, self.api_version
        )
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();

        let mut body = serde_json::json!({
            "messages": messages,
            "temperature": req.temperature.unwrap_or(self.default_temperature),
            "max_tokens": req.max_tokens.unwrap_or(self.default_max_tokens),
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = Value::String("auto".into());
        }
        body
    }
}

#[async_trait::async_trait]
impl ReasoningProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let deployment = req.model.as_deref().unwrap_or(&self.deployment);
        let url = self.chat_url(deployment);
        let body = self.build_body(req);

        let response = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(e.to_string())
                } else {
                    Error::Reasoning(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Reasoning(format!(
                "chat completion returned HTTP {status}: {detail}"
            )));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| Error::Reasoning(format!("decoding chat completion: {e}")))?;

        let parsed = parse_chat_response(&raw)?;
        tracing::debug!(
            model = %parsed.model,
            tool_calls = parsed.tool_calls.len(),
            finish_reason = ?parsed.finish_reason,
            "chat completion received"
        );
        Ok(parsed)
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_wire(msg),
        Role::Assistant => assistant_to_wire(msg),
        _ => {
            let text = msg.content.text().unwrap_or_default();
            serde_json::json!({
                "role": role_to_str(msg.role),
                "content": text,
            })
        }
    }
}

fn assistant_to_wire(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }

    if text_parts.is_empty() {
        obj["content"] = Value::Null;
    } else {
        obj["content"] = Value::String(text_parts.join("\n"));
    }
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_wire(msg: &Message) -> Value {
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult {
                tool_use_id,
                content,
                ..
            } = part
            {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "tool_call_id": "",
        "content": msg.content.text().unwrap_or_default(),
    })
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a raw chat-completions response body.
pub(crate) fn parse_chat_response(raw: &Value) -> Result<ChatResponse> {
    let message = raw
        .pointer("/choices/0/message")
        .ok_or_else(|| Error::Reasoning("response has no choices[0].message".into()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(raw_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for raw_call in raw_calls {
            let call_id = raw_call
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let function = raw_call.get("function").cloned().unwrap_or(Value::Null);
            let tool_name = function
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let arguments = parse_arguments(function.get("arguments"));
            if call_id.is_empty() || tool_name.is_empty() {
                tracing::warn!(
                    call_id = %call_id,
                    tool_name = %tool_name,
                    "tool call missing id or name, skipping"
                );
                continue;
            }
            tool_calls.push(ToolCall {
                call_id,
                tool_name,
                arguments,
            });
        }
    }

    let model = raw
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let finish_reason = raw
        .pointer("/choices/0/finish_reason")
        .and_then(Value::as_str)
        .map(str::to_string);
    let usage = raw.get("usage").map(|u| Usage {
        prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        completion_tokens: u
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
    });

    Ok(ChatResponse {
        content,
        tool_calls,
        model,
        finish_reason,
        usage,
    })
}

/// Tool-call arguments arrive as a JSON *string*; malformed or empty
/// arguments degrade to an empty object rather than poisoning the round.
fn parse_arguments(raw: Option<&Value>) -> Value {
    let text = raw.and_then(Value::as_str).unwrap_or_default();
    if text.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "tool call arguments are not valid JSON, defaulting to empty object");
            Value::Object(Default::default())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_answer_parses() {
        let raw = json!({
            "model": "gpt-4o",
            "choices": [{
                "message": { "role": "assistant", "content": "Answer: 42" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
        });
        let resp = parse_chat_response(&raw).unwrap();
        assert_eq!(resp.content, "Answer: 42");
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn tool_calls_parse_with_string_arguments() {
        let raw = json!({
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "lookup", "arguments": "{\"x\": \"foo\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let resp = parse_chat_response(&raw).unwrap();
        assert_eq!(resp.content, "");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].call_id, "call_1");
        assert_eq!(resp.tool_calls[0].tool_name, "lookup");
        assert_eq!(resp.tool_calls[0].arguments["x"], "foo");
    }

    #[test]
    fn empty_arguments_default_to_object() {
        let raw = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "c1",
                        "function": { "name": "ping", "arguments": "" }
                    }]
                }
            }]
        });
        let resp = parse_chat_response(&raw).unwrap();
        assert!(resp.tool_calls[0].arguments.is_object());
    }

    #[test]
    fn malformed_arguments_default_to_object() {
        let raw = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "c1",
                        "function": { "name": "ping", "arguments": "{not json" }
                    }]
                }
            }]
        });
        let resp = parse_chat_response(&raw).unwrap();
        assert!(resp.tool_calls[0].arguments.as_object().unwrap().is_empty());
    }

    #[test]
    fn missing_choices_is_error() {
        assert!(parse_chat_response(&json!({"choices": []})).is_err());
    }

    #[test]
    fn assistant_message_with_calls_serializes_to_wire() {
        let msg = Message::assistant_with_calls(
            "checking",
            &[ToolCall {
                call_id: "c1".into(),
                tool_name: "lookup".into(),
                arguments: json!({"x": 1}),
            }],
        );
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["role"], "assistant");
        assert_eq!(wire["content"], "checking");
        assert_eq!(wire["tool_calls"][0]["id"], "c1");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "lookup");
        // Arguments go over the wire as a JSON string.
        assert!(wire["tool_calls"][0]["function"]["arguments"].is_string());
    }

    #[test]
    fn tool_result_serializes_with_call_id() {
        let msg = Message::tool_result("c1", "{\"value\":42}", false);
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "c1");
        assert_eq!(wire["content"], "{\"value\":42}");
    }

    #[test]
    fn tool_definitions_wrap_as_functions() {
        let def = ToolDefinition {
            name: "lookup".into(),
            description: "Look up".into(),
            parameters: json!({"type": "object"}),
        };
        let wire = tool_to_wire(&def);
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "lookup");
        assert_eq!(wire["function"]["parameters"]["type"], "object");
    }
}
