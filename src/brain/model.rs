//! Language model client
//!
//! Speaks the OpenAI chat/completions dialect, which most hosted and local
//! providers (Ollama, vLLM, LM Studio) also accept.

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One message of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Output of a tool, answering the call with `tool_call_id`
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Tokens consumed by one generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Result of one generation
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
    pub usage: Option<TokenCount>,
}

/// Chat model able to request tool calls
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate the next assistant message. `tools` are OpenAI-style function declarations.
    async fn generate(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<ModelReply>;

    fn name(&self) -> &str;
}

/// Client for any OpenAI-compatible `chat/completions` endpoint
pub struct OpenAiCompatibleModel {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatibleModel {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        let api_key = config.resolve_api_key();
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "No API key found, sending unauthenticated requests"
            );
        }
        Self::new(config.base_url.clone(), api_key, config.model.clone())
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleModel {
    async fn generate(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<ModelReply> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(to_wire).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!("{}: {}", status, text)));
        }

        let json: Value = response.json().await?;
        parse_completion(&json)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Message in the provider's wire shape; tool arguments travel as a JSON string
fn to_wire(message: &ChatMessage) -> Value {
    let mut wire = json!({
        "role": message.role,
        "content": message.content,
    });

    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect();
    }
    if let Some(id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(id);
    }

    wire
}

fn parse_completion(json: &Value) -> Result<ModelReply> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| Error::Model("No choices in response".to_string()))?;

    let message = &choice["message"];
    let content = message["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    let finish_reason = choice["finish_reason"]
        .as_str()
        .unwrap_or("stop")
        .to_string();

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(i, call)| {
                    let name = call["function"]["name"].as_str()?.to_string();
                    let id = call["id"]
                        .as_str()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("call_{}", i));
                    // Unparseable arguments are kept raw so the tool reports them
                    let arguments = match &call["function"]["arguments"] {
                        Value::String(raw) => {
                            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                        }
                        other => other.clone(),
                    };
                    Some(ToolCall {
                        id,
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ModelReply {
        content,
        tool_calls,
        finish_reason,
        usage: parse_usage(json),
    })
}

/// OpenAI `usage` block, or Ollama's `prompt_eval_count` / `eval_count`
fn parse_usage(json: &Value) -> Option<TokenCount> {
    if let Some(usage) = json.get("usage").filter(|u| u.is_object()) {
        return Some(TokenCount {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
        });
    }

    match (json["prompt_eval_count"].as_u64(), json["eval_count"].as_u64()) {
        (Some(input_tokens), Some(output_tokens)) => Some(TokenCount {
            input_tokens,
            output_tokens,
        }),
        _ => None,
    }
}
