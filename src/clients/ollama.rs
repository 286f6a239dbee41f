//! Ollama adapters: chat generation with tool calling, and embeddings.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::json_utils::parse_inline_tool_call;
use super::{Embedder, GenerationClient, UpstreamError, status_error};
use crate::models::{Message, Role, ToolCall};
use crate::tools::{ToolKind, ToolSpec};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ChatToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

// ============================================================================
// Generation
// ============================================================================

pub struct OllamaGenerationClient {
    base_url: String,
    model: String,
    temperature: f64,
    client: Client,
}

impl OllamaGenerationClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            model: model.to_string(),
            temperature: 0.0,
            // Ollama runs locally and may be slow
            client: http_client(Duration::from_secs(300)),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    fn build_request(&self, instruction: &str, history: &[Message], tools: &[ToolSpec]) -> ChatRequest {
        // Tool results carry the tool name so the model can tell them apart
        let call_names: HashMap<&str, &str> = history
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .map(|c| (c.id.as_str(), c.name.as_str()))
            .collect();

        let mut messages = vec![ChatMessage {
            role: "system".to_string(),
            content: instruction.to_string(),
            tool_calls: Vec::new(),
            tool_name: None,
        }];

        messages.extend(history.iter().map(|m| ChatMessage {
            role: role_name(m.role).to_string(),
            content: m.content.clone().unwrap_or_default(),
            tool_calls: m
                .tool_calls
                .iter()
                .map(|c| ChatToolCall {
                    function: ChatFunctionCall {
                        name: c.name.clone(),
                        arguments: c.arguments.clone(),
                    },
                })
                .collect(),
            tool_name: m
                .tool_call_id
                .as_deref()
                .and_then(|id| call_names.get(id))
                .map(|name| name.to_string()),
        }));

        ChatRequest {
            model: self.model.clone(),
            messages,
            tools: tools
                .iter()
                .map(|t| ChatTool {
                    kind: "function",
                    function: ChatFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
            stream: false,
            options: Options {
                temperature: self.temperature,
            },
        }
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert the response into a message, promoting a tool call written as text.
fn into_message(response: ChatMessage, tools: &[ToolSpec]) -> Message {
    let tool_calls: Vec<ToolCall> = response
        .tool_calls
        .into_iter()
        .map(|c| ToolCall::new(c.function.name, c.function.arguments))
        .collect();

    if !tool_calls.is_empty() {
        let content = Some(response.content).filter(|c| !c.trim().is_empty());
        return Message {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        };
    }

    for spec in tools {
        let required = ToolKind::from_name(&spec.name)
            .map(|kind| kind.required_args())
            .unwrap_or(&[]);
        if let Some(arguments) = parse_inline_tool_call(&response.content, &spec.name, required) {
            tracing::debug!(tool = %spec.name, "Promoted inline JSON tool call");
            return Message::assistant_tool_call(ToolCall::new(spec.name.clone(), arguments));
        }
    }

    Message::assistant(response.content)
}

#[async_trait]
impl GenerationClient for OllamaGenerationClient {
    async fn generate(
        &self,
        instruction: &str,
        history: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Message, UpstreamError> {
        let request = self.build_request(instruction, history, tools);
        let url = format!("{}/api/chat", self.base_url);

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(e.to_string()))?;
        Ok(into_message(chat.message, tools))
    }
}

// ============================================================================
// Embeddings
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            model: model.to_string(),
            client: http_client(Duration::from_secs(60)),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, UpstreamError> {
        let url = format!("{}/api/embed", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            input: text,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Malformed(e.to_string()))?;
        body.embeddings
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| UpstreamError::Malformed("response contained no embedding".to_string()))
    }
}
