// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! OpenAI Chat Completions provider implementation
//!
//! Implements the ChatProvider trait over the streaming chat completions
//! API. Tool-call arguments arrive as string fragments split across SSE
//! chunks; the adapter forwards them in arrival order and lets the
//! accumulator reassemble.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, KaapiError, Result};
use crate::llm::message::{Role, Turn, TurnContent};
use crate::llm::provider::{
    ChatProvider, FinishReason, ToolDefinition, TurnEvent, TurnStream, MAX_OUTPUT_TOKENS,
};
use crate::tools::search_tool;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI chat completions provider
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    system_prompt: String,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider
    pub fn new(
        api_key: impl Into<String>,
        model: Option<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_prompt: system_prompt.into(),
        }
    }

    /// Create with a custom base URL
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: Option<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_prompt: system_prompt.into(),
        }
    }

    /// Convert internal turns to OpenAI messages.
    ///
    /// The system prompt leads; tool calls ride on an assistant message
    /// with a `tool_calls` array; tool results become `role: "tool"`
    /// messages keyed by `tool_call_id`. The API rejects orphaned tool
    /// messages, which is why the engine only ever appends them paired.
    fn convert_history(&self, history: &[Turn]) -> Vec<OpenAiMessage> {
        let mut messages = vec![OpenAiMessage {
            role: "system".to_string(),
            content: Some(self.system_prompt.clone()),
            tool_calls: None,
            tool_call_id: None,
        }];

        for turn in history {
            let message = match &turn.content {
                TurnContent::Text { text } => OpenAiMessage {
                    role: match turn.role {
                        Role::User => "user".to_string(),
                        Role::Assistant => "assistant".to_string(),
                    },
                    content: Some(text.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                TurnContent::ToolCall { id, name, args } => OpenAiMessage {
                    role: "assistant".to_string(),
                    content: None,
                    tool_calls: Some(vec![OpenAiToolCall {
                        id: id.clone(),
                        call_type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: name.clone(),
                            arguments: args.to_string(),
                        },
                    }]),
                    tool_call_id: None,
                },
                TurnContent::ToolResult { id, content, .. } => OpenAiMessage {
                    role: "tool".to_string(),
                    content: Some(content.clone()),
                    tool_calls: None,
                    tool_call_id: Some(id.clone()),
                },
            };
            messages.push(message);
        }

        messages
    }

    fn convert_tool(&self, tool: &ToolDefinition) -> OpenAiTool {
        OpenAiTool {
            tool_type: "function".to_string(),
            function: OpenAiFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: serde_json::json!({
                    "type": tool.input_schema.schema_type,
                    "properties": tool.input_schema.properties,
                }),
            },
        }
    }

    fn build_request(&self, history: &[Turn], tools_enabled: bool) -> OpenAiRequest {
        OpenAiRequest {
            model: self.model.clone(),
            messages: self.convert_history(history),
            tools: if tools_enabled {
                Some(vec![self.convert_tool(&search_tool())])
            } else {
                None
            },
            max_tokens: MAX_OUTPUT_TOKENS,
            stream: true,
        }
    }

    /// Parse an error response body
    fn parse_error(&self, status: u16, body: &str) -> KaapiError {
        if let Ok(error_response) = serde_json::from_str::<OpenAiError>(body) {
            let detail = error_response.error;
            match (status, detail.error_type.as_deref()) {
                (429, _) | (_, Some("insufficient_quota")) => {
                    KaapiError::Api(ApiError::RateLimited(60))
                }
                (401, _) => KaapiError::Api(ApiError::AuthenticationFailed),
                _ => KaapiError::Api(ApiError::ServerError {
                    status,
                    message: detail.message,
                }),
            }
        } else {
            KaapiError::Api(ApiError::ServerError {
                status,
                message: body.to_string(),
            })
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn start_turn(&self, history: &[Turn], tools_enabled: bool) -> Result<TurnStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request(history, tools_enabled);

        let response = self
            .client
            .post(&url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body));
        }

        let mut byte_stream = response.bytes_stream();

        let stream = try_stream! {
            let mut buffer = String::new();
            let mut call_open = false;
            let mut finish: Option<FinishReason> = None;

            'outer: while let Some(chunk) = byte_stream.next().await {
                let bytes = chunk
                    .map_err(|e| KaapiError::Api(ApiError::StreamError(e.to_string())))?;
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    let Ok(chunk) = serde_json::from_str::<OpenAiStreamChunk>(data) else {
                        continue;
                    };
                    let Some(choice) = chunk.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            yield TurnEvent::TextDelta(text);
                        }
                    }
                    if let Some(tool_calls) = choice.delta.tool_calls {
                        // One tool round-trip per user message; only the
                        // first declared call is honored.
                        for tc in tool_calls.into_iter().filter(|tc| tc.index == 0) {
                            if let Some(function) = tc.function {
                                if let Some(name) = function.name {
                                    call_open = true;
                                    yield TurnEvent::ToolCallStart { id: tc.id.clone(), name };
                                }
                                if let Some(fragment) = function.arguments {
                                    if call_open && !fragment.is_empty() {
                                        yield TurnEvent::ToolCallDelta { fragment };
                                    }
                                }
                            }
                        }
                    }
                    if let Some(reason) = choice.finish_reason.as_deref() {
                        finish = Some(match reason {
                            "tool_calls" | "function_call" => FinishReason::ToolCall,
                            "length" => FinishReason::Length,
                            _ => FinishReason::Stop,
                        });
                    }
                }
            }

            let reason = match finish {
                Some(r) => r,
                None if call_open => FinishReason::ToolCall,
                None => FinishReason::Stop,
            };
            yield TurnEvent::TurnComplete { reason };
        };

        Ok(Box::pin(stream))
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    /// Argument JSON serialized as a string, per the wire format
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<OpenAiStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}
