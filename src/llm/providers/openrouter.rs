// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! OpenRouter provider implementation
//!
//! OpenRouter speaks the chat-completions dialect with its own attribution
//! headers and error envelope. Because routed models vary widely in
//! context size, this adapter sends only the most recent history window.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, KaapiError, Result};
use crate::llm::message::{window_history, Role, Turn, TurnContent};
use crate::llm::provider::{
    ChatProvider, FinishReason, ToolDefinition, TurnEvent, TurnStream, HISTORY_WINDOW,
    MAX_OUTPUT_TOKENS,
};
use crate::tools::search_tool;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";
const APP_REFERER: &str = "https://github.com/kaapi-dev/kaapi";
const APP_TITLE: &str = "kaapi";

/// OpenRouter provider
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    system_prompt: String,
}

impl OpenRouterProvider {
    /// Create a new OpenRouter provider
    pub fn new(
        api_key: impl Into<String>,
        model: Option<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENROUTER_API_URL.to_string(),
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

    /// Convert the windowed history to chat-completions messages.
    fn convert_history(&self, history: &[Turn]) -> Vec<RouterMessage> {
        let window = window_history(history, HISTORY_WINDOW);

        let mut messages = vec![RouterMessage {
            role: "system".to_string(),
            content: Some(self.system_prompt.clone()),
            tool_calls: None,
            tool_call_id: None,
        }];

        for turn in window {
            let message = match &turn.content {
                TurnContent::Text { text } => RouterMessage {
                    role: match turn.role {
                        Role::User => "user".to_string(),
                        Role::Assistant => "assistant".to_string(),
                    },
                    content: Some(text.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                TurnContent::ToolCall { id, name, args } => RouterMessage {
                    role: "assistant".to_string(),
                    content: None,
                    tool_calls: Some(vec![RouterToolCall {
                        id: id.clone(),
                        call_type: "function".to_string(),
                        function: RouterFunctionCall {
                            name: name.clone(),
                            arguments: args.to_string(),
                        },
                    }]),
                    tool_call_id: None,
                },
                TurnContent::ToolResult { id, content, .. } => RouterMessage {
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

    fn convert_tool(&self, tool: &ToolDefinition) -> RouterTool {
        RouterTool {
            tool_type: "function".to_string(),
            function: RouterFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: serde_json::json!({
                    "type": tool.input_schema.schema_type,
                    "properties": tool.input_schema.properties,
                }),
            },
        }
    }

    fn build_request(&self, history: &[Turn], tools_enabled: bool) -> RouterRequest {
        RouterRequest {
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
        if let Ok(error_response) = serde_json::from_str::<RouterError>(body) {
            let detail = error_response.error;
            match detail.code.or(Some(status)) {
                Some(429) => KaapiError::Api(ApiError::RateLimited(60)),
                Some(401) | Some(403) => KaapiError::Api(ApiError::AuthenticationFailed),
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
impl ChatProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn start_turn(&self, history: &[Turn], tools_enabled: bool) -> Result<TurnStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request(history, tools_enabled);

        let response = self
            .client
            .post(&url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", APP_REFERER)
            .header("X-Title", APP_TITLE)
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
                        // OpenRouter interleaves ": OPENROUTER PROCESSING" comments
                        continue;
                    };
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    let Ok(chunk) = serde_json::from_str::<RouterStreamChunk>(data) else {
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

// OpenRouter API types (chat-completions dialect)

#[derive(Debug, Serialize)]
struct RouterRequest {
    model: String,
    messages: Vec<RouterMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<RouterTool>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct RouterMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<RouterToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RouterToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: RouterFunctionCall,
}

#[derive(Debug, Serialize)]
struct RouterFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct RouterTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: RouterFunction,
}

#[derive(Debug, Serialize)]
struct RouterFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RouterStreamChunk {
    #[serde(default)]
    choices: Vec<RouterStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct RouterStreamChoice {
    delta: RouterStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RouterStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<RouterStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct RouterStreamToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<RouterStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct RouterStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RouterError {
    error: RouterErrorDetail,
}

#[derive(Debug, Deserialize)]
struct RouterErrorDetail {
    message: String,
    code: Option<u16>,
}
