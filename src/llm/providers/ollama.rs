// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Ollama local model provider implementation
//!
//! Implements the ChatProvider trait against Ollama's `/api/chat`
//! endpoint. The stream is newline-delimited JSON rather than SSE, and
//! tool-call arguments arrive as one complete object. Local models have
//! small context windows, so the adapter sends only the recent history
//! window.

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

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.2:latest";

/// Ollama local model provider
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    system_prompt: String,
}

impl OllamaProvider {
    /// Create a new Ollama provider with the default base URL
    pub fn new(model: Option<String>, system_prompt: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_OLLAMA_URL, model, system_prompt)
    }

    /// Create with a custom base URL
    pub fn with_base_url(
        base_url: impl Into<String>,
        model: Option<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_prompt: system_prompt.into(),
        }
    }

    /// Convert the windowed history to Ollama messages.
    ///
    /// Ollama has no tool-call ids: calls ride on an assistant message's
    /// `tool_calls` array and results come back as plain `tool` messages.
    fn convert_history(&self, history: &[Turn]) -> Vec<OllamaMessage> {
        let window = window_history(history, HISTORY_WINDOW);

        let mut messages = vec![OllamaMessage {
            role: "system".to_string(),
            content: self.system_prompt.clone(),
            tool_calls: None,
        }];

        for turn in window {
            let message = match &turn.content {
                TurnContent::Text { text } => OllamaMessage {
                    role: match turn.role {
                        Role::User => "user".to_string(),
                        Role::Assistant => "assistant".to_string(),
                    },
                    content: text.clone(),
                    tool_calls: None,
                },
                TurnContent::ToolCall { name, args, .. } => OllamaMessage {
                    role: "assistant".to_string(),
                    content: String::new(),
                    tool_calls: Some(vec![OllamaToolCall {
                        function: OllamaFunctionCall {
                            name: name.clone(),
                            arguments: args.clone(),
                        },
                    }]),
                },
                TurnContent::ToolResult { content, .. } => OllamaMessage {
                    role: "tool".to_string(),
                    content: content.clone(),
                    tool_calls: None,
                },
            };
            messages.push(message);
        }

        messages
    }

    fn convert_tool(&self, tool: &ToolDefinition) -> OllamaTool {
        OllamaTool {
            tool_type: "function".to_string(),
            function: OllamaFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: serde_json::json!({
                    "type": tool.input_schema.schema_type,
                    "properties": tool.input_schema.properties,
                }),
            },
        }
    }

    fn build_request(&self, history: &[Turn], tools_enabled: bool) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            messages: self.convert_history(history),
            stream: true,
            options: OllamaOptions {
                num_predict: MAX_OUTPUT_TOKENS as i64,
            },
            tools: if tools_enabled {
                Some(vec![self.convert_tool(&search_tool())])
            } else {
                None
            },
        }
    }

    /// Parse an error response body
    fn parse_error(&self, status: u16, body: &str) -> KaapiError {
        if let Ok(error_response) = serde_json::from_str::<OllamaError>(body) {
            KaapiError::Api(ApiError::ServerError {
                status,
                message: error_response.error,
            })
        } else {
            KaapiError::Api(ApiError::ServerError {
                status,
                message: body.to_string(),
            })
        }
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn start_turn(&self, history: &[Turn], tools_enabled: bool) -> Result<TurnStream> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_request(history, tools_enabled);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    KaapiError::Api(ApiError::Network(
                        "Ollama is not running. Start it with 'ollama serve'".to_string(),
                    ))
                } else {
                    KaapiError::Http(e)
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body));
        }

        let mut byte_stream = response.bytes_stream();

        let stream = try_stream! {
            let mut buffer = String::new();
            let mut saw_tool_call = false;
            let mut finish: Option<FinishReason> = None;

            while let Some(chunk) = byte_stream.next().await {
                let bytes = chunk
                    .map_err(|e| KaapiError::Api(ApiError::StreamError(e.to_string())))?;
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].to_string();
                    buffer.drain(..=pos);
                    if line.trim().is_empty() {
                        continue;
                    }
                    let Ok(chunk) = serde_json::from_str::<OllamaStreamChunk>(&line) else {
                        continue;
                    };

                    if let Some(message) = chunk.message {
                        if !message.content.is_empty() {
                            yield TurnEvent::TextDelta(message.content);
                        }
                        if let Some(tool_calls) = message.tool_calls {
                            // Only the first call is honored.
                            if let Some(tc) = tool_calls.into_iter().next() {
                                if !saw_tool_call {
                                    saw_tool_call = true;
                                    yield TurnEvent::ToolCallStart {
                                        id: None,
                                        name: tc.function.name,
                                    };
                                    yield TurnEvent::ToolCallDelta {
                                        fragment: tc.function.arguments.to_string(),
                                    };
                                }
                            }
                        }
                    }
                    if chunk.done {
                        finish = Some(match chunk.done_reason.as_deref() {
                            _ if saw_tool_call => FinishReason::ToolCall,
                            Some("length") => FinishReason::Length,
                            _ => FinishReason::Stop,
                        });
                    }
                }
            }

            let reason = match finish {
                Some(r) => r,
                None if saw_tool_call => FinishReason::ToolCall,
                None => FinishReason::Stop,
            };
            yield TurnEvent::TurnComplete { reason };
        };

        Ok(Box::pin(stream))
    }
}

// Ollama API types

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OllamaTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    /// Arrives as a complete JSON object, not a string
    arguments: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: i64,
}

#[derive(Debug, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OllamaFunction,
}

#[derive(Debug, Serialize)]
struct OllamaFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}
