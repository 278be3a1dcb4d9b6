// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Anthropic Claude provider implementation
//!
//! Implements the ChatProvider trait over the Messages API (SSE). The wire
//! format is event-typed: tool invocations open with `content_block_start`
//! and stream their argument JSON through `input_json_delta` fragments.

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

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    system_prompt: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(
        api_key: impl Into<String>,
        model: Option<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
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

    /// Convert internal turns to Anthropic messages.
    ///
    /// Tool calls become `tool_use` blocks on an assistant message; tool
    /// results become `tool_result` blocks on a user message. The API
    /// validates that every `tool_use` has a following `tool_result`, so
    /// orphaned tool turns would be rejected upstream.
    fn convert_history(&self, history: &[Turn]) -> Vec<AnthropicMessage> {
        history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                let content = match &turn.content {
                    TurnContent::Text { text } => AnthropicContent::Text(text.clone()),
                    TurnContent::ToolCall { id, name, args } => {
                        AnthropicContent::Blocks(vec![AnthropicContentBlock::ToolUse {
                            id: id.clone(),
                            name: name.clone(),
                            input: args.clone(),
                        }])
                    }
                    TurnContent::ToolResult { id, content, .. } => {
                        AnthropicContent::Blocks(vec![AnthropicContentBlock::ToolResult {
                            tool_use_id: id.clone(),
                            content: content.clone(),
                        }])
                    }
                };
                AnthropicMessage {
                    role: role.to_string(),
                    content,
                }
            })
            .collect()
    }

    fn convert_tool(&self, tool: &ToolDefinition) -> AnthropicTool {
        AnthropicTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: serde_json::json!({
                "type": tool.input_schema.schema_type,
                "properties": tool.input_schema.properties,
            }),
        }
    }

    fn build_request(&self, history: &[Turn], tools_enabled: bool) -> AnthropicRequest {
        AnthropicRequest {
            model: self.model.clone(),
            messages: self.convert_history(history),
            system: Some(self.system_prompt.clone()),
            max_tokens: MAX_OUTPUT_TOKENS,
            tools: if tools_enabled {
                Some(vec![self.convert_tool(&search_tool())])
            } else {
                None
            },
            stream: true,
        }
    }

    /// Parse an error response body
    fn parse_error(&self, status: u16, body: &str) -> KaapiError {
        if let Ok(error_response) = serde_json::from_str::<AnthropicError>(body) {
            match error_response.error.error_type.as_str() {
                "authentication_error" => KaapiError::Api(ApiError::AuthenticationFailed),
                "rate_limit_error" => KaapiError::Api(ApiError::RateLimited(60)),
                _ => KaapiError::Api(ApiError::ServerError {
                    status,
                    message: error_response.error.message,
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
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn start_turn(&self, history: &[Turn], tools_enabled: bool) -> Result<TurnStream> {
        let body = self.build_request(history, tools_enabled);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
            let mut tool_block_index: Option<u64> = None;
            let mut finish: Option<FinishReason> = None;

            while let Some(chunk) = byte_stream.next().await {
                let bytes = chunk
                    .map_err(|e| KaapiError::Api(ApiError::StreamError(e.to_string())))?;
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // SSE events are separated by a blank line
                while let Some(pos) = buffer.find("\n\n") {
                    let event_str = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);

                    for event in parse_sse_event(&event_str, &mut tool_block_index) {
                        if let TurnEvent::TurnComplete { reason } = event {
                            finish = Some(reason);
                        } else {
                            yield event;
                        }
                    }
                }
            }

            yield TurnEvent::TurnComplete {
                reason: finish.unwrap_or(FinishReason::Stop),
            };
        };

        Ok(Box::pin(stream))
    }
}

/// Parse a Server-Sent Event into zero or more normalized events.
///
/// `tool_block_index` tracks which content block (if any) is an open tool
/// invocation so that only its `input_json_delta` fragments are forwarded.
fn parse_sse_event(event_str: &str, tool_block_index: &mut Option<u64>) -> Vec<TurnEvent> {
    let mut event_type = None;
    let mut data = None;

    for line in event_str.lines() {
        if let Some(rest) = line.strip_prefix("event: ") {
            event_type = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("data: ") {
            data = Some(rest.to_string());
        }
    }

    let (Some(event_type), Some(data)) = (event_type, data) else {
        return vec![];
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&data) else {
        return vec![];
    };

    match event_type.as_str() {
        "content_block_start" => {
            let block = &parsed["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                *tool_block_index = parsed["index"].as_u64();
                if let Some(name) = block["name"].as_str() {
                    return vec![TurnEvent::ToolCallStart {
                        id: block["id"].as_str().map(String::from),
                        name: name.to_string(),
                    }];
                }
            }
            vec![]
        }
        "content_block_delta" => {
            let delta = &parsed["delta"];
            match delta["type"].as_str() {
                Some("text_delta") => delta["text"]
                    .as_str()
                    .map(|t| vec![TurnEvent::TextDelta(t.to_string())])
                    .unwrap_or_default(),
                Some("input_json_delta") if parsed["index"].as_u64() == *tool_block_index => {
                    delta["partial_json"]
                        .as_str()
                        .filter(|f| !f.is_empty())
                        .map(|f| {
                            vec![TurnEvent::ToolCallDelta {
                                fragment: f.to_string(),
                            }]
                        })
                        .unwrap_or_default()
                }
                _ => vec![],
            }
        }
        "content_block_stop" => {
            if parsed["index"].as_u64() == *tool_block_index {
                *tool_block_index = None;
            }
            vec![]
        }
        "message_delta" => {
            let reason = match parsed["delta"]["stop_reason"].as_str() {
                Some("tool_use") => Some(FinishReason::ToolCall),
                Some("max_tokens") => Some(FinishReason::Length),
                Some(_) => Some(FinishReason::Stop),
                None => None,
            };
            reason
                .map(|reason| vec![TurnEvent::TurnComplete { reason }])
                .unwrap_or_default()
        }
        _ => vec![],
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
