// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Google Gemini provider implementation
//!
//! Implements the ChatProvider trait against the `streamGenerateContent`
//! endpoint (SSE). Gemini delivers function-call arguments as one complete
//! JSON object inside a part, so the adapter emits a single argument
//! fragment per invocation.

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

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Google Gemini provider
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    system_prompt: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider
    pub fn new(
        api_key: impl Into<String>,
        model: Option<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: GEMINI_API_URL.to_string(),
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

    /// Convert internal turns to Gemini contents.
    ///
    /// Tool calls become `functionCall` parts on the model role; tool
    /// results become `functionResponse` parts on the user role, wrapped in
    /// a `{"result": ...}` object the way the service expects.
    fn convert_history(&self, history: &[Turn]) -> Vec<GeminiContent> {
        history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                let part = match &turn.content {
                    TurnContent::Text { text } => GeminiPart {
                        text: Some(text.clone()),
                        function_call: None,
                        function_response: None,
                    },
                    TurnContent::ToolCall { name, args, .. } => GeminiPart {
                        text: None,
                        function_call: Some(GeminiFunctionCall {
                            name: name.clone(),
                            args: args.clone(),
                        }),
                        function_response: None,
                    },
                    TurnContent::ToolResult { name, content, .. } => GeminiPart {
                        text: None,
                        function_call: None,
                        function_response: Some(GeminiFunctionResponse {
                            name: name.clone(),
                            response: serde_json::json!({ "result": content }),
                        }),
                    },
                };
                GeminiContent {
                    role: role.to_string(),
                    parts: vec![part],
                }
            })
            .collect()
    }

    fn convert_tool(&self, tool: &ToolDefinition) -> GeminiTool {
        GeminiTool {
            function_declarations: vec![GeminiFunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: serde_json::json!({
                    "type": tool.input_schema.schema_type,
                    "properties": tool.input_schema.properties,
                }),
            }],
        }
    }

    fn build_request(&self, history: &[Turn], tools_enabled: bool) -> GeminiRequest {
        GeminiRequest {
            contents: self.convert_history(history),
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiTextPart {
                    text: self.system_prompt.clone(),
                }],
            }),
            tools: if tools_enabled {
                Some(vec![self.convert_tool(&search_tool())])
            } else {
                None
            },
            generation_config: GeminiGenerationConfig {
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        }
    }

    /// Parse an error response body
    fn parse_error(&self, status: u16, body: &str) -> KaapiError {
        if let Ok(error_response) = serde_json::from_str::<GeminiError>(body) {
            let detail = error_response.error;
            match (status, detail.status.as_deref()) {
                (429, _) | (_, Some("RESOURCE_EXHAUSTED")) => {
                    KaapiError::Api(ApiError::RateLimited(60))
                }
                (401, _) | (403, _) => KaapiError::Api(ApiError::AuthenticationFailed),
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
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn start_turn(&self, history: &[Turn], tools_enabled: bool) -> Result<TurnStream> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        );
        let body = self.build_request(history, tools_enabled);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
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
            let mut saw_tool_call = false;
            let mut finish: Option<FinishReason> = None;

            while let Some(chunk) = byte_stream.next().await {
                let bytes = chunk
                    .map_err(|e| KaapiError::Api(ApiError::StreamError(e.to_string())))?;
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let Ok(chunk) = serde_json::from_str::<GeminiStreamChunk>(data) else {
                        continue;
                    };

                    let Some(candidate) = chunk.candidates.into_iter().next() else {
                        continue;
                    };
                    if let Some(content) = candidate.content {
                        for part in content.parts {
                            if let Some(text) = part.text {
                                yield TurnEvent::TextDelta(text);
                            } else if let Some(call) = part.function_call {
                                saw_tool_call = true;
                                yield TurnEvent::ToolCallStart {
                                    id: None,
                                    name: call.name,
                                };
                                yield TurnEvent::ToolCallDelta {
                                    fragment: call.args.to_string(),
                                };
                            }
                        }
                    }
                    if let Some(reason) = candidate.finish_reason.as_deref() {
                        finish = Some(match reason {
                            "MAX_TOKENS" => FinishReason::Length,
                            _ if saw_tool_call => FinishReason::ToolCall,
                            _ => FinishReason::Stop,
                        });
                    }
                }
            }

            // Gemini marks function-call turns STOP; the tool-call flag wins.
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

// Gemini API types

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiTextPart>,
}

#[derive(Debug, Serialize)]
struct GeminiTextPart {
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "functionCall", skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(rename = "functionResponse", skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GeminiTool {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GeminiProvider {
        GeminiProvider::new("test-key", None, "You recommend coffee.")
    }

    #[test]
    fn test_provider_name() {
        assert_eq!(provider().name(), "gemini");
    }

    #[test]
    fn test_default_model() {
        assert_eq!(provider().model, DEFAULT_MODEL);
    }

    #[test]
    fn test_model_override() {
        let p = GeminiProvider::new("k", Some("gemini-1.5-pro".to_string()), "prompt");
        assert_eq!(p.model, "gemini-1.5-pro");
    }

    #[test]
    fn test_convert_history_roles() {
        let history = vec![Turn::user("hi"), Turn::assistant("hello")];
        let contents = provider().convert_history(&history);

        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].role, "user");
        assert_eq!(contents[1].role, "model");
        assert_eq!(contents[0].parts[0].text.as_deref(), Some("hi"));
    }

    #[test]
    fn test_convert_history_tool_call_goes_on_model_role() {
        let history = vec![Turn::tool_call(
            "call_1",
            "search_catalog",
            serde_json::json!({"roast_level": "dark"}),
        )];
        let contents = provider().convert_history(&history);

        assert_eq!(contents[0].role, "model");
        let call = contents[0].parts[0].function_call.as_ref().unwrap();
        assert_eq!(call.name, "search_catalog");
        assert_eq!(call.args["roast_level"], "dark");
    }

    #[test]
    fn test_convert_history_tool_result_wraps_in_result_object() {
        let history = vec![Turn::tool_result("call_1", "search_catalog", "- A | B")];
        let contents = provider().convert_history(&history);

        assert_eq!(contents[0].role, "user");
        let resp = contents[0].parts[0].function_response.as_ref().unwrap();
        assert_eq!(resp.name, "search_catalog");
        assert_eq!(resp.response["result"], "- A | B");
    }

    #[test]
    fn test_build_request_declares_tool_when_enabled() {
        let request = provider().build_request(&[Turn::user("hi")], true);
        let tools = request.tools.unwrap();
        assert_eq!(tools[0].function_declarations[0].name, "search_catalog");
    }

    #[test]
    fn test_build_request_omits_tool_when_disabled() {
        let request = provider().build_request(&[Turn::user("hi")], false);
        assert!(request.tools.is_none());
    }

    #[test]
    fn test_build_request_carries_system_prompt_and_token_cap() {
        let request = provider().build_request(&[Turn::user("hi")], true);
        assert_eq!(
            request.system_instruction.unwrap().parts[0].text,
            "You recommend coffee."
        );
        assert_eq!(request.generation_config.max_output_tokens, MAX_OUTPUT_TOKENS);
    }

    #[test]
    fn test_parse_error_resource_exhausted_is_rate_limited() {
        let body = r#"{"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}}"#;
        let err = provider().parse_error(429, body);
        assert!(matches!(
            err,
            KaapiError::Api(ApiError::RateLimited(_))
        ));
    }

    #[test]
    fn test_parse_error_permission_denied() {
        let body = r#"{"error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}}"#;
        let err = provider().parse_error(403, body);
        assert!(matches!(
            err,
            KaapiError::Api(ApiError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_parse_error_plain_body() {
        let err = provider().parse_error(500, "upstream broke");
        match err {
            KaapiError::Api(ApiError::ServerError { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream broke");
            }
            _ => panic!("Expected ServerError"),
        }
    }

    #[test]
    fn test_stream_chunk_with_function_call_deserializes() {
        let data = r#"{"candidates": [{"content": {"role": "model", "parts": [{"functionCall": {"name": "search_catalog", "args": {"brew_method": "Espresso"}}}]}}]}"#;
        let chunk: GeminiStreamChunk = serde_json::from_str(data).unwrap();
        let part = &chunk.candidates[0].content.as_ref().unwrap().parts[0];
        let call = part.function_call.as_ref().unwrap();
        assert_eq!(call.name, "search_catalog");
        assert_eq!(call.args["brew_method"], "Espresso");
    }

    #[test]
    fn test_stream_chunk_finish_reason_deserializes() {
        let data = r#"{"candidates": [{"content": {"role": "model", "parts": [{"text": "done"}]}, "finishReason": "STOP"}]}"#;
        let chunk: GeminiStreamChunk = serde_json::from_str(data).unwrap();
        assert_eq!(chunk.candidates[0].finish_reason.as_deref(), Some("STOP"));
    }
}
