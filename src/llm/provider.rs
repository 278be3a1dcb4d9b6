// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Provider trait and normalized stream events
//!
//! Defines the abstraction layer over the LLM backends. Each adapter turns
//! its backend's streaming wire format into [`TurnEvent`]s and turns the
//! internal [`Turn`] history back into the backend's request shape.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use uuid::Uuid;

use crate::error::Result;
use crate::llm::message::Turn;

/// Output token cap for every model call.
pub const MAX_OUTPUT_TOKENS: u32 = 600;

/// History window used by adapters with small context budgets.
pub const HISTORY_WINDOW: usize = 6;

/// A pinned, boxed stream of normalized turn events.
pub type TurnStream = Pin<Box<dyn Stream<Item = Result<TurnEvent>> + Send>>;

/// Main trait for chat providers
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Get the provider name (e.g. "gemini", "openai")
    fn name(&self) -> &str;

    /// Start one model turn over the given history.
    ///
    /// When `tools_enabled` is false the search tool is not declared, which
    /// is how the orchestrator forbids chained tool calls on the second
    /// pass. The adapter never mutates any session state; persisting what
    /// the stream produced is the caller's job.
    async fn start_turn(&self, history: &[Turn], tools_enabled: bool) -> Result<TurnStream>;
}

/// Events emitted by an adapter while a turn streams in
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// A visible text fragment; forward to the caller immediately
    TextDelta(String),

    /// The model opened a tool invocation
    ToolCallStart {
        /// Backend-assigned call id, when the wire format has one
        id: Option<String>,
        name: String,
    },

    /// A fragment of the tool-call argument JSON, in arrival order
    ToolCallDelta { fragment: String },

    /// The provider declared the turn finished
    TurnComplete { reason: FinishReason },
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural end of message
    Stop,
    /// The model wants the declared tool executed
    ToolCall,
    /// Output token cap reached
    Length,
}

/// Tool definition declared to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,

    /// Tool description
    pub description: String,

    /// Input schema (JSON Schema)
    pub input_schema: ToolInputSchema,
}

/// Input schema for a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchema {
    /// Schema type (always "object")
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Property definitions
    pub properties: serde_json::Value,

    /// Required properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

/// A completed tool invocation, ready for the resolver
#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    /// Concatenated argument fragments; parsed as JSON by the resolver
    pub arguments_json: String,
}

/// Accumulator for a streamed tool invocation.
///
/// Argument JSON may arrive split across arbitrarily many fragments;
/// fragments are concatenated in arrival order and only parsed once the
/// provider declares the turn finished for a tool-invocation reason.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    buffer: String,
    open: bool,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one stream event into the accumulator.
    pub fn observe(&mut self, event: &TurnEvent) {
        match event {
            TurnEvent::ToolCallStart { id, name } => {
                self.id = id.clone();
                self.name = Some(name.clone());
                self.buffer.clear();
                self.open = true;
            }
            TurnEvent::ToolCallDelta { fragment } => {
                if self.open {
                    self.buffer.push_str(fragment);
                }
            }
            _ => {}
        }
    }

    /// Whether a tool invocation is currently open.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Finalize at the turn boundary.
    ///
    /// Returns the pending call if the model opened one. Backends that do
    /// not assign call ids get a synthesized one so history replay stays
    /// valid on id-carrying wire formats.
    pub fn finish(self) -> Option<PendingToolCall> {
        if !self.open {
            return None;
        }
        let name = self.name?;
        let id = self
            .id
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
        let arguments_json = if self.buffer.trim().is_empty() {
            "{}".to_string()
        } else {
            self.buffer
        };
        Some(PendingToolCall {
            id,
            name,
            arguments_json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_starts_closed() {
        let acc = ToolCallAccumulator::new();
        assert!(!acc.is_open());
        assert!(acc.finish().is_none());
    }

    #[test]
    fn test_accumulator_ignores_text_deltas() {
        let mut acc = ToolCallAccumulator::new();
        acc.observe(&TurnEvent::TextDelta("hello".to_string()));
        assert!(!acc.is_open());
        assert!(acc.finish().is_none());
    }

    #[test]
    fn test_accumulator_single_fragment() {
        let mut acc = ToolCallAccumulator::new();
        acc.observe(&TurnEvent::ToolCallStart {
            id: Some("call_1".to_string()),
            name: "search_catalog".to_string(),
        });
        acc.observe(&TurnEvent::ToolCallDelta {
            fragment: r#"{"roast_level":"light"}"#.to_string(),
        });

        let call = acc.finish().unwrap();
        assert_eq!(call.id, "call_1");
        assert_eq!(call.name, "search_catalog");
        assert_eq!(call.arguments_json, r#"{"roast_level":"light"}"#);
    }

    #[test]
    fn test_accumulator_concatenates_in_arrival_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.observe(&TurnEvent::ToolCallStart {
            id: None,
            name: "search_catalog".to_string(),
        });
        for fragment in [r#"{"brew_"#, r#"method":"#, r#""Espresso"}"#] {
            acc.observe(&TurnEvent::ToolCallDelta {
                fragment: fragment.to_string(),
            });
        }

        let call = acc.finish().unwrap();
        assert_eq!(call.arguments_json, r#"{"brew_method":"Espresso"}"#);
    }

    #[test]
    fn test_accumulator_synthesizes_missing_id() {
        let mut acc = ToolCallAccumulator::new();
        acc.observe(&TurnEvent::ToolCallStart {
            id: None,
            name: "search_catalog".to_string(),
        });

        let call = acc.finish().unwrap();
        assert!(call.id.starts_with("call_"));
    }

    #[test]
    fn test_accumulator_empty_arguments_default_to_object() {
        let mut acc = ToolCallAccumulator::new();
        acc.observe(&TurnEvent::ToolCallStart {
            id: Some("call_2".to_string()),
            name: "search_catalog".to_string(),
        });

        let call = acc.finish().unwrap();
        assert_eq!(call.arguments_json, "{}");
    }

    #[test]
    fn test_accumulator_drops_fragments_before_start() {
        let mut acc = ToolCallAccumulator::new();
        acc.observe(&TurnEvent::ToolCallDelta {
            fragment: "{}".to_string(),
        });
        assert!(!acc.is_open());
        assert!(acc.finish().is_none());
    }

    #[test]
    fn test_tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "search_catalog".to_string(),
            description: "Search the coffee database".to_string(),
            input_schema: ToolInputSchema {
                schema_type: "object".to_string(),
                properties: serde_json::json!({
                    "brew_method": {"type": "string"}
                }),
                required: vec![],
            },
        };

        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["name"], "search_catalog");
        assert_eq!(json["input_schema"]["type"], "object");
    }

    #[test]
    fn test_finish_reason_equality() {
        assert_eq!(FinishReason::Stop, FinishReason::Stop);
        assert_ne!(FinishReason::Stop, FinishReason::ToolCall);
    }
}
