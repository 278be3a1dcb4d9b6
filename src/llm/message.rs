// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Conversation turn types
//!
//! Defines the internal representation of a session's history. Provider
//! adapters translate these turns into their own wire shapes and back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of the turn author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user (also carries tool results back to the model)
    User,
    /// Model output (also carries tool-invocation requests)
    Assistant,
}

/// Payload of a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnContent {
    /// Plain text
    Text { text: String },

    /// The model asked to invoke a tool
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },

    /// What the tool returned, formatted for the model to read
    ToolResult {
        id: String,
        name: String,
        content: String,
    },
}

/// One entry in a session's ordered conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a user text turn
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Text { text: text.into() },
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant text turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Text { text: text.into() },
            timestamp: Utc::now(),
        }
    }

    /// Create a tool-invocation-request turn (assistant side)
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::ToolCall {
                id: id.into(),
                name: name.into(),
                args,
            },
            timestamp: Utc::now(),
        }
    }

    /// Create a tool-result turn (carried back on the user side)
    pub fn tool_result(
        id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::ToolResult {
                id: id.into(),
                name: name.into(),
                content: content.into(),
            },
            timestamp: Utc::now(),
        }
    }

    /// True for plain-text user turns; tool-result carrier turns do not count.
    pub fn is_user_text(&self) -> bool {
        self.role == Role::User && matches!(self.content, TurnContent::Text { .. })
    }

    /// Get the text content, if this is a plain text turn
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            TurnContent::Text { text } => Some(text),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Bound a history to its most recent `max` turns without orphaning tool
/// turns.
///
/// A tool-call turn and its paired result are always adjacent, so after
/// taking the tail we drop leading turns until the window starts on plain
/// text. Adapters with small context budgets use this; others send the
/// full history.
pub fn window_history(history: &[Turn], max: usize) -> &[Turn] {
    let start = history.len().saturating_sub(max);
    let mut window = &history[start..];
    while let Some(first) = window.first() {
        match first.content {
            TurnContent::Text { .. } => break,
            _ => window = &window[1..],
        }
    }
    window
}
