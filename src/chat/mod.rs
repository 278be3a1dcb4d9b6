// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Conversation orchestration
//!
//! Ties the provider, the search tool, and the session store together for
//! each inbound message.

pub mod engine;

pub use engine::{
    ChatEngine, GENERIC_ERROR_MESSAGE, MAX_TURNS, RATE_LIMIT_MESSAGE, TURN_LIMIT_MESSAGE,
};

/// Persona and conversation rules sent to every provider.
pub const SYSTEM_PROMPT: &str = include_str!("../../prompts/system_prompt.txt");
