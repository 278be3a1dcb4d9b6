// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Mock chat provider for testing
//!
//! A scripted implementation of the ChatProvider trait so orchestrator and
//! server tests can run without real API calls. Scripted turns are consumed
//! in order, one per `start_turn` invocation.

use async_trait::async_trait;
use futures::stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{KaapiError, Result};
use crate::llm::message::Turn;
use crate::llm::provider::{ChatProvider, FinishReason, TurnEvent, TurnStream};

/// One scripted provider turn
enum MockTurn {
    /// Emit these events in order
    Events(Vec<Result<TurnEvent>>),
    /// Fail the call before any event is produced
    StartError(KaapiError),
}

/// What the provider was asked to do
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub history: Vec<Turn>,
    pub tools_enabled: bool,
}

/// A scripted mock provider
#[derive(Clone, Default)]
pub struct MockProvider {
    turns: Arc<Mutex<VecDeque<MockTurn>>>,
    recorded: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a plain text answer, streamed in word-sized deltas.
    pub fn push_text(&self, text: &str) {
        let mut events: Vec<Result<TurnEvent>> = Vec::new();
        let words: Vec<&str> = text.split_inclusive(' ').collect();
        for word in words {
            events.push(Ok(TurnEvent::TextDelta(word.to_string())));
        }
        events.push(Ok(TurnEvent::TurnComplete {
            reason: FinishReason::Stop,
        }));
        self.push_events(events);
    }

    /// Script a tool invocation with the argument JSON split into fragments.
    pub fn push_tool_call(&self, name: &str, fragments: &[&str]) {
        let mut events: Vec<Result<TurnEvent>> = vec![Ok(TurnEvent::ToolCallStart {
            id: Some(format!("call_mock_{}", name)),
            name: name.to_string(),
        })];
        for fragment in fragments {
            events.push(Ok(TurnEvent::ToolCallDelta {
                fragment: fragment.to_string(),
            }));
        }
        events.push(Ok(TurnEvent::TurnComplete {
            reason: FinishReason::ToolCall,
        }));
        self.push_events(events);
    }

    /// Script a raw event sequence.
    pub fn push_events(&self, events: Vec<Result<TurnEvent>>) {
        self.turns
            .lock()
            .unwrap()
            .push_back(MockTurn::Events(events));
    }

    /// Script a failure before any event is produced.
    pub fn push_start_error(&self, error: KaapiError) {
        self.turns
            .lock()
            .unwrap()
            .push_back(MockTurn::StartError(error));
    }

    /// Script a stream that yields some text and then fails mid-stream.
    pub fn push_mid_stream_error(&self, text: &str, error: KaapiError) {
        let events: Vec<Result<TurnEvent>> =
            vec![Ok(TurnEvent::TextDelta(text.to_string())), Err(error)];
        self.push_events(events);
    }

    /// Everything `start_turn` has been asked so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.recorded.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start_turn(&self, history: &[Turn], tools_enabled: bool) -> Result<TurnStream> {
        self.recorded.lock().unwrap().push(RecordedCall {
            history: history.to_vec(),
            tools_enabled,
        });

        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockTurn::Events(vec![Ok(TurnEvent::TurnComplete {
                reason: FinishReason::Stop,
            })]));

        match turn {
            MockTurn::StartError(error) => Err(error),
            MockTurn::Events(events) => Ok(Box::pin(stream::iter(events))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_mock_streams_scripted_text() {
        let provider = MockProvider::new();
        provider.push_text("hello there");

        let mut stream = provider.start_turn(&[Turn::user("hi")], true).await.unwrap();
        let mut text = String::new();
        let mut finished = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                TurnEvent::TextDelta(t) => text.push_str(&t),
                TurnEvent::TurnComplete { reason } => {
                    assert_eq!(reason, FinishReason::Stop);
                    finished = true;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(text, "hello there");
        assert!(finished);
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let provider = MockProvider::new();
        provider.push_text("a");
        let _ = provider.start_turn(&[Turn::user("q")], false).await.unwrap();

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].tools_enabled);
        assert_eq!(calls[0].history[0].text(), Some("q"));
    }

    #[tokio::test]
    async fn test_mock_start_error() {
        let provider = MockProvider::new();
        provider.push_start_error(KaapiError::Tool("boom".to_string()));
        assert!(provider.start_turn(&[], true).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_tool_call_fragments() {
        let provider = MockProvider::new();
        provider.push_tool_call("search_catalog", &["{\"a\":", "1}"]);

        let mut stream = provider.start_turn(&[], true).await.unwrap();
        let mut fragments = String::new();
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                TurnEvent::ToolCallStart { name, .. } => assert_eq!(name, "search_catalog"),
                TurnEvent::ToolCallDelta { fragment } => fragments.push_str(&fragment),
                TurnEvent::TurnComplete { reason } => {
                    assert_eq!(reason, FinishReason::ToolCall)
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(fragments, "{\"a\":1}");
    }
}
