// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Conversation engine
//!
//! The per-message state machine: enforce the turn cap, run the first
//! model pass with the search tool declared, execute at most one tool
//! round-trip, run the second pass without tools, and stream text to the
//! caller as it is produced. Only completed passes are written back to the
//! session; upstream failures turn into one fixed fallback sentence.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use futures::{Stream, StreamExt};
use tokio::time::timeout;
use tracing::{error, info};

use crate::catalog::CatalogStore;
use crate::error::{ApiError, FallbackClass, KaapiError};
use crate::llm::message::Turn;
use crate::llm::provider::{ChatProvider, FinishReason, ToolCallAccumulator, TurnEvent};
use crate::session::SessionStore;
use crate::tools::SearchResolver;

/// Hard cap on plain-text user turns per session.
pub const MAX_TURNS: usize = 8;

/// Returned without any model call once the cap is exceeded.
pub const TURN_LIMIT_MESSAGE: &str =
    "You've reached the end of this session! Refresh the page to start fresh and discover more coffees.";

/// Fallback sentence for rate-limited upstream failures.
pub const RATE_LIMIT_MESSAGE: &str =
    "I'm getting a lot of requests right now — please try again in a minute!";

/// Fallback sentence for every other upstream failure.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong on my end. Please try again!";

/// Deadline for opening a provider stream.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline between consecutive stream events once a turn is open.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of driving one provider pass to its turn boundary.
struct PassOutcome {
    text: String,
    finish: FinishReason,
    accumulator: ToolCallAccumulator,
    failure: Option<KaapiError>,
}

fn fallback_message(error: &KaapiError) -> &'static str {
    match error.fallback() {
        FallbackClass::RateLimited => RATE_LIMIT_MESSAGE,
        FallbackClass::Transient | FallbackClass::Other => GENERIC_ERROR_MESSAGE,
    }
}

/// The conversation orchestrator.
#[derive(Clone)]
pub struct ChatEngine {
    provider: Arc<dyn ChatProvider>,
    resolver: Arc<SearchResolver>,
    sessions: Arc<dyn SessionStore>,
}

impl ChatEngine {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        catalog: Arc<dyn CatalogStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            provider,
            resolver: Arc::new(SearchResolver::new(catalog)),
            sessions,
        }
    }

    /// The session store, shared with the delete endpoint.
    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.sessions)
    }

    /// Handle one inbound message, streaming the visible response.
    ///
    /// The returned stream is lazy: it is driven by the HTTP response body,
    /// so a client disconnect drops it mid-await and no partial assistant
    /// turn is recorded. The session lock is held for the whole pass, which
    /// serializes concurrent requests on one session id.
    pub fn handle_message(
        &self,
        session_id: String,
        message: String,
    ) -> Pin<Box<dyn Stream<Item = String> + Send>> {
        let engine = self.clone();

        Box::pin(stream! {
            let started = Instant::now();
            let (handle, is_new) = engine.sessions.get_or_create(&session_id);
            let mut session = handle.lock().await;

            let turn = session.user_turn_count() + 1;
            info!(
                session_id = %session_id,
                is_new_session = is_new,
                turn,
                message_length = message.len(),
                "chat_request"
            );

            if turn > MAX_TURNS {
                info!(session_id = %session_id, turn, "turn_limit_reached");
                yield TURN_LIMIT_MESSAGE.to_string();
                return;
            }

            session.history.push(Turn::user(message));

            // First pass: search tool declared.
            let mut first = PassOutcome {
                text: String::new(),
                finish: FinishReason::Stop,
                accumulator: ToolCallAccumulator::new(),
                failure: None,
            };
            {
                let opened = match timeout(
                    REQUEST_TIMEOUT,
                    engine.provider.start_turn(&session.history, true),
                )
                .await
                {
                    Err(_) => Err(KaapiError::Api(ApiError::Timeout)),
                    Ok(result) => result,
                };

                match opened {
                    Err(e) => first.failure = Some(e),
                    Ok(mut events) => loop {
                        match timeout(IDLE_TIMEOUT, events.next()).await {
                            Err(_) => {
                                first.failure = Some(KaapiError::Api(ApiError::Timeout));
                                break;
                            }
                            Ok(None) => break,
                            Ok(Some(Err(e))) => {
                                first.failure = Some(e);
                                break;
                            }
                            Ok(Some(Ok(event))) => {
                                first.accumulator.observe(&event);
                                match event {
                                    TurnEvent::TextDelta(delta) => {
                                        first.text.push_str(&delta);
                                        yield delta;
                                    }
                                    TurnEvent::TurnComplete { reason } => first.finish = reason,
                                    _ => {}
                                }
                            }
                        }
                    },
                }
            }

            if let Some(failure) = first.failure {
                error!(
                    session_id = %session_id,
                    turn,
                    duration_ms = started.elapsed().as_millis() as u64,
                    error = %failure,
                    "chat_error"
                );
                yield fallback_message(&failure).to_string();
                return;
            }

            let pending = match first.finish {
                FinishReason::ToolCall => first.accumulator.finish(),
                _ => None,
            };

            let used_tool = pending.is_some();
            let response_length;

            if let Some(call) = pending {
                let result_text = match engine.resolver.resolve(&call.name, &call.arguments_json).await {
                    Ok(text) => text,
                    Err(failure) => {
                        // Malformed arguments or a broken catalog abort the
                        // whole tool branch; nothing is persisted.
                        error!(
                            session_id = %session_id,
                            turn,
                            duration_ms = started.elapsed().as_millis() as u64,
                            error = %failure,
                            "chat_error"
                        );
                        yield fallback_message(&failure).to_string();
                        return;
                    }
                };

                // The request and its result are appended together, never
                // one without the other.
                let args = serde_json::from_str(&call.arguments_json)
                    .unwrap_or_else(|_| serde_json::json!({}));
                session.history.push(Turn::tool_call(&call.id, &call.name, args));
                session.history.push(Turn::tool_result(&call.id, &call.name, &result_text));

                // Second pass: tool declaration omitted, so a tool call
                // cannot chain into another.
                let mut recommendation = String::new();
                let mut failure: Option<KaapiError> = None;
                {
                    let opened = match timeout(
                        REQUEST_TIMEOUT,
                        engine.provider.start_turn(&session.history, false),
                    )
                    .await
                    {
                        Err(_) => Err(KaapiError::Api(ApiError::Timeout)),
                        Ok(result) => result,
                    };

                    match opened {
                        Err(e) => failure = Some(e),
                        Ok(mut events) => loop {
                            match timeout(IDLE_TIMEOUT, events.next()).await {
                                Err(_) => {
                                    failure = Some(KaapiError::Api(ApiError::Timeout));
                                    break;
                                }
                                Ok(None) => break,
                                Ok(Some(Err(e))) => {
                                    failure = Some(e);
                                    break;
                                }
                                Ok(Some(Ok(event))) => {
                                    if let TurnEvent::TextDelta(delta) = event {
                                        recommendation.push_str(&delta);
                                        yield delta;
                                    }
                                }
                            }
                        },
                    }
                }

                if let Some(failure) = failure {
                    error!(
                        session_id = %session_id,
                        turn,
                        duration_ms = started.elapsed().as_millis() as u64,
                        error = %failure,
                        "chat_error"
                    );
                    yield fallback_message(&failure).to_string();
                    return;
                }

                response_length = recommendation.len();
                if !recommendation.is_empty() {
                    session.history.push(Turn::assistant(recommendation));
                }
            } else {
                response_length = first.text.len();
                if !first.text.is_empty() {
                    session.history.push(Turn::assistant(first.text));
                }
            }

            info!(
                session_id = %session_id,
                turn,
                duration_ms = started.elapsed().as_millis() as u64,
                response_length,
                used_tool,
                "chat_response"
            );
        })
    }
}
