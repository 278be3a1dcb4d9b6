// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Session store
//!
//! Process-wide mapping from session identifier to conversation history.
//! Sessions are created on first use, removed only by the delete endpoint,
//! and otherwise live for the process lifetime; nothing is persisted.
//! `SessionStore` is a trait so a durable store could replace the in-memory
//! map without touching the orchestrator.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::llm::message::Turn;

/// One session's conversation state.
#[derive(Debug, Default)]
pub struct Session {
    pub history: Vec<Turn>,
}

impl Session {
    /// Number of plain-text user turns. Tool-result carrier turns do not
    /// count. Always recomputed from history, never cached.
    pub fn user_turn_count(&self) -> usize {
        self.history.iter().filter(|t| t.is_user_text()).count()
    }
}

/// Handle to one session. Holding the lock serializes requests that share a
/// session id without serializing across sessions.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Store interface the orchestrator and the delete endpoint talk to.
pub trait SessionStore: Send + Sync {
    /// Look up a session, creating it if the id is unknown. The boolean is
    /// true when the session was just created.
    fn get_or_create(&self, session_id: &str) -> (SessionHandle, bool);

    /// Remove a session. Returns whether it existed; callers treat deletes
    /// as idempotent either way.
    fn remove(&self, session_id: &str) -> bool;

    /// Number of live sessions.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory session store.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get_or_create(&self, session_id: &str) -> (SessionHandle, bool) {
        if let Some(handle) = self.sessions.read().unwrap().get(session_id) {
            return (Arc::clone(handle), false);
        }
        let mut sessions = self.sessions.write().unwrap();
        // Lost the race to another writer? Reuse theirs.
        if let Some(handle) = sessions.get(session_id) {
            return (Arc::clone(handle), false);
        }
        let handle: SessionHandle = Arc::new(Mutex::new(Session::default()));
        sessions.insert(session_id.to_string(), Arc::clone(&handle));
        (handle, true)
    }

    fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().unwrap().remove(session_id).is_some()
    }

    fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_new_session() {
        let store = InMemorySessionStore::new();
        let (_, created) = store.get_or_create("s1");
        assert!(created);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_or_create_existing_session() {
        let store = InMemorySessionStore::new();
        let (first, _) = store.get_or_create("s1");
        let (second, created) = store.get_or_create("s1");
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_existing() {
        let store = InMemorySessionStore::new();
        store.get_or_create("s1");
        assert!(store.remove("s1"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_unknown_is_idempotent() {
        let store = InMemorySessionStore::new();
        assert!(!store.remove("never-created"));
        assert!(!store.remove("never-created"));
    }

    #[tokio::test]
    async fn test_user_turn_count_ignores_tool_turns() {
        let store = InMemorySessionStore::new();
        let (handle, _) = store.get_or_create("s1");
        let mut session = handle.lock().await;

        session.history.push(Turn::user("first"));
        session.history.push(Turn::assistant("reply"));
        session.history.push(Turn::user("second"));
        session
            .history
            .push(Turn::tool_call("c1", "search_catalog", serde_json::json!({})));
        session
            .history
            .push(Turn::tool_result("c1", "search_catalog", "- rows"));
        session.history.push(Turn::assistant("recommendation"));

        assert_eq!(session.user_turn_count(), 2);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = InMemorySessionStore::new();
        let (a, _) = store.get_or_create("a");
        let (b, _) = store.get_or_create("b");

        a.lock().await.history.push(Turn::user("hello"));
        assert_eq!(a.lock().await.user_turn_count(), 1);
        assert_eq!(b.lock().await.user_turn_count(), 0);
    }
}
