use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

/// Application state attached to a connection identity.
#[derive(Debug)]
pub struct Session {
    id: String,
    data: Mutex<Map<String, Value>>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: Mutex::new(Map::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }
}

/// Looks up the session for a connection identity. No protocol side effects.
pub trait SessionStore: Send + Sync {
    fn resolve(&self, id: &str) -> Option<Arc<Session>>;
}

/// In-process store that creates a session the first time an identity resolves.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn resolve(&self, id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Session::new(id)));
        Some(Arc::clone(session))
    }
}
