use dashmap::DashMap;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    ShuttingDown,
}

#[derive(Debug, Clone)]
pub struct McpSession {
    pub session_id: String,
    pub state: SessionState,
    pub protocol_version: Option<String>,
    pub client_info: Option<Value>,
    pub capabilities: Option<Value>,
}

impl McpSession {
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            state: SessionState::Uninitialized,
            protocol_version: None,
            client_info: None,
            capabilities: None,
        }
    }
}

/// Transport-scoped session table (§3's "MCP Session"). stdio and WebSocket
/// transports own exactly one session for their connection's lifetime; HTTP
/// keys by `Mcp-Session-Id` (or synthesizes a fresh session per request in
/// stateless mode).
#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<String, McpSession>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, session_id: &str) -> McpSession {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| McpSession::new(session_id.to_string()))
            .clone()
    }

    pub fn update<F: FnOnce(&mut McpSession)>(&self, session_id: &str, f: F) {
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| McpSession::new(session_id.to_string()));
        f(&mut entry);
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn is_initialized(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.state == SessionState::Initialized)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
