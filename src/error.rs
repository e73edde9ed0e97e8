use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Fatal, process-ending failures. Caught only in `main`; everything inside
/// a request handler uses [`ToolError`] instead.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("device store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("template directory unreadable: {0}")]
    Templates(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ServerError {
    /// Exit code per spec §6: 0 success, 1 config, 2 transport, 3 internal.
    pub fn exit_code(&self) -> i32 {
        match self {
            ServerError::Config(_) => 1,
            ServerError::Transport(_) => 2,
            ServerError::Store(_) | ServerError::Templates(_) | ServerError::Other(_) => 3,
        }
    }
}

/// The kinds a tool-level failure can carry, per spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum ToolErrorKind {
    Unreachable,
    AuthFailed,
    Timeout,
    RequirementUnmet,
    TemplateError,
    RemoteFailure,
    StateDrift,
    Busy,
    Cancelled,
    NotFound,
    AlreadyExists,
}

/// Application-level tool failure. Never converted into a JSON-RPC protocol
/// error — handlers return this as `Err`, and the dispatcher folds it into
/// `{isError: true, kind, message, details}` (see `mcp::methods`).
#[derive(Debug, Error, Serialize)]
#[error("{message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Unreachable, message)
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::AuthFailed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Busy, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Cancelled, message)
    }

    pub fn remote_failure(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::RemoteFailure, message)
    }
}

impl From<sqlx::Error> for ToolError {
    fn from(err: sqlx::Error) -> Self {
        ToolError::new(ToolErrorKind::RemoteFailure, format!("store error: {err}"))
    }
}

pub type ToolResult<T> = Result<T, ToolError>;
pub type ServerResult<T> = Result<T, ServerError>;
