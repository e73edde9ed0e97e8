use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{ToolError, ToolErrorKind};

/// One of the seven buckets a tool falls into (§4.3). Informational — used
/// for listing and for UI grouping, not for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Discovery,
    SshAdmin,
    VmLifecycle,
    ServiceInstall,
    Terraform,
    Sitemap,
    HomelabTopology,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    Read,
    Mutate,
    Destructive,
}

/// The result a handler hands back to the dispatcher. `content` follows the
/// MCP `{type, text|json}` content-block shape; `is_error` distinguishes an
/// application-level failure from success without becoming a protocol error
/// (§4.7, §7).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolOutcome {
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
    Json { json: Value },
}

impl ToolOutcome {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: s.into() }],
            is_error: false,
        }
    }

    pub fn json(value: Value) -> Self {
        Self {
            content: vec![ContentBlock::Json { json: value }],
            is_error: false,
        }
    }

    pub fn from_tool_error(err: &ToolError) -> Self {
        Self {
            content: vec![ContentBlock::Json {
                json: serde_json::json!({
                    "kind": err.kind,
                    "message": err.message,
                    "details": err.details,
                }),
            }],
            is_error: true,
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<ToolOutcome, ToolError>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<ToolOutcome, ToolError>> + Send + 'static,
{
    async fn call(&self, arguments: Value) -> Result<ToolOutcome, ToolError> {
        (self)(arguments).await
    }
}

pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub side_effect: SideEffect,
    pub input_schema: &'static Value,
    compiled_schema: JSONSchema,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    /// Leaks the input schema so the compiled validator can borrow it for
    /// `'static`. Tool definitions are registered once at bootstrap and live
    /// for the process lifetime, so this is not a per-call allocation.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
        side_effect: SideEffect,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<Self, crate::error::ServerError> {
        let input_schema: &'static Value = Box::leak(Box::new(input_schema));
        let compiled_schema = JSONSchema::options()
            .with_draft(jsonschema::Draft::Draft7)
            .compile(input_schema)
            .map_err(|e| crate::error::ServerError::Config(format!("invalid tool schema: {e}")))?;
        Ok(Self {
            name: name.into(),
            description: description.into(),
            category,
            side_effect,
            input_schema,
            compiled_schema,
            handler,
        })
    }

    pub fn summary(&self) -> ToolSummary {
        ToolSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: (*self.input_schema).clone(),
        }
    }

    pub fn category(&self) -> ToolCategory {
        self.category
    }

    pub fn side_effect(&self) -> SideEffect {
        self.side_effect
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Declarative catalog of tools (§4.3). Insertion order is preserved for
/// `list()`; dispatch validates arguments against the compiled schema before
/// the handler ever runs, so a handler never sees malformed input.
#[derive(Default)]
pub struct ToolRegistry {
    order: Vec<String>,
    tools: std::collections::HashMap<String, ToolDefinition>,
}

pub enum DispatchError {
    NotFound,
    InvalidParams(String),
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: ToolDefinition) {
        if !self.tools.contains_key(&def.name) {
            self.order.push(def.name.clone());
        }
        self.tools.insert(def.name.clone(), def);
    }

    pub fn list(&self) -> Vec<ToolSummary> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(ToolDefinition::summary)
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub async fn dispatch(&self, name: &str, arguments: Value) -> Result<ToolOutcome, DispatchError> {
        let def = self.tools.get(name).ok_or(DispatchError::NotFound)?;

        let errors: Vec<String> = def
            .compiled_schema
            .validate(&arguments)
            .err()
            .map(|iter| iter.map(|e| e.to_string()).collect())
            .unwrap_or_default();
        if !errors.is_empty() {
            return Err(DispatchError::InvalidParams(errors.join("; ")));
        }

        match def.handler.call(arguments).await {
            Ok(outcome) => Ok(outcome),
            Err(tool_err) => Ok(ToolOutcome::from_tool_error(&tool_err)),
        }
    }
}

pub fn requires_confirmation(side_effect: SideEffect, arguments: &Value) -> Result<(), ToolError> {
    if side_effect == SideEffect::Destructive {
        let confirmed = arguments
            .get("confirm")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !confirmed {
            return Err(ToolError::new(
                ToolErrorKind::RequirementUnmet,
                "destructive tool requires confirm: true",
            ));
        }
    }
    Ok(())
}
