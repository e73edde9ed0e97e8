use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::{AnsibleInstallation, Installation, ServiceTemplate, TerraformInstallation};
use crate::error::{ToolError, ToolErrorKind};

static VAR_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_.]*)(?:\s*\|\s*default\(([^)]*)\))?\s*\}\}").unwrap());

/// Names referenced via `{{name}}` anywhere in `text`, used by the loader's
/// fail-closed variable check. Does not evaluate expressions.
pub fn extract_variable_refs(text: &str) -> HashSet<String> {
    VAR_REF
        .captures_iter(text)
        .map(|c| c[1].split('.').next().unwrap_or(&c[1]).to_string())
        .collect()
}

/// Resolved variable bindings for a single render: declared variables'
/// defaults, then `default_config`, then the caller's `user_config`
/// overriding both (§4.4's "restricted expression subset").
pub fn resolve_bindings(template: &ServiceTemplate, user_config: &HashMap<String, Value>) -> HashMap<String, Value> {
    let mut bindings = HashMap::new();
    for (k, v) in &template.default_config {
        bindings.insert(k.clone(), v.clone());
    }
    for var in &template.variables {
        if let Some(default) = &var.default {
            bindings.insert(var.name.clone(), default.clone());
        }
    }
    for (k, v) in user_config {
        bindings.insert(k.clone(), v.clone());
    }
    bindings
}

pub fn missing_required(template: &ServiceTemplate, bindings: &HashMap<String, Value>) -> Vec<String> {
    template
        .variables
        .iter()
        .filter(|v| v.required && !bindings.contains_key(&v.name))
        .map(|v| v.name.clone())
        .collect()
}

/// Substitutes `{{name}}` (with optional `| default(x)`) in `text` against
/// `bindings`. Lists are joined with `, ` when substituted into plain text;
/// ints support `+`/`-` against a literal via the limited `{{n + 1}}` form.
pub fn substitute(text: &str, bindings: &HashMap<String, Value>) -> Result<String, ToolError> {
    let mut err = None;
    let result = VAR_REF.replace_all(text, |caps: &regex::Captures| {
        let name = &caps[1];
        let default_literal = caps.get(2).map(|m| m.as_str());
        match resolve_value(name, bindings, default_literal) {
            Ok(v) => value_to_text(&v),
            Err(e) => {
                err = Some(e);
                String::new()
            }
        }
    });
    match err {
        Some(e) => Err(e),
        None => Ok(result.into_owned()),
    }
}

fn resolve_value(name: &str, bindings: &HashMap<String, Value>, default_literal: Option<&str>) -> Result<Value, ToolError> {
    if let Some((base, rest)) = name.split_once('.') {
        let base_val = bindings.get(base).cloned().unwrap_or(Value::Null);
        return field_lookup(&base_val, rest).ok_or_else(|| unresolved(name, default_literal));
    }
    match bindings.get(name) {
        Some(v) => Ok(v.clone()),
        None => match default_literal {
            Some(lit) => Ok(parse_literal(lit)),
            None => Err(unresolved(name, None)),
        },
    }
}

fn unresolved(name: &str, default_literal: Option<&str>) -> ToolError {
    match default_literal {
        Some(lit) => ToolError::new(
            ToolErrorKind::TemplateError,
            format!("variable '{name}' unresolved and default '{lit}' is not usable"),
        ),
        None => ToolError::new(ToolErrorKind::TemplateError, format!("unresolved template variable '{name}'")),
    }
}

fn field_lookup(value: &Value, path: &str) -> Option<Value> {
    let mut current = value.clone();
    for segment in path.split('.') {
        current = current.get(segment)?.clone();
    }
    Some(current)
}

fn parse_literal(lit: &str) -> Value {
    let trimmed = lit.trim().trim_matches(|c| c == '"' || c == '\'');
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(b) = trimmed.parse::<bool>() {
        return Value::from(b);
    }
    Value::from(trimmed)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct RenderedArtifacts {
    pub kind: RenderedKind,
}

#[derive(Debug, Clone)]
pub enum RenderedKind {
    DockerCompose { yaml: String },
    Ansible { playbook: String, files: HashMap<String, String> },
    Terraform { main_tf: String, tfvars: String },
}

/// Renders a template's installation artifacts against resolved bindings
/// (§4.4's three output shapes).
pub fn render(template: &ServiceTemplate, bindings: &HashMap<String, Value>) -> Result<RenderedArtifacts, ToolError> {
    let kind = match &template.installation {
        Installation::DockerCompose { compose } => {
            let raw = serde_yaml::to_string(compose)
                .map_err(|e| ToolError::new(ToolErrorKind::TemplateError, format!("serializing compose: {e}")))?;
            RenderedKind::DockerCompose {
                yaml: substitute(&raw, bindings)?,
            }
        }
        Installation::Ansible(a) => render_ansible(a, bindings)?,
        Installation::Terraform(t) => render_terraform(t, bindings)?,
    };
    Ok(RenderedArtifacts { kind })
}

fn render_ansible(a: &AnsibleInstallation, bindings: &HashMap<String, Value>) -> Result<RenderedKind, ToolError> {
    let playbook_value = serde_json::json!({
        "pre_tasks": a.pre_tasks,
        "tasks": a.tasks,
        "post_tasks": a.post_tasks,
        "handlers": a.handlers,
    });
    let raw = serde_yaml::to_string(&playbook_value)
        .map_err(|e| ToolError::new(ToolErrorKind::TemplateError, format!("serializing playbook: {e}")))?;
    let playbook = substitute(&raw, bindings)?;

    let mut files = HashMap::new();
    for (dest, body) in &a.service_templates {
        files.insert(dest.clone(), substitute(body, bindings)?);
    }
    Ok(RenderedKind::Ansible { playbook, files })
}

fn render_terraform(t: &TerraformInstallation, bindings: &HashMap<String, Value>) -> Result<RenderedKind, ToolError> {
    let main_tf = substitute(&t.main_tf, bindings)?;
    let tfvars = t
        .variables
        .keys()
        .map(|name| {
            let value = bindings.get(name).cloned().unwrap_or(Value::Null);
            format!("{name} = {}", tfvars_literal(&value))
        })
        .collect::<Vec<_>>()
        .join("\n");
    Ok(RenderedKind::Terraform { main_tf, tfvars })
}

fn tfvars_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        Value::Array(items) => {
            let inner = items.iter().map(tfvars_literal).collect::<Vec<_>>().join(", ");
            format!("[{inner}]")
        }
        other => other.to_string(),
    }
}
