pub mod digest;
pub mod render;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ServerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    String,
    Int,
    Bool,
    #[serde(rename = "list<string>")]
    ListString,
    Password,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub memory_gb: Option<f64>,
    #[serde(default)]
    pub disk_gb: Option<f64>,
    #[serde(default)]
    pub cpu_cores: Option<u32>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub hardware_hints: Vec<HardwareHint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareHint {
    pub tag: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckKind {
    Http,
    Tcp,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub kind: HealthCheckKind,
    pub target: String,
    #[serde(default)]
    pub expected: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostInstall {
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub health_check: Vec<HealthCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnsibleInstallation {
    #[serde(default)]
    pub pre_tasks: Vec<Value>,
    pub tasks: Vec<Value>,
    #[serde(default)]
    pub post_tasks: Vec<Value>,
    #[serde(default)]
    pub handlers: Vec<Value>,
    #[serde(default)]
    pub service_templates: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerraformInstallation {
    pub required_version: String,
    #[serde(default)]
    pub backend: Option<Value>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    pub main_tf: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Installation {
    DockerCompose { compose: Value },
    Ansible(AnsibleInstallation),
    Terraform(TerraformInstallation),
}

impl Installation {
    pub fn method_name(&self) -> &'static str {
        match self {
            Installation::DockerCompose { .. } => "docker_compose",
            Installation::Ansible(_) => "ansible",
            Installation::Terraform(_) => "terraform",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTemplate {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Requirements,
    #[serde(default)]
    pub default_config: HashMap<String, Value>,
    #[serde(default)]
    pub variables: Vec<VariableDef>,
    pub installation: Installation,
    #[serde(default)]
    pub post_install: PostInstall,
}

impl ServiceTemplate {
    /// Every `{{name}}` reference in the installation artifacts must resolve
    /// to a declared variable or a `default_config` entry; this is the
    /// "fail closed" structural check run at load time.
    pub fn validate(&self) -> Result<(), String> {
        let known: std::collections::HashSet<&str> = self
            .variables
            .iter()
            .map(|v| v.name.as_str())
            .chain(self.default_config.keys().map(|k| k.as_str()))
            .collect();

        let artifact_text = self.artifact_source_text();
        let referenced = render::extract_variable_refs(&artifact_text);
        let missing: Vec<&str> = referenced
            .iter()
            .map(String::as_str)
            .filter(|r| !known.contains(r))
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "template {} references undeclared variables: {}",
                self.name,
                missing.join(", ")
            ));
        }
        Ok(())
    }

    fn artifact_source_text(&self) -> String {
        match &self.installation {
            Installation::DockerCompose { compose } => compose.to_string(),
            Installation::Ansible(a) => {
                let mut s = serde_json::to_string(&a.pre_tasks).unwrap_or_default();
                s.push_str(&serde_json::to_string(&a.tasks).unwrap_or_default());
                s.push_str(&serde_json::to_string(&a.post_tasks).unwrap_or_default());
                for body in a.service_templates.values() {
                    s.push_str(body);
                }
                s
            }
            Installation::Terraform(t) => t.main_tf.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub name: String,
    pub version: String,
    pub category: String,
    pub description: String,
    pub method: String,
}

impl From<&ServiceTemplate> for TemplateSummary {
    fn from(t: &ServiceTemplate) -> Self {
        Self {
            name: t.name.clone(),
            version: t.version.clone(),
            category: t.category.clone(),
            description: t.description.clone(),
            method: t.installation.method_name().to_string(),
        }
    }
}

/// Loads and holds the catalog of service templates (§4.4). Templates are
/// immutable after load; a reload replaces the whole catalog atomically.
pub struct TemplateStore {
    templates: HashMap<String, ServiceTemplate>,
}

impl TemplateStore {
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Enumerates `dir` for `*.yaml`/`*.yml` files. A file that fails to
    /// parse or fails structural validation is logged and skipped — a
    /// malformed template never prevents the server from starting.
    pub fn load_dir(dir: &Path) -> Result<Self, ServerError> {
        let mut templates = HashMap::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| ServerError::Templates(format!("reading {}: {e}", dir.display())))?;

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "unreadable template directory entry");
                    continue;
                }
            };
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }
            match Self::load_file(&path) {
                Ok(tpl) => {
                    templates.insert(tpl.name.clone(), tpl);
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "skipping invalid service template");
                }
            }
        }

        tracing::info!(count = templates.len(), dir = %dir.display(), "loaded service templates");
        Ok(Self { templates })
    }

    fn load_file(path: &Path) -> Result<ServiceTemplate, String> {
        let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let template: ServiceTemplate = serde_yaml::from_str(&raw).map_err(|e| e.to_string())?;
        template.validate()?;
        Ok(template)
    }

    pub fn get(&self, name: &str) -> Option<&ServiceTemplate> {
        self.templates.get(name)
    }

    pub fn list(&self) -> Vec<TemplateSummary> {
        let mut summaries: Vec<TemplateSummary> = self.templates.values().map(TemplateSummary::from).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

pub fn default_template_dir(inventory_path: &Path) -> PathBuf {
    inventory_path.join("templates")
}
