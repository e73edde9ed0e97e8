use serde_json::Value;
use sha2::{Digest as _, Sha256};

use super::render::RenderedArtifacts;
use super::render::RenderedKind;

/// Canonicalized-JSON hash of the rendered artifacts (§4.4). Used by the
/// installer to decide whether a reinstall is a no-op: same digest plus a
/// healthy service record short-circuits to `Verifying`.
pub fn config_digest(artifacts: &RenderedArtifacts) -> String {
    let canonical = canonical_json(artifacts);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical_json(artifacts: &RenderedArtifacts) -> String {
    let value = match &artifacts.kind {
        RenderedKind::DockerCompose { yaml } => serde_json::json!({"method": "docker_compose", "yaml": yaml}),
        RenderedKind::Ansible { playbook, files } => {
            let mut sorted_files: Vec<(&String, &String)> = files.iter().collect();
            sorted_files.sort_by_key(|(k, _)| k.clone());
            serde_json::json!({
                "method": "ansible",
                "playbook": playbook,
                "files": sorted_files,
            })
        }
        RenderedKind::Terraform { main_tf, tfvars } => {
            serde_json::json!({"method": "terraform", "main_tf": main_tf, "tfvars": tfvars})
        }
    };
    canonicalize(&value)
}

/// Deterministic serialization: object keys sorted, no extraneous whitespace.
/// `serde_json::Value`'s `BTreeMap`-backed variant would do this for us, but
/// we build plain `Value`s above, so normalize explicitly.
fn canonicalize(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(String, Value)> = map.iter().map(|(k, v)| (k.clone(), sort(v))).collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                let mut sorted = serde_json::Map::new();
                for (k, v) in entries {
                    sorted.insert(k, v);
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}
