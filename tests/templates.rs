use homelab_mcp::templates::TemplateStore;
use std::io::Write;

fn write_template(dir: &std::path::Path, filename: &str, contents: &str) {
    let mut f = std::fs::File::create(dir.join(filename)).expect("create template file");
    f.write_all(contents.as_bytes()).expect("write template file");
}

const VALID_TEMPLATE: &str = r#"
name: pihole
version: "1.0.0"
category: networking
description: DNS sinkhole
variables:
  - name: admin_password
    type: password
    required: true
  - name: timezone
    type: string
    default: "UTC"
installation:
  method: docker_compose
  compose:
    services:
      pihole:
        image: "pihole/pihole:latest"
        environment:
          WEBPASSWORD: "{{admin_password}}"
          TZ: "{{timezone | default(UTC)}}"
"#;

const MISSING_VARIABLE_TEMPLATE: &str = r#"
name: broken
version: "1.0.0"
installation:
  method: docker_compose
  compose:
    services:
      broken:
        image: "broken:latest"
        environment:
          TOKEN: "{{undeclared_secret}}"
"#;

const MALFORMED_YAML: &str = "name: [this is not: valid yaml structure\n  - whoops";

#[test]
fn load_dir_accepts_valid_template_and_lists_it_sorted() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_template(dir.path(), "pihole.yaml", VALID_TEMPLATE);

    let store = TemplateStore::load_dir(dir.path()).expect("load dir");
    assert_eq!(store.len(), 1);
    let listed = store.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "pihole");
    assert_eq!(listed[0].method, "docker_compose");

    let tpl = store.get("pihole").expect("template present");
    assert_eq!(tpl.variables.len(), 2);
}

#[test]
fn load_dir_skips_templates_with_undeclared_variable_references() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_template(dir.path(), "pihole.yaml", VALID_TEMPLATE);
    write_template(dir.path(), "broken.yaml", MISSING_VARIABLE_TEMPLATE);

    let store = TemplateStore::load_dir(dir.path()).expect("load dir");
    // The malformed template is skipped, not fatal to the whole catalog load.
    assert_eq!(store.len(), 1);
    assert!(store.get("broken").is_none());
    assert!(store.get("pihole").is_some());
}

#[test]
fn load_dir_skips_unparseable_yaml_without_failing_the_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_template(dir.path(), "pihole.yaml", VALID_TEMPLATE);
    write_template(dir.path(), "garbage.yaml", MALFORMED_YAML);

    let store = TemplateStore::load_dir(dir.path()).expect("load dir");
    assert_eq!(store.len(), 1);
}

#[test]
fn load_dir_ignores_non_yaml_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_template(dir.path(), "pihole.yaml", VALID_TEMPLATE);
    write_template(dir.path(), "README.md", "not a template");

    let store = TemplateStore::load_dir(dir.path()).expect("load dir");
    assert_eq!(store.len(), 1);
}

#[test]
fn empty_store_has_no_templates() {
    let store = TemplateStore::empty();
    assert!(store.is_empty());
    assert!(store.list().is_empty());
}

#[test]
fn render_substitutes_declared_variable_and_falls_back_to_default() {
    use homelab_mcp::templates::render;
    use std::collections::HashMap;

    let dir = tempfile::tempdir().expect("tempdir");
    write_template(dir.path(), "pihole.yaml", VALID_TEMPLATE);
    let store = TemplateStore::load_dir(dir.path()).expect("load dir");
    let tpl = store.get("pihole").expect("template present");

    let mut user_config = HashMap::new();
    user_config.insert("admin_password".to_string(), serde_json::json!("hunter2"));
    let bindings = render::resolve_bindings(tpl, &user_config);

    assert!(render::missing_required(tpl, &bindings).is_empty());

    let rendered = render::render(tpl, &bindings).expect("render");
    let homelab_mcp::templates::render::RenderedKind::DockerCompose { yaml } = rendered.kind else {
        panic!("expected docker compose output");
    };
    assert!(yaml.contains("hunter2"));
    assert!(yaml.contains("UTC"));
}

#[test]
fn render_fails_when_a_required_variable_is_unresolved() {
    use homelab_mcp::templates::render;
    use std::collections::HashMap;

    let dir = tempfile::tempdir().expect("tempdir");
    write_template(dir.path(), "pihole.yaml", VALID_TEMPLATE);
    let store = TemplateStore::load_dir(dir.path()).expect("load dir");
    let tpl = store.get("pihole").expect("template present");

    let bindings = render::resolve_bindings(tpl, &HashMap::new());
    let missing = render::missing_required(tpl, &bindings);
    assert_eq!(missing, vec!["admin_password".to_string()]);

    let result = render::render(tpl, &bindings);
    assert!(result.is_err());
}

#[test]
fn config_digest_is_stable_and_sensitive_to_content() {
    use homelab_mcp::templates::digest::config_digest;
    use homelab_mcp::templates::render;
    use std::collections::HashMap;

    let dir = tempfile::tempdir().expect("tempdir");
    write_template(dir.path(), "pihole.yaml", VALID_TEMPLATE);
    let store = TemplateStore::load_dir(dir.path()).expect("load dir");
    let tpl = store.get("pihole").expect("template present");

    let mut config_a = HashMap::new();
    config_a.insert("admin_password".to_string(), serde_json::json!("hunter2"));
    let bindings_a = render::resolve_bindings(tpl, &config_a);
    let rendered_a = render::render(tpl, &bindings_a).expect("render a");
    let digest_a1 = config_digest(&rendered_a);
    let digest_a2 = config_digest(&rendered_a.clone());
    assert_eq!(digest_a1, digest_a2);

    let mut config_b = HashMap::new();
    config_b.insert("admin_password".to_string(), serde_json::json!("different"));
    let bindings_b = render::resolve_bindings(tpl, &config_b);
    let rendered_b = render::render(tpl, &bindings_b).expect("render b");
    let digest_b = config_digest(&rendered_b);

    assert_ne!(digest_a1, digest_b);
}
