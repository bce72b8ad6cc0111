//! Integration tests for schemas loaded from YAML/JSON files.

use serde_json::json;
use std::fs;
use stratum_config::format::format_schema_markdown;
use stratum_config::manager::ConfigManager;
use stratum_config::schema::Schema;
use stratum_config::sources::{EnvSource, FileSource, LoadContext};
use tempfile::TempDir;

/// Schema exercising defaults, env aliases, arrays and a file ref.
fn service_schema_yaml() -> &'static str {
    r#"
type: object
properties:
  name:
    type: string
    default: service
  port:
    type: integer
    env: [SERVICE_PORT, PORT]
    description: Listen port
  hosts:
    type: array
    items: { type: string }
    optional: true
  tls:
    type: ref
    source: file
    optional: true
    target:
      type: object
      properties:
        cert: { type: string }
        key: { type: secret }
"#
}

#[test]
fn schema_file_round_trips_through_listing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("schema.yaml");
    fs::write(&path, service_schema_yaml()).unwrap();

    let schema = Schema::from_path(&path).expect("schema should parse");
    let listing = format_schema_markdown(&schema);

    assert!(listing.starts_with("# Schema (4 fields)"));
    assert!(listing.contains("- **port**: integer (env SERVICE_PORT, PORT) - Listen port"));
    assert!(listing.contains("- **tls**: ref (optional)"));
}

#[test]
fn schema_file_errors_name_the_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.yaml");
    fs::write(&path, "type: strnig\n").unwrap();

    let err = Schema::from_path(&path).expect_err("schema should not parse");
    assert!(
        err.to_string()
            .starts_with(&format!("failed to parse {}:", path.display()))
    );
}

#[tokio::test]
async fn schema_file_drives_full_pipeline() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("tls.yaml"), "cert: /etc/cert.pem\nkey: k3y\n").unwrap();
    fs::write(
        dir.path().join("config.yaml"),
        "port: 1000\nhosts: [a, b]\ntls: tls.yaml\n",
    )
    .unwrap();

    let schema = Schema::from_yaml_str(service_schema_yaml()).expect("schema should parse");
    let config = ConfigManager::new(schema)
        .source(EnvSource::new())
        .source(FileSource::new("config.yaml"))
        .load(
            &LoadContext::new()
                .with_cwd(dir.path())
                .with_env("PORT", "2000"),
        )
        .await
        .expect("load should succeed");

    assert_eq!(
        config.value(),
        &json!({
            "name": "service",
            "port": 2000,
            "hosts": ["a", "b"],
            "tls": {"cert": "/etc/cert.pem", "key": "k3y"}
        })
    );
    assert_eq!(config.origin("port"), Some("envs:PORT"));
    assert_eq!(config.redacted()["tls"]["key"], json!("******"));
}
